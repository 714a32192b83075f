use std::sync::Arc;

use chrono::Duration;
use domain::{
    epoch_millis, ChatRecordView, DomainError, FriendListEntry, FriendRequestView, Friendship,
    FriendshipId, FriendshipStatus, MarkReadMode, NewChatMessage, SessionKey, UserId,
    UserProfile, CHAT_HISTORY_WINDOW_DAYS,
};
use serde::Serialize;

use crate::{
    clock::Clock,
    error::ApplicationError,
    hub::Hub,
    repository::{ChatRepository, FriendshipRepository, UserRepository},
};

/// 发现列表中的一项：用户资料 + 在线状态
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerView {
    #[serde(flatten)]
    pub profile: UserProfile,
    /// 在线时为会话键，离线时为空串
    #[serde(rename = "clientID")]
    pub client_id: String,
    pub is_active: bool,
}

/// 处理好友申请的结果
#[derive(Debug, Clone)]
pub struct RespondOutcome {
    pub friendship: Friendship,
    /// 接受时需要通知的申请方；取自库中的行而不是客户端输入
    pub requester_key: Option<SessionKey>,
}

#[derive(Debug, Clone)]
pub struct SendChatRequest {
    pub from: UserId,
    pub to: UserId,
    pub kind: Option<String>,
    pub message: String,
    pub files: serde_json::Value,
}

pub struct SocialServiceDependencies {
    pub user_repository: Arc<dyn UserRepository>,
    pub friendship_repository: Arc<dyn FriendshipRepository>,
    pub chat_repository: Arc<dyn ChatRepository>,
    pub hub: Hub,
    pub clock: Arc<dyn Clock>,
}

/// 好友与聊天相关的用例
pub struct SocialService {
    deps: SocialServiceDependencies,
}

impl SocialService {
    pub fn new(deps: SocialServiceDependencies) -> Self {
        Self { deps }
    }

    /// 发给 `user` 的待处理好友申请
    pub async fn pull_state(&self, user: UserId) -> Result<Vec<FriendRequestView>, ApplicationError> {
        Ok(self.deps.friendship_repository.pending_requests_for(user).await?)
    }

    pub async fn discover_peers(&self, viewer: UserId) -> Result<Vec<PeerView>, ApplicationError> {
        let candidates = self.deps.user_repository.list_discoverable(viewer).await?;
        let online = self.deps.hub.active_keys().await;

        Ok(candidates
            .into_iter()
            .map(|user| {
                let key = user.session_key();
                let is_active = online.contains(&key);
                PeerView {
                    profile: user.profile(),
                    client_id: if is_active { key.to_string() } else { String::new() },
                    is_active,
                }
            })
            .collect())
    }

    pub async fn request_friend(
        &self,
        from: UserId,
        to: UserId,
    ) -> Result<FriendRequestView, ApplicationError> {
        if from == to {
            return Err(DomainError::invalid_argument("toId", "cannot befriend yourself").into());
        }
        self.deps
            .user_repository
            .find_by_id(to)
            .await?
            .ok_or(DomainError::UserNotFound)?;

        let now_ms = epoch_millis(self.deps.clock.now());
        let request = self
            .deps
            .friendship_repository
            .create_request(from, to, now_ms)
            .await?;
        tracing::info!(from = %from, to = %to, f_id = %request.f_id, "好友申请已创建");
        Ok(request)
    }

    pub async fn respond(
        &self,
        responder: UserId,
        id: FriendshipId,
        decision: FriendshipStatus,
    ) -> Result<RespondOutcome, ApplicationError> {
        if decision == FriendshipStatus::Pending {
            return Err(DomainError::invalid_argument("status", "must be accept or reject").into());
        }
        let now_ms = epoch_millis(self.deps.clock.now());
        let friendship = self
            .deps
            .friendship_repository
            .respond(id, responder, decision, now_ms)
            .await?;

        let requester_key = if decision == FriendshipStatus::Accept {
            self.deps
                .user_repository
                .find_by_id(friendship.user_id)
                .await?
                .map(|user| user.session_key())
        } else {
            None
        };
        tracing::info!(f_id = %id, responder = %responder, status = %decision, "好友申请已处理");

        Ok(RespondOutcome {
            friendship,
            requester_key,
        })
    }

    pub async fn list_friends(&self, user: UserId) -> Result<Vec<FriendListEntry>, ApplicationError> {
        Ok(self.deps.friendship_repository.list_friends(user).await?)
    }

    /// 最近 500 条与最近 7 天的并集，按时间升序
    pub async fn chat_history(
        &self,
        user: UserId,
        friend: UserId,
    ) -> Result<Vec<ChatRecordView>, ApplicationError> {
        let since = self.deps.clock.now() - Duration::days(CHAT_HISTORY_WINDOW_DAYS);
        Ok(self
            .deps
            .chat_repository
            .history(user, friend, epoch_millis(since))
            .await?)
    }

    pub async fn mark_read(&self, reader: UserId, mode: MarkReadMode) -> Result<u64, ApplicationError> {
        Ok(self.deps.chat_repository.mark_read(reader, mode).await?)
    }

    pub async fn send_chat(&self, request: SendChatRequest) -> Result<ChatRecordView, ApplicationError> {
        let message = NewChatMessage {
            from_id: request.from,
            to_id: request.to,
            kind: request.kind.unwrap_or_else(|| "text".into()),
            message: request.message,
            files: request.files,
            sent_at: epoch_millis(self.deps.clock.now()),
        };
        message.validate()?;
        self.deps.chat_repository.send(message).await
    }
}
