//! WebSocket 消息处理
//!
//! 每个会话的入站泵按到达顺序逐条调用 [`handle_frame`]。处理器只通过应用层服务访问存储，
//! 通过 Hub 的会话邮箱投递回复与推送。

use std::fmt::Display;

use application::{ApplicationError, OutboundEnvelope, SendChatRequest, SessionHandle};
use domain::{FriendshipId, FriendshipStatus, MarkReadMode, SessionKey, UserId};
use serde::Serialize;
use serde_json::json;

use crate::{
    error::classify,
    protocol::{
        Command, InboundEnvelope, ProtocolError, REPLY_ADD_FRIENDS, REPLY_CHAT_RECEIVE_DATA,
        REPLY_CHAT_RECORDS, REPLY_CLIENT_LIST, REPLY_DEAL_WITH_FRIENDS, REPLY_FRIEND_LIST,
        REPLY_LATEST_FRIEND_LIST, REPLY_PULL_DATA,
    },
    state::AppState,
};

const IDENTITY_MISMATCH: &str = "用户信息不一致，请确认。";
const SESSION_EXPIRED: &str = "登录已过期，请重新登录。";

/// 帧无法解析为消息信封，入站泵应结束会话
#[derive(Debug)]
pub(crate) struct MalformedFrame;

pub(crate) async fn handle_frame(
    state: &AppState,
    session: &SessionHandle,
    raw: &str,
) -> Result<(), MalformedFrame> {
    session.touch();

    let envelope: InboundEnvelope = serde_json::from_str(raw).map_err(|err| {
        tracing::warn!(session = %session.key(), error = %err, "消息解码失败");
        MalformedFrame
    })?;
    let ctx = Context {
        state,
        session,
        request_id: envelope.request_id(),
    };

    let identity = session.identity();
    if envelope.user.user_id != identity.user_id.0 {
        tracing::warn!(
            request_id = %ctx.request_id,
            session = %session.key(),
            claimed = envelope.user.user_id,
            "消息中的用户与会话身份不一致"
        );
        ctx.fail(400, IDENTITY_MISMATCH);
        return Ok(());
    }
    if identity.token_expired_at(chrono::Utc::now()) {
        ctx.fail(401, SESSION_EXPIRED);
        return Ok(());
    }

    let command = match Command::decode(&envelope) {
        Ok(command) => command,
        Err(err @ ProtocolError::UnknownType(_)) => {
            tracing::warn!(request_id = %ctx.request_id, kind = %envelope.kind, "未知消息类型");
            ctx.fail(404, err);
            return Ok(());
        }
        Err(err) => {
            ctx.fail(400, err);
            return Ok(());
        }
    };

    let name = command.name();
    if let Err(err) = ctx.dispatch(command).await {
        let (status, message) = classify(&err);
        if status.is_server_error() {
            tracing::error!(request_id = %ctx.request_id, command = name, error = %err, "消息处理失败");
        } else {
            tracing::info!(request_id = %ctx.request_id, command = name, error = %err, "请求被拒绝");
        }
        ctx.fail(status.as_u16(), message);
    }
    Ok(())
}

struct Context<'a> {
    state: &'a AppState,
    session: &'a SessionHandle,
    request_id: String,
}

impl Context<'_> {
    async fn dispatch(&self, command: Command) -> Result<(), ApplicationError> {
        let social = &self.state.social_service;
        let me = self.session.identity().user_id;

        match command {
            Command::PullState => {
                let notify_list = social.pull_state(me).await?;
                self.reply(
                    REPLY_PULL_DATA,
                    &json!({
                        "clientID": self.session.key(),
                        "id": me,
                        "name": self.session.identity().name,
                        "notifyList": notify_list,
                        "messageList": null,
                    }),
                )
            }
            Command::DiscoverPeers => self.reply(REPLY_CLIENT_LIST, &social.discover_peers(me).await?),
            Command::RequestFriend(args) => {
                let request = social.request_friend(me, UserId(args.to_id)).await?;
                let target = SessionKey::new(&request.to_name, request.to_id);
                self.push_to(&target, REPLY_ADD_FRIENDS, &[request]).await
            }
            Command::RespondToFriendRequest(args) => {
                let decision = FriendshipStatus::decision(&args.status)?;
                let outcome = social.respond(me, FriendshipId(args.f_id), decision).await?;
                if let Some(requester) = &outcome.requester_key {
                    self.push_to(requester, REPLY_DEAL_WITH_FRIENDS, &outcome.friendship.id)
                        .await?;
                }
                self.reply(REPLY_DEAL_WITH_FRIENDS, &outcome.friendship.id)
            }
            Command::ListFriends => self.reply(REPLY_FRIEND_LIST, &social.list_friends(me).await?),
            Command::ListChatHistory(args) => {
                let records = social.chat_history(me, UserId(args.friend_id)).await?;
                self.reply(REPLY_CHAT_RECORDS, &records)
            }
            Command::MarkChatRead(args) => {
                social
                    .mark_read(me, MarkReadMode::from_wire(&args.mode, args.id))
                    .await?;
                self.reply(REPLY_LATEST_FRIEND_LIST, &social.list_friends(me).await?)
            }
            Command::SendChat(args) => {
                let record = social
                    .send_chat(SendChatRequest {
                        from: me,
                        to: UserId(args.to_id),
                        kind: args.kind,
                        message: args.message,
                        files: args.files,
                    })
                    .await?;
                self.reply(REPLY_LATEST_FRIEND_LIST, &social.list_friends(me).await?)?;

                let target = SessionKey::new(&record.to_name, record.to_id);
                if self.state.hub.lookup(&target).await.is_none() {
                    tracing::info!(request_id = %self.request_id, target = %target, "目标客户端未在线");
                    return Ok(());
                }
                let their_friends = social.list_friends(record.to_id).await?;
                self.push_to(&target, REPLY_CHAT_RECEIVE_DATA, &[record]).await?;
                self.push_to(&target, REPLY_LATEST_FRIEND_LIST, &their_friends)
                    .await
            }
        }
    }

    /// 回复当前会话
    fn reply<T: Serialize>(&self, kind: &str, data: &T) -> Result<(), ApplicationError> {
        let payload = OutboundEnvelope::reply(&self.request_id, kind, data)?.encode()?;
        if !self.state.hub.deliver(self.session, payload) {
            tracing::debug!(request_id = %self.request_id, session = %self.session.key(), "回复投递失败");
        }
        Ok(())
    }

    /// 推送给另一个会话；目标不在线只记录日志
    async fn push_to<T: Serialize>(
        &self,
        target: &SessionKey,
        kind: &str,
        data: &T,
    ) -> Result<(), ApplicationError> {
        let payload = OutboundEnvelope::reply(&self.request_id, kind, data)?.encode()?;
        if !self.state.hub.send_to(target, payload).await {
            tracing::info!(request_id = %self.request_id, target = %target, kind, "目标客户端未在线");
        }
        Ok(())
    }

    fn fail(&self, code: u16, message: impl Display) {
        let envelope = OutboundEnvelope::error(Some(&self.request_id), code, message);
        match envelope.encode() {
            Ok(payload) => {
                self.state.hub.deliver(self.session, payload);
            }
            Err(err) => tracing::warn!(error = %err, "failed to encode error envelope"),
        }
    }
}
