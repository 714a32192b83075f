//! 存储端口
//!
//! 单语句读写返回 `RepositoryError`；多步写入在仓储内部以一个事务完成，
//! 业务规则失败会让事务回滚，因此这些方法直接返回 `ApplicationError`。

use async_trait::async_trait;
use domain::{
    ChatRecordView, FriendListEntry, FriendRequestView, Friendship, FriendshipId,
    FriendshipStatus, MarkReadMode, NewChatMessage, NewUser, ProfileUpdate, RepositoryError,
    Setting, SharedFile, User, UserId,
};

use crate::error::ApplicationError;

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn create(&self, user: NewUser) -> Result<User, RepositoryError>;
    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, RepositoryError>;
    async fn find_by_name(&self, name: &str) -> Result<Option<User>, RepositoryError>;
    async fn count_guests_by_ip(&self, ip: &str) -> Result<i64, RepositoryError>;
    async fn list_guests_by_ip(&self, ip: &str) -> Result<Vec<User>, RepositoryError>;
    async fn update_ip(&self, id: UserId, ip: &str) -> Result<(), RepositoryError>;
    async fn update_profile(
        &self,
        id: UserId,
        update: &ProfileUpdate,
    ) -> Result<User, RepositoryError>;

    /// 发现候选：排除自己、保留 id，以及与自己存在任一方向非 reject 关系的用户
    async fn list_discoverable(&self, viewer: UserId) -> Result<Vec<User>, RepositoryError>;

    /// 删除用户及其聊天记录、好友关系，返回删除的行数
    async fn delete_cascade(&self, id: UserId) -> Result<u64, RepositoryError>;
}

#[async_trait]
pub trait FriendshipRepository: Send + Sync {
    /// 发给 `user` 且仍处于 pending 的申请
    async fn pending_requests_for(
        &self,
        user: UserId,
    ) -> Result<Vec<FriendRequestView>, RepositoryError>;

    /// 插入 pending 行并带双方资料读回
    async fn create_request(
        &self,
        from: UserId,
        to: UserId,
        now_ms: i64,
    ) -> Result<FriendRequestView, ApplicationError>;

    /// 处理申请：只匹配 `id` + `responder` 且仍为 pending 的行；
    /// accept 时若不存在反向行则补一条 accept 反向行，再翻转原行状态。
    /// 返回翻转后的原行。
    async fn respond(
        &self,
        id: FriendshipId,
        responder: UserId,
        decision: FriendshipStatus,
        now_ms: i64,
    ) -> Result<Friendship, ApplicationError>;

    async fn list_friends(&self, user: UserId) -> Result<Vec<FriendListEntry>, RepositoryError>;

    /// `from -> to` 方向的全部行
    async fn find_between(
        &self,
        from: UserId,
        to: UserId,
    ) -> Result<Vec<Friendship>, RepositoryError>;
}

#[async_trait]
pub trait ChatRepository: Send + Sync {
    /// 校验好友关系、写入记录、更新双方 last_chat_id、读回记录，全部在一个事务内
    async fn send(&self, message: NewChatMessage) -> Result<ChatRecordView, ApplicationError>;

    /// 两人之间最近 500 条与 `since_ms` 之后的记录的并集，按时间升序
    async fn history(
        &self,
        user: UserId,
        friend: UserId,
        since_ms: i64,
    ) -> Result<Vec<ChatRecordView>, RepositoryError>;

    /// 只修改发给 `reader` 的记录
    async fn mark_read(&self, reader: UserId, mode: MarkReadMode) -> Result<u64, RepositoryError>;
}

#[async_trait]
pub trait SettingsRepository: Send + Sync {
    async fn load(&self) -> Result<Option<Setting>, RepositoryError>;
    /// 已存在时不覆盖，返回库中的行
    async fn insert_default(&self, setting: &Setting) -> Result<Setting, RepositoryError>;
    async fn save(&self, setting: &Setting) -> Result<Setting, RepositoryError>;
}

/// 共享目录索引（由目录监听器维护）
#[async_trait]
pub trait SharedFileDirectory: Send + Sync {
    async fn find_by_code(&self, file_code: &str) -> Result<Option<SharedFile>, RepositoryError>;
}
