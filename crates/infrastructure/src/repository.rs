use application::{
    ApplicationError, ChatRepository, FriendshipRepository, SettingsRepository,
    SharedFileDirectory, UserRepository,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{
    ChatRecordId, ChatRecordView, DomainError, FriendListEntry, FriendRequestView, Friendship,
    FriendshipId, FriendshipStatus, MarkReadMode, NewChatMessage, NewUser, PasswordHash,
    ProfileUpdate, RepositoryError, Setting, SharedFile, User, UserId, UserRole,
    CHAT_HISTORY_LIMIT, SETTINGS_KEY,
};
use futures::FutureExt;
use sqlx::FromRow;

use crate::args;
use crate::catalog::{CatalogTx, QueryCatalog};

fn invalid_data(message: impl Into<String>) -> RepositoryError {
    RepositoryError::storage(message)
}

#[derive(Debug, FromRow)]
struct CountRecord {
    count: i64,
}

#[derive(Debug, FromRow)]
struct UserRecord {
    id: i64,
    avatar: String,
    name: String,
    nick_name: String,
    pwd: String,
    role: String,
    ip: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<UserRecord> for User {
    type Error = RepositoryError;

    fn try_from(value: UserRecord) -> Result<Self, Self::Error> {
        let password = PasswordHash::new(value.pwd).map_err(|err| invalid_data(err.to_string()))?;
        let role = value
            .role
            .parse::<UserRole>()
            .map_err(|err| invalid_data(err.to_string()))?;

        Ok(User {
            id: UserId(value.id),
            avatar: value.avatar,
            name: value.name,
            nick_name: value.nick_name,
            password,
            role,
            ip: value.ip,
            created_at: value.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct FriendshipRecord {
    f_id: i64,
    user_id: i64,
    friend_id: i64,
    status: String,
    last_chat_id: Option<i64>,
    create_time: i64,
}

fn parse_status(value: &str) -> Result<FriendshipStatus, RepositoryError> {
    value
        .parse::<FriendshipStatus>()
        .map_err(|err| invalid_data(err.to_string()))
}

impl TryFrom<FriendshipRecord> for Friendship {
    type Error = RepositoryError;

    fn try_from(value: FriendshipRecord) -> Result<Self, Self::Error> {
        Ok(Friendship {
            id: FriendshipId(value.f_id),
            user_id: UserId(value.user_id),
            friend_id: UserId(value.friend_id),
            status: parse_status(&value.status)?,
            last_chat_id: value.last_chat_id.map(ChatRecordId),
            create_time: value.create_time,
        })
    }
}

#[derive(Debug, FromRow)]
struct FriendRequestRecord {
    f_id: i64,
    user_id: i64,
    friend_id: i64,
    status: String,
    last_chat_id: Option<i64>,
    create_time: i64,
    from_id: i64,
    from_name: String,
    from_nick_name: String,
    from_role: String,
    from_ip: String,
    to_id: i64,
    to_name: String,
    to_nick_name: String,
    to_role: String,
    to_ip: String,
}

impl TryFrom<FriendRequestRecord> for FriendRequestView {
    type Error = RepositoryError;

    fn try_from(value: FriendRequestRecord) -> Result<Self, Self::Error> {
        Ok(FriendRequestView {
            f_id: FriendshipId(value.f_id),
            user_id: UserId(value.user_id),
            friend_id: UserId(value.friend_id),
            status: parse_status(&value.status)?,
            last_chat_id: value.last_chat_id.map(ChatRecordId),
            create_time: value.create_time,
            from_id: UserId(value.from_id),
            from_name: value.from_name,
            from_nick_name: value.from_nick_name,
            from_role: value.from_role,
            from_ip: value.from_ip,
            to_id: UserId(value.to_id),
            to_name: value.to_name,
            to_nick_name: value.to_nick_name,
            to_role: value.to_role,
            to_ip: value.to_ip,
        })
    }
}

#[derive(Debug, FromRow)]
struct FriendListRecord {
    f_id: i64,
    user_id: i64,
    friend_id: i64,
    status: String,
    last_chat_id: Option<i64>,
    create_time: i64,
    friend_name: String,
    friend_nick_name: String,
    friend_avatar: String,
    friend_role: String,
    friend_ip: String,
    msg_type: Option<String>,
    last_msg: Option<String>,
    msg_time: Option<i64>,
    unread_count: i64,
}

impl TryFrom<FriendListRecord> for FriendListEntry {
    type Error = RepositoryError;

    fn try_from(value: FriendListRecord) -> Result<Self, Self::Error> {
        Ok(FriendListEntry {
            f_id: FriendshipId(value.f_id),
            user_id: UserId(value.user_id),
            friend_id: UserId(value.friend_id),
            status: parse_status(&value.status)?,
            last_chat_id: value.last_chat_id.map(ChatRecordId),
            create_time: value.create_time,
            friend_name: value.friend_name,
            friend_nick_name: value.friend_nick_name,
            friend_avatar: value.friend_avatar,
            friend_role: value.friend_role,
            friend_ip: value.friend_ip,
            msg_type: value.msg_type,
            last_msg: value.last_msg,
            msg_time: value.msg_time,
            unread_count: value.unread_count,
        })
    }
}

#[derive(Debug, FromRow)]
struct ChatRecord {
    c_id: i64,
    to_id: i64,
    from_id: i64,
    is_read: String,
    kind: String,
    message: String,
    files: String,
    sent_at: i64,
    from_name: String,
    from_nick_name: String,
    to_name: String,
    to_nick_name: String,
}

impl TryFrom<ChatRecord> for ChatRecordView {
    type Error = RepositoryError;

    fn try_from(value: ChatRecord) -> Result<Self, Self::Error> {
        let files = serde_json::from_str(&value.files)
            .map_err(|err| invalid_data(format!("chat record {} files: {err}", value.c_id)))?;

        Ok(ChatRecordView {
            c_id: ChatRecordId(value.c_id),
            to_id: UserId(value.to_id),
            from_id: UserId(value.from_id),
            is_read: value.is_read,
            kind: value.kind,
            message: value.message,
            files,
            time: value.sent_at,
            from_name: value.from_name,
            from_nick_name: value.from_nick_name,
            to_name: value.to_name,
            to_nick_name: value.to_nick_name,
        })
    }
}

#[derive(Debug, FromRow)]
struct SettingRecord {
    name: String,
    app_name: String,
    port: i64,
    token_expiry_time: i64,
    shared_dir: String,
    version: String,
    created_at: DateTime<Utc>,
    modified_at: DateTime<Utc>,
}

impl TryFrom<SettingRecord> for Setting {
    type Error = RepositoryError;

    fn try_from(value: SettingRecord) -> Result<Self, Self::Error> {
        let port = u16::try_from(value.port)
            .map_err(|_| invalid_data(format!("port out of range: {}", value.port)))?;

        Ok(Setting {
            name: value.name,
            app_name: value.app_name,
            port,
            token_expiry_time: value.token_expiry_time,
            shared_dir: value.shared_dir,
            version: value.version,
            created_at: value.created_at,
            modified_at: value.modified_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct SharedFileRecord {
    file_code: String,
    file_name: String,
    path: String,
    is_dir: bool,
    file_size: i64,
}

impl From<SharedFileRecord> for SharedFile {
    fn from(value: SharedFileRecord) -> Self {
        SharedFile {
            file_code: value.file_code,
            file_name: value.file_name,
            path: value.path,
            is_dir: value.is_dir,
            file_size: value.file_size,
        }
    }
}

fn convert_all<R, T>(rows: Vec<R>) -> Result<Vec<T>, RepositoryError>
where
    T: TryFrom<R, Error = RepositoryError>,
{
    rows.into_iter().map(T::try_from).collect()
}

#[derive(Clone)]
pub struct SqliteUserRepository {
    catalog: QueryCatalog,
}

impl SqliteUserRepository {
    pub fn new(catalog: QueryCatalog) -> Self {
        Self { catalog }
    }

    /// 写入保留 id 的账号（如超级管理员），已存在则不做任何修改。
    /// 返回是否新写入。
    pub async fn insert_reserved(
        &self,
        id: UserId,
        name: &str,
        password: &PasswordHash,
        role: UserRole,
        created_at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let outcome = self
            .catalog
            .exec(
                "user.insert_reserved",
                &args![id, name, name, password.as_str(), role.as_str(), created_at],
            )
            .await?;
        Ok(outcome.rows_affected > 0)
    }
}

#[async_trait]
impl UserRepository for SqliteUserRepository {
    async fn create(&self, user: NewUser) -> Result<User, RepositoryError> {
        let outcome = self
            .catalog
            .exec(
                "user.insert",
                &args![
                    user.name.as_str(),
                    user.nick_name.as_str(),
                    user.password.as_str(),
                    user.role.as_str(),
                    user.ip.as_str(),
                    user.created_at
                ],
            )
            .await?;

        self.find_by_id(UserId(outcome.last_insert_id))
            .await?
            .ok_or(RepositoryError::NotFound)
    }

    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
        self.catalog
            .query_one::<UserRecord>("user.by_id", &args![id])
            .await?
            .map(User::try_from)
            .transpose()
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<User>, RepositoryError> {
        self.catalog
            .query_one::<UserRecord>("user.by_name", &args![name])
            .await?
            .map(User::try_from)
            .transpose()
    }

    async fn count_guests_by_ip(&self, ip: &str) -> Result<i64, RepositoryError> {
        let row = self
            .catalog
            .query_one::<CountRecord>("user.count_guests_by_ip", &args![ip])
            .await?;
        Ok(row.map_or(0, |row| row.count))
    }

    async fn list_guests_by_ip(&self, ip: &str) -> Result<Vec<User>, RepositoryError> {
        let rows = self
            .catalog
            .query::<UserRecord>("user.guests_by_ip", &args![ip])
            .await?;
        convert_all(rows)
    }

    async fn update_ip(&self, id: UserId, ip: &str) -> Result<(), RepositoryError> {
        let outcome = self.catalog.exec("user.update_ip", &args![ip, id]).await?;
        if outcome.rows_affected == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn update_profile(
        &self,
        id: UserId,
        update: &ProfileUpdate,
    ) -> Result<User, RepositoryError> {
        let outcome = self
            .catalog
            .exec(
                "user.update_profile",
                &args![update.nick_name.clone(), update.avatar.clone(), id],
            )
            .await?;
        if outcome.rows_affected == 0 {
            return Err(RepositoryError::NotFound);
        }
        self.find_by_id(id).await?.ok_or(RepositoryError::NotFound)
    }

    async fn list_discoverable(&self, viewer: UserId) -> Result<Vec<User>, RepositoryError> {
        let rows = self
            .catalog
            .query::<UserRecord>("user.discoverable", &args![viewer])
            .await?;
        convert_all(rows)
    }

    async fn delete_cascade(&self, id: UserId) -> Result<u64, RepositoryError> {
        self.catalog
            .with_transaction(move |tx: &mut CatalogTx| {
                async move {
                    let chats = tx.exec("user.delete_chat_records", &args![id]).await?;
                    let friendships = tx.exec("user.delete_friendships", &args![id]).await?;
                    let user = tx.exec("user.delete", &args![id]).await?;
                    if user.rows_affected == 0 {
                        return Ok(0);
                    }
                    Ok::<_, RepositoryError>(
                        chats.rows_affected + friendships.rows_affected + user.rows_affected,
                    )
                }
                .boxed()
            })
            .await
    }
}

#[derive(Clone)]
pub struct SqliteFriendshipRepository {
    catalog: QueryCatalog,
}

impl SqliteFriendshipRepository {
    pub fn new(catalog: QueryCatalog) -> Self {
        Self { catalog }
    }
}

async fn read_friendship(tx: &mut CatalogTx, id: FriendshipId) -> Result<Friendship, RepositoryError> {
    tx.query_one::<FriendshipRecord>("friendship.by_id", &args![id.0])
        .await?
        .ok_or(RepositoryError::NotFound)
        .and_then(Friendship::try_from)
}

#[async_trait]
impl FriendshipRepository for SqliteFriendshipRepository {
    async fn pending_requests_for(
        &self,
        user: UserId,
    ) -> Result<Vec<FriendRequestView>, RepositoryError> {
        let rows = self
            .catalog
            .query::<FriendRequestRecord>("friendship.pending_for_user", &args![user])
            .await?;
        convert_all(rows)
    }

    async fn create_request(
        &self,
        from: UserId,
        to: UserId,
        now_ms: i64,
    ) -> Result<FriendRequestView, ApplicationError> {
        self.catalog
            .with_transaction(move |tx: &mut CatalogTx| {
                async move {
                    // 同方向每一轮只允许一条 pending/accept 行
                    let live = tx
                        .query_one::<FriendshipRecord>("friendship.live_between", &args![from, to])
                        .await?;
                    if live.is_some() {
                        return Err(DomainError::FriendshipExists {
                            from: from.0,
                            to: to.0,
                        }
                        .into());
                    }
                    let inserted = tx
                        .exec("friendship.insert_request", &args![from, to, now_ms])
                        .await?;
                    let view = tx
                        .query_one::<FriendRequestRecord>(
                            "friendship.request_by_id",
                            &args![inserted.last_insert_id],
                        )
                        .await?
                        .ok_or(DomainError::UserNotFound)?;
                    Ok::<_, ApplicationError>(FriendRequestView::try_from(view)?)
                }
                .boxed()
            })
            .await
    }

    async fn respond(
        &self,
        id: FriendshipId,
        responder: UserId,
        decision: FriendshipStatus,
        now_ms: i64,
    ) -> Result<Friendship, ApplicationError> {
        self.catalog
            .with_transaction(move |tx: &mut CatalogTx| {
                async move {
                    let request = tx
                        .query_one::<FriendshipRecord>(
                            "friendship.pending_by_id_for_target",
                            &args![id.0, responder],
                        )
                        .await?
                        .ok_or(DomainError::FriendRequestNotFound)?;
                    let request = Friendship::try_from(request)?;

                    if decision == FriendshipStatus::Accept {
                        // 反向行：pending 直接翻转，已 accept 不动，不存在则补一条
                        let reciprocal = tx
                            .query_one::<FriendshipRecord>(
                                "friendship.live_between",
                                &args![request.friend_id, request.user_id],
                            )
                            .await?
                            .map(Friendship::try_from)
                            .transpose()?;
                        match reciprocal {
                            Some(row) if row.status == FriendshipStatus::Accept => {}
                            Some(row) => {
                                tx.exec(
                                    "friendship.update_status",
                                    &args![FriendshipStatus::Accept.as_str(), row.id.0],
                                )
                                .await?;
                            }
                            None => {
                                tx.exec(
                                    "friendship.insert_with_status",
                                    &args![
                                        request.friend_id,
                                        request.user_id,
                                        FriendshipStatus::Accept.as_str(),
                                        now_ms
                                    ],
                                )
                                .await?;
                            }
                        }
                    }

                    tx.exec(
                        "friendship.update_status",
                        &args![decision.as_str(), request.id.0],
                    )
                    .await?;

                    Ok::<_, ApplicationError>(read_friendship(tx, request.id).await?)
                }
                .boxed()
            })
            .await
    }

    async fn list_friends(&self, user: UserId) -> Result<Vec<FriendListEntry>, RepositoryError> {
        let rows = self
            .catalog
            .query::<FriendListRecord>("friendship.friend_list", &args![user])
            .await?;
        convert_all(rows)
    }

    async fn find_between(
        &self,
        from: UserId,
        to: UserId,
    ) -> Result<Vec<Friendship>, RepositoryError> {
        let rows = self
            .catalog
            .query::<FriendshipRecord>("friendship.between", &args![from, to])
            .await?;
        convert_all(rows)
    }
}

#[derive(Clone)]
pub struct SqliteChatRepository {
    catalog: QueryCatalog,
}

impl SqliteChatRepository {
    pub fn new(catalog: QueryCatalog) -> Self {
        Self { catalog }
    }
}

#[async_trait]
impl ChatRepository for SqliteChatRepository {
    async fn send(&self, message: NewChatMessage) -> Result<ChatRecordView, ApplicationError> {
        let files = serde_json::to_string(&message.files)?;
        self.catalog
            .with_transaction(move |tx: &mut CatalogTx| {
                async move {
                    let friendship = tx
                        .query_one::<FriendshipRecord>(
                            "friendship.accepted_between",
                            &args![message.from_id, message.to_id],
                        )
                        .await?;
                    if friendship.is_none() {
                        return Err(ApplicationError::from(DomainError::NotFriends {
                            from: message.from_id.0,
                            to: message.to_id.0,
                        }));
                    }

                    let inserted = tx
                        .exec(
                            "chat.insert",
                            &args![
                                message.to_id,
                                message.from_id,
                                message.kind.as_str(),
                                message.message.as_str(),
                                files,
                                message.sent_at
                            ],
                        )
                        .await?;
                    tx.exec(
                        "friendship.update_last_chat",
                        &args![inserted.last_insert_id, message.from_id, message.to_id],
                    )
                    .await?;

                    let record = tx
                        .query_one::<ChatRecord>("chat.by_id", &args![inserted.last_insert_id])
                        .await?
                        .ok_or(RepositoryError::NotFound)?;
                    Ok::<_, ApplicationError>(ChatRecordView::try_from(record)?)
                }
                .boxed()
            })
            .await
    }

    async fn history(
        &self,
        user: UserId,
        friend: UserId,
        since_ms: i64,
    ) -> Result<Vec<ChatRecordView>, RepositoryError> {
        let rows = self
            .catalog
            .query::<ChatRecord>(
                "chat.history",
                &args![user, friend, since_ms, CHAT_HISTORY_LIMIT],
            )
            .await?;
        convert_all(rows)
    }

    async fn mark_read(&self, reader: UserId, mode: MarkReadMode) -> Result<u64, RepositoryError> {
        let outcome = match mode {
            MarkReadMode::AllFrom(sender) => {
                self.catalog
                    .exec("chat.mark_read_from", &args![sender, reader])
                    .await?
            }
            MarkReadMode::One(id) => {
                self.catalog
                    .exec("chat.mark_read_one", &args![id.0, reader])
                    .await?
            }
        };
        Ok(outcome.rows_affected)
    }
}

#[derive(Clone)]
pub struct SqliteSettingsRepository {
    catalog: QueryCatalog,
}

impl SqliteSettingsRepository {
    pub fn new(catalog: QueryCatalog) -> Self {
        Self { catalog }
    }
}

#[async_trait]
impl SettingsRepository for SqliteSettingsRepository {
    async fn load(&self) -> Result<Option<Setting>, RepositoryError> {
        self.catalog
            .query_one::<SettingRecord>("settings.load", &args![SETTINGS_KEY])
            .await?
            .map(Setting::try_from)
            .transpose()
    }

    async fn insert_default(&self, setting: &Setting) -> Result<Setting, RepositoryError> {
        self.catalog
            .exec(
                "settings.insert_default",
                &args![
                    setting.name.as_str(),
                    setting.app_name.as_str(),
                    i64::from(setting.port),
                    setting.token_expiry_time,
                    setting.shared_dir.as_str(),
                    setting.version.as_str(),
                    setting.created_at,
                    setting.modified_at
                ],
            )
            .await?;
        self.load().await?.ok_or(RepositoryError::NotFound)
    }

    async fn save(&self, setting: &Setting) -> Result<Setting, RepositoryError> {
        let outcome = self
            .catalog
            .exec(
                "settings.update",
                &args![
                    setting.name.as_str(),
                    setting.app_name.as_str(),
                    i64::from(setting.port),
                    setting.token_expiry_time,
                    setting.shared_dir.as_str(),
                    setting.version.as_str(),
                    setting.modified_at
                ],
            )
            .await?;
        if outcome.rows_affected == 0 {
            return Err(RepositoryError::NotFound);
        }
        self.load().await?.ok_or(RepositoryError::NotFound)
    }
}

#[derive(Clone)]
pub struct SqliteSharedFileDirectory {
    catalog: QueryCatalog,
}

impl SqliteSharedFileDirectory {
    pub fn new(catalog: QueryCatalog) -> Self {
        Self { catalog }
    }
}

#[async_trait]
impl SharedFileDirectory for SqliteSharedFileDirectory {
    async fn find_by_code(&self, file_code: &str) -> Result<Option<SharedFile>, RepositoryError> {
        Ok(self
            .catalog
            .query_one::<SharedFileRecord>("shared_file.by_code", &args![file_code])
            .await?
            .map(SharedFile::from))
    }
}
