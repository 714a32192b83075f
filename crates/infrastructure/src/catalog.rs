//! 命名语句目录与事务执行器
//!
//! 所有对存储的访问都通过语句名查到参数化 SQL 再执行，调用方不拼接 SQL。
//! 语句使用 SQLite 的 `?N` 编号占位符，同一个参数可在语句中出现多次。
//!
//! 多步写入使用 [`QueryCatalog::with_transaction`]：闭包成功则提交，返回错误则回滚，
//! 闭包 panic 或超时同样回滚，并分别以 `TransactionPanicked` / `Timeout` 报告。

use std::{any::Any, collections::HashMap, panic::AssertUnwindSafe, time::Duration};

use domain::{RepositoryError, Timestamp, UserId};
use futures::{future::BoxFuture, FutureExt};
use once_cell::sync::Lazy;
use sqlx::{
    query::{Query, QueryAs},
    sqlite::{SqliteArguments, SqliteRow},
    FromRow, Sqlite, SqlitePool, Transaction,
};

pub(crate) fn map_sqlx_err(err: sqlx::Error) -> RepositoryError {
    match &err {
        sqlx::Error::RowNotFound => RepositoryError::NotFound,
        sqlx::Error::Database(db) if db.is_unique_violation() => RepositoryError::Conflict,
        _ => RepositoryError::storage(err.to_string()),
    }
}

/// 语句参数
#[derive(Debug, Clone, PartialEq)]
pub enum SqlArg {
    Int(i64),
    Text(String),
    Null,
}

impl From<i64> for SqlArg {
    fn from(value: i64) -> Self {
        SqlArg::Int(value)
    }
}

impl From<UserId> for SqlArg {
    fn from(value: UserId) -> Self {
        SqlArg::Int(value.0)
    }
}

impl From<&str> for SqlArg {
    fn from(value: &str) -> Self {
        SqlArg::Text(value.to_owned())
    }
}

impl From<String> for SqlArg {
    fn from(value: String) -> Self {
        SqlArg::Text(value)
    }
}

impl From<Timestamp> for SqlArg {
    fn from(value: Timestamp) -> Self {
        SqlArg::Text(value.to_rfc3339())
    }
}

impl<T: Into<SqlArg>> From<Option<T>> for SqlArg {
    fn from(value: Option<T>) -> Self {
        value.map_or(SqlArg::Null, Into::into)
    }
}

/// 构造参数列表：`args![user_id, "pending", now_ms]`
#[macro_export]
macro_rules! args {
    ($($value:expr),* $(,)?) => {
        vec![$($crate::catalog::SqlArg::from($value)),*]
    };
}

/// 写语句的执行结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecOutcome {
    pub rows_affected: u64,
    pub last_insert_id: i64,
}

static STATEMENTS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        // ---- users ----
        (
            "user.by_id",
            "SELECT id, avatar, name, nick_name, pwd, role, ip, created_at FROM users WHERE id = ?1",
        ),
        (
            "user.by_name",
            "SELECT id, avatar, name, nick_name, pwd, role, ip, created_at FROM users WHERE name = ?1",
        ),
        (
            "user.count_guests_by_ip",
            "SELECT COUNT(*) AS count FROM users WHERE ip = ?1 AND role = 'guest'",
        ),
        (
            "user.guests_by_ip",
            "SELECT id, avatar, name, nick_name, pwd, role, ip, created_at FROM users
             WHERE ip = ?1 AND role = 'guest' ORDER BY id",
        ),
        (
            "user.insert",
            "INSERT INTO users (avatar, name, nick_name, pwd, role, ip, created_at)
             VALUES ('', ?1, ?2, ?3, ?4, ?5, ?6)",
        ),
        (
            "user.insert_reserved",
            "INSERT OR IGNORE INTO users (id, avatar, name, nick_name, pwd, role, ip, created_at)
             VALUES (?1, '', ?2, ?3, ?4, ?5, '', ?6)",
        ),
        ("user.update_ip", "UPDATE users SET ip = ?1 WHERE id = ?2"),
        (
            "user.update_profile",
            "UPDATE users SET nick_name = COALESCE(?1, nick_name), avatar = COALESCE(?2, avatar)
             WHERE id = ?3",
        ),
        (
            "user.discoverable",
            "SELECT u.id, u.avatar, u.name, u.nick_name, u.pwd, u.role, u.ip, u.created_at
             FROM users u
             WHERE u.id != ?1 AND u.id > 999
               AND NOT EXISTS (
                   SELECT 1 FROM friendships f
                   WHERE f.status != 'reject'
                     AND ((f.user_id = ?1 AND f.friend_id = u.id)
                       OR (f.user_id = u.id AND f.friend_id = ?1))
               )
             ORDER BY u.id",
        ),
        (
            "user.delete_chat_records",
            "DELETE FROM chat_records WHERE from_id = ?1 OR to_id = ?1",
        ),
        (
            "user.delete_friendships",
            "DELETE FROM friendships WHERE user_id = ?1 OR friend_id = ?1",
        ),
        ("user.delete", "DELETE FROM users WHERE id = ?1"),
        // ---- friendships ----
        (
            "friendship.pending_for_user",
            "SELECT f.f_id, f.user_id, f.friend_id, f.status, f.last_chat_id, f.create_time,
                    u_from.id AS from_id, u_from.name AS from_name, u_from.nick_name AS from_nick_name,
                    u_from.role AS from_role, u_from.ip AS from_ip,
                    u_to.id AS to_id, u_to.name AS to_name, u_to.nick_name AS to_nick_name,
                    u_to.role AS to_role, u_to.ip AS to_ip
             FROM friendships f
             INNER JOIN users u_from ON f.user_id = u_from.id
             INNER JOIN users u_to ON f.friend_id = u_to.id
             WHERE f.status = 'pending' AND f.friend_id = ?1
             ORDER BY f.create_time DESC, f.f_id DESC",
        ),
        (
            "friendship.request_by_id",
            "SELECT f.f_id, f.user_id, f.friend_id, f.status, f.last_chat_id, f.create_time,
                    u_from.id AS from_id, u_from.name AS from_name, u_from.nick_name AS from_nick_name,
                    u_from.role AS from_role, u_from.ip AS from_ip,
                    u_to.id AS to_id, u_to.name AS to_name, u_to.nick_name AS to_nick_name,
                    u_to.role AS to_role, u_to.ip AS to_ip
             FROM friendships f
             INNER JOIN users u_from ON f.user_id = u_from.id
             INNER JOIN users u_to ON f.friend_id = u_to.id
             WHERE f.f_id = ?1",
        ),
        (
            "friendship.insert_request",
            "INSERT INTO friendships (user_id, friend_id, status, create_time)
             VALUES (?1, ?2, 'pending', ?3)",
        ),
        (
            "friendship.pending_by_id_for_target",
            "SELECT f_id, user_id, friend_id, status, last_chat_id, create_time FROM friendships
             WHERE f_id = ?1 AND friend_id = ?2 AND status = 'pending'",
        ),
        (
            "friendship.live_between",
            "SELECT f_id, user_id, friend_id, status, last_chat_id, create_time FROM friendships
             WHERE user_id = ?1 AND friend_id = ?2 AND status IN ('pending', 'accept')
             ORDER BY f_id DESC LIMIT 1",
        ),
        (
            "friendship.insert_with_status",
            "INSERT INTO friendships (user_id, friend_id, status, create_time)
             VALUES (?1, ?2, ?3, ?4)",
        ),
        (
            "friendship.update_status",
            "UPDATE friendships SET status = ?1 WHERE f_id = ?2",
        ),
        (
            "friendship.by_id",
            "SELECT f_id, user_id, friend_id, status, last_chat_id, create_time FROM friendships
             WHERE f_id = ?1",
        ),
        (
            "friendship.between",
            "SELECT f_id, user_id, friend_id, status, last_chat_id, create_time FROM friendships
             WHERE user_id = ?1 AND friend_id = ?2 ORDER BY f_id",
        ),
        (
            "friendship.accepted_between",
            "SELECT f_id, user_id, friend_id, status, last_chat_id, create_time FROM friendships
             WHERE user_id = ?1 AND friend_id = ?2 AND status = 'accept' LIMIT 1",
        ),
        (
            "friendship.friend_list",
            "SELECT f.f_id, f.user_id, f.friend_id, f.status, f.last_chat_id, f.create_time,
                    u.name AS friend_name, u.nick_name AS friend_nick_name, u.avatar AS friend_avatar,
                    u.role AS friend_role, u.ip AS friend_ip,
                    c.kind AS msg_type, c.message AS last_msg, c.sent_at AS msg_time,
                    (SELECT COUNT(*) FROM chat_records cr
                     WHERE cr.from_id = f.friend_id AND cr.to_id = f.user_id AND cr.is_read = 'n'
                    ) AS unread_count
             FROM friendships f
             INNER JOIN users u ON f.friend_id = u.id
             LEFT JOIN chat_records c ON c.c_id = f.last_chat_id
             WHERE f.status = 'accept' AND f.user_id = ?1
             ORDER BY COALESCE(c.sent_at, f.create_time) DESC, f.f_id DESC",
        ),
        (
            "friendship.update_last_chat",
            "UPDATE friendships SET last_chat_id = ?1
             WHERE status = 'accept'
               AND ((user_id = ?2 AND friend_id = ?3) OR (user_id = ?3 AND friend_id = ?2))",
        ),
        // ---- chat records ----
        (
            "chat.insert",
            "INSERT INTO chat_records (to_id, from_id, is_read, kind, message, files, sent_at)
             VALUES (?1, ?2, 'n', ?3, ?4, ?5, ?6)",
        ),
        (
            "chat.by_id",
            "SELECT c.c_id, c.to_id, c.from_id, c.is_read, c.kind, c.message, c.files, c.sent_at,
                    u_from.name AS from_name, u_from.nick_name AS from_nick_name,
                    u_to.name AS to_name, u_to.nick_name AS to_nick_name
             FROM chat_records c
             INNER JOIN users u_from ON c.from_id = u_from.id
             INNER JOIN users u_to ON c.to_id = u_to.id
             WHERE c.c_id = ?1",
        ),
        (
            "chat.history",
            "SELECT c.c_id, c.to_id, c.from_id, c.is_read, c.kind, c.message, c.files, c.sent_at,
                    u_from.name AS from_name, u_from.nick_name AS from_nick_name,
                    u_to.name AS to_name, u_to.nick_name AS to_nick_name
             FROM chat_records c
             INNER JOIN users u_from ON c.from_id = u_from.id
             INNER JOIN users u_to ON c.to_id = u_to.id
             WHERE ((c.from_id = ?1 AND c.to_id = ?2) OR (c.from_id = ?2 AND c.to_id = ?1))
               AND (
                   c.c_id IN (
                       SELECT c_id FROM chat_records
                       WHERE (from_id = ?1 AND to_id = ?2) OR (from_id = ?2 AND to_id = ?1)
                       ORDER BY sent_at DESC, c_id DESC
                       LIMIT ?4
                   )
                   OR c.sent_at >= ?3
               )
             ORDER BY c.sent_at ASC, c.c_id ASC",
        ),
        (
            "chat.mark_read_from",
            "UPDATE chat_records SET is_read = 'y' WHERE from_id = ?1 AND to_id = ?2 AND is_read = 'n'",
        ),
        (
            "chat.mark_read_one",
            "UPDATE chat_records SET is_read = 'y' WHERE c_id = ?1 AND to_id = ?2",
        ),
        // ---- settings ----
        (
            "settings.load",
            "SELECT name, app_name, port, token_expiry_time, shared_dir, version, created_at, modified_at
             FROM settings WHERE name = ?1",
        ),
        (
            "settings.insert_default",
            "INSERT OR IGNORE INTO settings
                (name, app_name, port, token_expiry_time, shared_dir, version, created_at, modified_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        ),
        (
            "settings.update",
            "UPDATE settings
             SET app_name = ?2, port = ?3, token_expiry_time = ?4, shared_dir = ?5, version = ?6,
                 modified_at = ?7
             WHERE name = ?1",
        ),
        // ---- shared directory ----
        (
            "shared_file.by_code",
            "SELECT file_code, file_name, path, is_dir, file_size FROM shared_files WHERE file_code = ?1",
        ),
    ])
});

fn statement(name: &str) -> Result<&'static str, RepositoryError> {
    STATEMENTS
        .get(name)
        .copied()
        .ok_or_else(|| RepositoryError::unknown_statement(name))
}

fn bind_query_as<'q, O>(
    mut query: QueryAs<'q, Sqlite, O, SqliteArguments<'q>>,
    args: &[SqlArg],
) -> QueryAs<'q, Sqlite, O, SqliteArguments<'q>> {
    for arg in args {
        query = match arg {
            SqlArg::Int(value) => query.bind(*value),
            SqlArg::Text(value) => query.bind(value.clone()),
            SqlArg::Null => query.bind(None::<i64>),
        };
    }
    query
}

fn bind_query<'q>(
    mut query: Query<'q, Sqlite, SqliteArguments<'q>>,
    args: &[SqlArg],
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    for arg in args {
        query = match arg {
            SqlArg::Int(value) => query.bind(*value),
            SqlArg::Text(value) => query.bind(value.clone()),
            SqlArg::Null => query.bind(None::<i64>),
        };
    }
    query
}

fn outcome(result: sqlx::sqlite::SqliteQueryResult) -> ExecOutcome {
    ExecOutcome {
        rows_affected: result.rows_affected(),
        last_insert_id: result.last_insert_rowid(),
    }
}

/// 独立执行模式：每条语句直接在连接池上执行
#[derive(Clone)]
pub struct QueryCatalog {
    pool: SqlitePool,
    transaction_timeout: Duration,
}

impl QueryCatalog {
    pub fn new(pool: SqlitePool, transaction_timeout: Duration) -> Self {
        Self {
            pool,
            transaction_timeout,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn contains(name: &str) -> bool {
        STATEMENTS.contains_key(name)
    }

    pub async fn query<T>(&self, name: &str, args: &[SqlArg]) -> Result<Vec<T>, RepositoryError>
    where
        T: for<'r> FromRow<'r, SqliteRow> + Send + Unpin,
    {
        let sql = statement(name)?;
        bind_query_as(sqlx::query_as::<Sqlite, T>(sql), args)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_err)
    }

    pub async fn query_one<T>(&self, name: &str, args: &[SqlArg]) -> Result<Option<T>, RepositoryError>
    where
        T: for<'r> FromRow<'r, SqliteRow> + Send + Unpin,
    {
        let sql = statement(name)?;
        bind_query_as(sqlx::query_as::<Sqlite, T>(sql), args)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_err)
    }

    pub async fn exec(&self, name: &str, args: &[SqlArg]) -> Result<ExecOutcome, RepositoryError> {
        let sql = statement(name)?;
        bind_query(sqlx::query(sql), args)
            .execute(&self.pool)
            .await
            .map(outcome)
            .map_err(map_sqlx_err)
    }

    /// 在一个事务中执行 `work`。
    ///
    /// 调用方写法：`catalog.with_transaction(|tx| async move { ... }.boxed())`，
    /// 闭包只能捕获自有数据。
    pub async fn with_transaction<T, E, F>(&self, work: F) -> Result<T, E>
    where
        T: Send,
        E: From<RepositoryError> + Send,
        F: for<'t> FnOnce(&'t mut CatalogTx) -> BoxFuture<'t, Result<T, E>> + Send,
    {
        let tx = self.pool.begin().await.map_err(map_sqlx_err)?;
        let mut scope = CatalogTx { tx };

        let result = tokio::time::timeout(
            self.transaction_timeout,
            AssertUnwindSafe(work(&mut scope)).catch_unwind(),
        )
        .await;

        match result {
            Ok(Ok(Ok(value))) => {
                scope.tx.commit().await.map_err(map_sqlx_err)?;
                Ok(value)
            }
            Ok(Ok(Err(err))) => {
                scope.rollback("work returned an error").await;
                Err(err)
            }
            Ok(Err(panic)) => {
                let message = panic_message(panic.as_ref());
                tracing::error!(panic = %message, "事务执行中发生致命错误，已回滚");
                scope.rollback("work panicked").await;
                Err(RepositoryError::TransactionPanicked { message }.into())
            }
            Err(_) => {
                tracing::error!(timeout = ?self.transaction_timeout, "事务超时，已回滚");
                scope.rollback("timed out").await;
                Err(RepositoryError::Timeout.into())
            }
        }
    }
}

/// 事务执行模式：与 [`QueryCatalog`] 相同的接口，但都在同一个事务上执行
pub struct CatalogTx {
    tx: Transaction<'static, Sqlite>,
}

impl CatalogTx {
    pub async fn query<T>(&mut self, name: &str, args: &[SqlArg]) -> Result<Vec<T>, RepositoryError>
    where
        T: for<'r> FromRow<'r, SqliteRow> + Send + Unpin,
    {
        let sql = statement(name)?;
        bind_query_as(sqlx::query_as::<Sqlite, T>(sql), args)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(map_sqlx_err)
    }

    pub async fn query_one<T>(
        &mut self,
        name: &str,
        args: &[SqlArg],
    ) -> Result<Option<T>, RepositoryError>
    where
        T: for<'r> FromRow<'r, SqliteRow> + Send + Unpin,
    {
        let sql = statement(name)?;
        bind_query_as(sqlx::query_as::<Sqlite, T>(sql), args)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(map_sqlx_err)
    }

    pub async fn exec(&mut self, name: &str, args: &[SqlArg]) -> Result<ExecOutcome, RepositoryError> {
        let sql = statement(name)?;
        bind_query(sqlx::query(sql), args)
            .execute(&mut *self.tx)
            .await
            .map(outcome)
            .map_err(map_sqlx_err)
    }

    async fn rollback(self, reason: &str) {
        if let Err(err) = self.tx.rollback().await {
            tracing::error!(error = %err, reason, "事务回滚失败");
        } else {
            tracing::debug!(reason, "事务已回滚");
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_owned()
    }
}
