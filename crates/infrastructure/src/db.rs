//! 连接池、迁移与启动时的种子数据

use std::str::FromStr;

use application::{ApplicationError, PasswordHasher};
use chrono::Utc;
use domain::{UserId, UserRole};
use sqlx::{
    migrate::{MigrateError, Migrator},
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};

use crate::catalog::QueryCatalog;
use crate::repository::SqliteUserRepository;

pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

pub const SUPER_ADMIN_NAME: &str = "admin";
pub const SUPER_ADMIN_PASSWORD: &str = "admin@123";

/// 创建 SQLite 连接池。
///
/// 内存库每个连接都是独立的数据库，所以必须让唯一的连接常驻。
pub async fn create_sqlite_pool(url: &str, max_connections: u32) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(url)?
        .create_if_missing(true)
        .foreign_keys(true);

    let mut pool = SqlitePoolOptions::new().max_connections(max_connections);
    if url.contains(":memory:") {
        pool = pool
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None);
    }
    pool.connect_with(options).await
}

pub async fn run_migrations(pool: &SqlitePool) -> Result<(), MigrateError> {
    MIGRATOR.run(pool).await
}

/// 写入 id 为 999 的超级管理员；已存在时保持原样。返回是否新建。
pub async fn seed_super_admin(
    catalog: &QueryCatalog,
    hasher: &dyn PasswordHasher,
) -> Result<bool, ApplicationError> {
    let users = SqliteUserRepository::new(catalog.clone());
    let password = hasher.hash(SUPER_ADMIN_PASSWORD).await?;
    let created = users
        .insert_reserved(
            UserId::SUPER_ADMIN,
            SUPER_ADMIN_NAME,
            &password,
            UserRole::SuperAdmin,
            Utc::now(),
        )
        .await?;

    if created {
        tracing::info!(user_id = %UserId::SUPER_ADMIN, "已创建超级管理员账号");
    }
    Ok(created)
}
