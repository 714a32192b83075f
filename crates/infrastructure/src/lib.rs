//! 基础设施层实现。
//!
//! 提供 SQLite 命名语句目录与事务执行器、仓储、密码哈希、设备采样等适配器，
//! 实现应用层定义的端口。

pub mod catalog;
pub mod db;
pub mod password;
pub mod repository;
pub mod telemetry;

pub use catalog::{CatalogTx, ExecOutcome, QueryCatalog, SqlArg};
pub use db::{create_sqlite_pool, run_migrations, seed_super_admin, MIGRATOR};
pub use password::BcryptPasswordHasher;
pub use repository::{
    SqliteChatRepository, SqliteFriendshipRepository, SqliteSettingsRepository,
    SqliteSharedFileDirectory, SqliteUserRepository,
};
pub use telemetry::SysinfoSampler;
