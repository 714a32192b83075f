//! 局域网宿主进程入口
//!
//! 加载配置，准备 SQLite 与种子数据，组装服务与 Hub 后启动 HTTP/WebSocket 服务。

use std::{net::SocketAddr, sync::Arc};

use application::{
    Clock, DeviceSampler, Hub, HubOptions, PasswordHasher, SettingsService,
    SettingsServiceDependencies, SocialService, SocialServiceDependencies, SystemClock,
    UserRepository, UserService, UserServiceDependencies,
};
use config::AppConfig;
use domain::TokenService;
use infrastructure::{
    create_sqlite_pool, run_migrations, seed_super_admin, BcryptPasswordHasher, QueryCatalog,
    SqliteChatRepository, SqliteFriendshipRepository, SqliteSettingsRepository,
    SqliteSharedFileDirectory, SqliteUserRepository, SysinfoSampler,
};
use tracing_subscriber::EnvFilter;
use web_api::{router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load()?;

    // RUST_LOG 优先，否则使用配置中的级别
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log.level)),
        )
        .init();

    tracing::info!(database = %config.database.url, "打开数据库");
    let pool = create_sqlite_pool(&config.database.url, config.database.max_connections).await?;
    run_migrations(&pool).await?;
    let catalog = QueryCatalog::new(pool, config.transaction.timeout());

    let password_hasher: Arc<dyn PasswordHasher> =
        Arc::new(BcryptPasswordHasher::new(config.server.bcrypt_cost));
    if seed_super_admin(&catalog, password_hasher.as_ref()).await? {
        tracing::info!("已创建内置超级管理员");
    }

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let token_service = Arc::new(TokenService::new(
        &config.token.secret,
        &config.token.obfuscation_key,
        config.token.issuer.clone(),
    ));

    let sampler: Arc<dyn DeviceSampler> =
        Arc::new(SysinfoSampler::new(config.hub.telemetry_sample_gap()));
    let hub = Hub::spawn(HubOptions::try_from(&config.hub)?, Some(sampler));

    let default_shared_dir = std::env::current_dir()?.join("shared");
    let settings_service = Arc::new(SettingsService::new(SettingsServiceDependencies {
        settings_repository: Arc::new(SqliteSettingsRepository::new(catalog.clone())),
        clock: clock.clone(),
        default_shared_dir: default_shared_dir.to_string_lossy().into_owned(),
    }));

    let user_repository: Arc<dyn UserRepository> =
        Arc::new(SqliteUserRepository::new(catalog.clone()));
    let user_service = Arc::new(UserService::new(UserServiceDependencies {
        user_repository: user_repository.clone(),
        settings_service: settings_service.clone(),
        password_hasher,
        token_service,
        clock: clock.clone(),
        app_token_validity_hours: config.token.app_validity_hours,
    }));
    let social_service = Arc::new(SocialService::new(SocialServiceDependencies {
        user_repository,
        friendship_repository: Arc::new(SqliteFriendshipRepository::new(catalog.clone())),
        chat_repository: Arc::new(SqliteChatRepository::new(catalog.clone())),
        hub: hub.clone(),
        clock,
    }));

    let state = AppState::new(
        user_service,
        social_service,
        settings_service,
        Arc::new(SqliteSharedFileDirectory::new(catalog)),
        hub.clone(),
        config.session.clone(),
    );

    let addr = config.listen_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "LanDrop 宿主服务已启动");

    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    hub.shutdown();
    tracing::info!("服务已停止");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "无法监听退出信号");
        std::future::pending::<()>().await;
    }
    tracing::info!("收到退出信号，正在关闭");
}
