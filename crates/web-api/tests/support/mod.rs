#![allow(dead_code)]

use std::{net::SocketAddr, sync::Arc, time::Duration};

use application::{
    Clock, Hub, HubOptions, PasswordHasher, SettingsService, SettingsServiceDependencies,
    SocialService, SocialServiceDependencies, SystemClock, UserRepository, UserService,
    UserServiceDependencies,
};
use config::SessionConfig;
use domain::{TokenService, UserId, UserRole};
use futures_util::{SinkExt, StreamExt};
use infrastructure::{
    create_sqlite_pool, run_migrations, seed_super_admin, BcryptPasswordHasher, QueryCatalog,
    SqliteChatRepository, SqliteFriendshipRepository, SqliteSettingsRepository,
    SqliteSharedFileDirectory, SqliteUserRepository,
};
use serde_json::Value;
use tokio::{net::TcpListener, net::TcpStream, sync::oneshot, time::timeout};
use tokio_tungstenite::{
    connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};
use web_api::{router, AppState};

pub type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub const TEST_SECRET: &str = "test-secret-key";
pub const TEST_OBFUSCATION: &str = "xmn30241yv413y5b01vy";
pub const TEST_ISSUER: &str = "landrop_client";

pub struct TestApp {
    pub addr: SocketAddr,
    pub state: AppState,
    pub catalog: QueryCatalog,
    pub tokens: Arc<TokenService>,
    shutdown: Option<oneshot::Sender<()>>,
}

/// 一个已注册并持有令牌的访客
#[derive(Debug, Clone)]
pub struct Guest {
    pub id: i64,
    pub name: String,
    pub token: String,
}

impl TestApp {
    pub fn http(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn ws_url(&self, token: &str, id: i64, name: &str) -> String {
        format!("ws://{}/ws?ldToken={}&id={}&name={}", self.addr, token, id, name)
    }

    /// 直接通过应用层服务注册访客并签发令牌
    pub async fn guest(&self, nick_name: &str, ip: &str) -> Guest {
        let profile = self
            .state
            .user_service
            .register_guest(nick_name, ip)
            .await
            .expect("register guest");
        let issued = self
            .state
            .user_service
            .issue_guest_token(profile.id, &profile.name)
            .await
            .expect("issue token");
        Guest {
            id: profile.id.0,
            name: profile.name,
            token: issued.token,
        }
    }

    pub fn token_for(&self, guest: &Guest, validity_hours: i64) -> String {
        self.tokens
            .issue(UserRole::Guest, UserId(guest.id), &guest.name, validity_hours)
            .expect("issue token")
    }

    /// 建立会话并读掉欢迎消息
    pub async fn connect(&self, guest: &Guest) -> Ws {
        let mut ws = self.connect_raw(&guest.token, guest.id, &guest.name).await;
        let welcome = next_json(&mut ws).await;
        assert_eq!(welcome["type"], "welcome");
        ws
    }

    pub async fn connect_raw(&self, token: &str, id: i64, name: &str) -> Ws {
        let (ws, _) = connect_async(self.ws_url(token, id, name))
            .await
            .expect("ws connect");
        ws
    }

    /// 等待 Hub 中的在线会话数达到期望值
    pub async fn wait_for_sessions(&self, expected: usize) {
        for _ in 0..100 {
            if self.state.hub.active_count().await == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!(
            "expected {expected} sessions, found {}",
            self.state.hub.active_count().await
        );
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        self.state.hub.shutdown();
    }
}

pub async fn spawn_app() -> TestApp {
    spawn_app_with(SessionConfig::default()).await
}

pub async fn spawn_app_with(session: SessionConfig) -> TestApp {
    let pool = create_sqlite_pool("sqlite::memory:", 1).await.expect("pool");
    run_migrations(&pool).await.expect("migrations");
    let catalog = QueryCatalog::new(pool, Duration::from_secs(5));

    let password_hasher: Arc<dyn PasswordHasher> = Arc::new(BcryptPasswordHasher::new(Some(4)));
    seed_super_admin(&catalog, password_hasher.as_ref())
        .await
        .expect("seed super admin");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let tokens = Arc::new(TokenService::new(TEST_SECRET, TEST_OBFUSCATION, TEST_ISSUER));
    let hub = Hub::spawn(HubOptions::default(), None);

    let user_repository: Arc<dyn UserRepository> =
        Arc::new(SqliteUserRepository::new(catalog.clone()));
    let settings_service = Arc::new(SettingsService::new(SettingsServiceDependencies {
        settings_repository: Arc::new(SqliteSettingsRepository::new(catalog.clone())),
        clock: clock.clone(),
        default_shared_dir: "/srv/landrop/shared".into(),
    }));
    let user_service = Arc::new(UserService::new(UserServiceDependencies {
        user_repository: user_repository.clone(),
        settings_service: settings_service.clone(),
        password_hasher,
        token_service: tokens.clone(),
        clock: clock.clone(),
        app_token_validity_hours: 24 * 365,
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
        Arc::new(SqliteSharedFileDirectory::new(catalog.clone())),
        hub,
        session,
    );

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let app = router(state.clone());

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        })
        .await
        .ok();
    });

    TestApp {
        addr,
        state,
        catalog,
        tokens,
        shutdown: Some(shutdown_tx),
    }
}

/// 读取下一条文本消息，跳过心跳帧
pub async fn next_json(ws: &mut Ws) -> Value {
    loop {
        let frame = timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("message within timeout")
            .expect("stream open")
            .expect("valid frame");
        match frame {
            Message::Text(text) => return serde_json::from_str(text.as_str()).expect("json"),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

/// 读取直到出现指定类型的消息
pub async fn next_of_type(ws: &mut Ws, kind: &str) -> Value {
    loop {
        let value = next_json(ws).await;
        if value["type"] == kind {
            return value;
        }
    }
}

pub async fn send_json(ws: &mut Ws, value: Value) {
    ws.send(Message::text(value.to_string()))
        .await
        .expect("ws send");
}

/// 在给定时间内没有收到任何文本消息
pub async fn assert_silent(ws: &mut Ws, within: Duration) {
    let deadline = tokio::time::Instant::now() + within;
    loop {
        match tokio::time::timeout_at(deadline, ws.next()).await {
            Err(_) => return,
            Ok(Some(Ok(Message::Ping(_) | Message::Pong(_)))) => continue,
            Ok(other) => panic!("expected silence, got {other:?}"),
        }
    }
}
