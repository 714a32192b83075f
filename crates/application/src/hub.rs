//! 连接注册中心（Hub）
//!
//! Hub 是在线会话集合的唯一写入者：注册、注销、广播三类命令经由同一个控制循环，
//! 按到达顺序处理。处理器只能通过 [`Hub`] 上的只读访问器在读锁下查询会话，
//! 并通过会话邮箱做非阻塞投递；邮箱已满的会话会被注销，而不是拖慢其他会话。

use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, AtomicI64, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use domain::{DomainError, SessionKey, UserId, UserRole};
use serde_json::json;
use thiserror::Error;
use tokio::sync::{
    mpsc::{self, error::TrySendError},
    oneshot, RwLock,
};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::envelope::{OutboundEnvelope, Payload, DEVICE_REAL_TIME_INFO, WELCOME};
use crate::telemetry::DeviceSampler;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HubError {
    #[error("hub is shut down")]
    Closed,
}

/// 单次投递失败的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryError {
    /// 邮箱已满，会话将被注销
    Full,
    /// 邮箱已关闭
    Closed,
}

/// 会话的认证身份
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionIdentity {
    pub user_id: UserId,
    pub name: String,
    pub role: UserRole,
    /// 令牌过期时间（秒级时间戳）
    pub token_expires_at: i64,
}

impl SessionIdentity {
    pub fn token_expired_at(&self, now: domain::Timestamp) -> bool {
        self.token_expires_at <= now.timestamp()
    }
}

/// Hub 视角下的一个会话。
///
/// 邮箱发送端放在 `Option` 里，关闭时 `take()`，保证只关闭一次。
pub struct SessionHandle {
    key: SessionKey,
    connection_id: Uuid,
    identity: SessionIdentity,
    mailbox: Mutex<Option<mpsc::Sender<Payload>>>,
    cancel: CancellationToken,
    active: AtomicBool,
    last_seen_ms: AtomicI64,
}

impl SessionHandle {
    pub fn new(
        identity: SessionIdentity,
        mailbox_capacity: usize,
    ) -> (Arc<Self>, mpsc::Receiver<Payload>) {
        let (sender, receiver) = mpsc::channel(mailbox_capacity.max(1));
        let handle = Arc::new(Self {
            key: SessionKey::new(&identity.name, identity.user_id),
            connection_id: Uuid::new_v4(),
            identity,
            mailbox: Mutex::new(Some(sender)),
            cancel: CancellationToken::new(),
            active: AtomicBool::new(false),
            last_seen_ms: AtomicI64::new(now_ms()),
        });
        (handle, receiver)
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    pub fn connection_id(&self) -> Uuid {
        self.connection_id
    }

    pub fn identity(&self) -> &SessionIdentity {
        &self.identity
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// 刷新最近心跳时间
    pub fn touch(&self) {
        self.last_seen_ms.store(now_ms(), Ordering::Release);
    }

    pub fn last_seen_ms(&self) -> i64 {
        self.last_seen_ms.load(Ordering::Acquire)
    }

    /// 会话作用域，两个泵都监听它
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn try_deliver(&self, payload: Payload) -> Result<(), DeliveryError> {
        let guard = self.mailbox.lock().map_err(|_| DeliveryError::Closed)?;
        let sender = guard.as_ref().ok_or(DeliveryError::Closed)?;
        sender.try_send(payload).map_err(|err| match err {
            TrySendError::Full(_) => DeliveryError::Full,
            TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }

    fn activate(&self) {
        self.active.store(true, Ordering::Release);
        self.touch();
    }

    /// 关闭邮箱并取消会话作用域；只有第一次调用返回 true
    fn close(&self) -> bool {
        let sender = match self.mailbox.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        self.active.store(false, Ordering::Release);
        self.cancel.cancel();
        sender.is_some()
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("key", &self.key)
            .field("connection_id", &self.connection_id)
            .field("active", &self.is_active())
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct HubOptions {
    pub telemetry_interval: Duration,
    /// 为 `None` 时遥测推送给全部会话
    pub telemetry_role: Option<UserRole>,
}

impl Default for HubOptions {
    fn default() -> Self {
        Self {
            telemetry_interval: Duration::from_secs(3),
            telemetry_role: None,
        }
    }
}

impl TryFrom<&config::HubConfig> for HubOptions {
    type Error = DomainError;

    fn try_from(value: &config::HubConfig) -> Result<Self, Self::Error> {
        let telemetry_role = value
            .telemetry_role
            .as_deref()
            .map(str::parse::<UserRole>)
            .transpose()?;
        Ok(Self {
            telemetry_interval: value.telemetry_interval(),
            telemetry_role,
        })
    }
}

enum HubCommand {
    Register {
        session: Arc<SessionHandle>,
        ack: oneshot::Sender<()>,
    },
    Unregister {
        key: SessionKey,
        connection_id: Uuid,
        ack: Option<oneshot::Sender<bool>>,
    },
    Broadcast {
        payload: Payload,
        role: Option<UserRole>,
    },
}

type Registry = RwLock<HashMap<SessionKey, Arc<SessionHandle>>>;

/// Hub 句柄，可廉价克隆并注入到连接入口与处理器表
#[derive(Clone)]
pub struct Hub {
    sessions: Arc<Registry>,
    commands: mpsc::UnboundedSender<HubCommand>,
    shutdown: CancellationToken,
}

impl Hub {
    /// 启动控制循环；提供采样器时同时启动遥测定时器
    pub fn spawn(options: HubOptions, sampler: Option<Arc<dyn DeviceSampler>>) -> Self {
        let (commands, receiver) = mpsc::unbounded_channel();
        let hub = Self {
            sessions: Arc::default(),
            commands,
            shutdown: CancellationToken::new(),
        };

        let control = ControlLoop {
            sessions: hub.sessions.clone(),
            shutdown: hub.shutdown.clone(),
        };
        tokio::spawn(control.run(receiver));

        if let Some(sampler) = sampler {
            tokio::spawn(telemetry_loop(hub.clone(), sampler, options));
        }
        hub
    }

    /// 注册会话，控制循环处理完毕（包括发送欢迎消息）后返回
    pub async fn register(&self, session: Arc<SessionHandle>) -> Result<(), HubError> {
        let (ack, done) = oneshot::channel();
        self.commands
            .send(HubCommand::Register { session, ack })
            .map_err(|_| HubError::Closed)?;
        done.await.map_err(|_| HubError::Closed)
    }

    /// 注销会话，可重复调用。返回本次是否真正移除了会话。
    pub async fn unregister(&self, session: &SessionHandle) -> bool {
        let (ack, done) = oneshot::channel();
        let command = HubCommand::Unregister {
            key: session.key().clone(),
            connection_id: session.connection_id(),
            ack: Some(ack),
        };
        if self.commands.send(command).is_err() {
            session.close();
            return false;
        }
        match done.await {
            Ok(removed) => removed,
            Err(_) => {
                session.close();
                false
            }
        }
    }

    /// 广播到全部在线会话，可按角色过滤；不等待投递完成
    pub fn broadcast(&self, payload: Payload, role: Option<UserRole>) -> Result<(), HubError> {
        self.commands
            .send(HubCommand::Broadcast { payload, role })
            .map_err(|_| HubError::Closed)
    }

    pub async fn active_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn lookup(&self, key: &SessionKey) -> Option<Arc<SessionHandle>> {
        self.sessions.read().await.get(key).cloned()
    }

    /// 当前在线会话键的快照
    pub async fn active_keys(&self) -> HashSet<SessionKey> {
        self.sessions
            .read()
            .await
            .values()
            .filter(|session| session.is_active())
            .map(|session| session.key().clone())
            .collect()
    }

    /// 向指定键的会话投递；目标不在线返回 false
    pub async fn send_to(&self, key: &SessionKey, payload: Payload) -> bool {
        match self.lookup(key).await {
            Some(session) => self.deliver(&session, payload),
            None => false,
        }
    }

    /// 非阻塞投递；邮箱已满时安排注销该会话
    pub fn deliver(&self, session: &SessionHandle, payload: Payload) -> bool {
        match session.try_deliver(payload) {
            Ok(()) => true,
            Err(DeliveryError::Full) => {
                tracing::warn!(session = %session.key(), "会话邮箱已满，安排注销");
                let command = HubCommand::Unregister {
                    key: session.key().clone(),
                    connection_id: session.connection_id(),
                    ack: None,
                };
                if self.shutdown.is_cancelled() || self.commands.send(command).is_err() {
                    // 控制循环已停止，直接关闭
                    session.close();
                }
                false
            }
            Err(DeliveryError::Closed) => false,
        }
    }

    /// 停止控制循环与遥测定时器，不强制断开已有会话
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

struct ControlLoop {
    sessions: Arc<Registry>,
    shutdown: CancellationToken,
}

impl ControlLoop {
    async fn run(self, mut commands: mpsc::UnboundedReceiver<HubCommand>) {
        loop {
            let command = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                command = commands.recv() => match command {
                    Some(command) => command,
                    None => break,
                },
            };

            match command {
                HubCommand::Register { session, ack } => {
                    self.register(session).await;
                    let _ = ack.send(());
                }
                HubCommand::Unregister {
                    key,
                    connection_id,
                    ack,
                } => {
                    let removed = self.unregister(&key, connection_id).await;
                    if let Some(ack) = ack {
                        let _ = ack.send(removed);
                    }
                }
                HubCommand::Broadcast { payload, role } => self.broadcast(payload, role).await,
            }
        }
        tracing::info!("Hub 控制循环已停止");
    }

    async fn register(&self, session: Arc<SessionHandle>) {
        session.activate();
        let (previous, active) = {
            let mut sessions = self.sessions.write().await;
            let previous = sessions.insert(session.key().clone(), session.clone());
            (previous, sessions.len())
        };

        if let Some(previous) = previous {
            if previous.connection_id() != session.connection_id() {
                previous.close();
                tracing::info!(session = %session.key(), "同一身份重复连接，旧会话已被替换");
            }
        }
        tracing::info!(session = %session.key(), active, "客户端已连接");

        let identity = session.identity();
        let welcome = OutboundEnvelope::push(
            WELCOME,
            &json!({
                "clientID": session.key(),
                "id": identity.user_id,
                "name": identity.name,
            }),
        )
        .and_then(|envelope| envelope.encode());

        match welcome {
            Ok(payload) => {
                if session.try_deliver(payload).is_err() {
                    tracing::warn!(session = %session.key(), "欢迎消息投递失败");
                    self.unregister(session.key(), session.connection_id()).await;
                }
            }
            Err(err) => tracing::warn!(error = %err, "failed to encode welcome envelope"),
        }
    }

    async fn unregister(&self, key: &SessionKey, connection_id: Uuid) -> bool {
        let removed = {
            let mut sessions = self.sessions.write().await;
            match sessions.get(key) {
                Some(current) if current.connection_id() == connection_id => {
                    sessions.remove(key).map(|session| (session, sessions.len()))
                }
                _ => None,
            }
        };

        match removed {
            Some((session, active)) => {
                session.close();
                tracing::info!(session = %key, active, "客户端已断开");
                true
            }
            None => {
                tracing::debug!(session = %key, "注销客户端失败: 客户端不在连接列表中");
                false
            }
        }
    }

    async fn broadcast(&self, payload: Payload, role: Option<UserRole>) {
        let targets: Vec<Arc<SessionHandle>> = {
            let sessions = self.sessions.read().await;
            sessions
                .values()
                .filter(|session| session.is_active())
                .filter(|session| role.map_or(true, |role| session.identity().role == role))
                .cloned()
                .collect()
        };

        let mut saturated = Vec::new();
        for session in targets {
            match session.try_deliver(payload.clone()) {
                Ok(()) => {}
                Err(DeliveryError::Full) => saturated.push(session),
                Err(DeliveryError::Closed) => {}
            }
        }

        for session in saturated {
            tracing::warn!(session = %session.key(), "会话邮箱已满，强制断开");
            self.unregister(session.key(), session.connection_id()).await;
        }
    }
}

async fn telemetry_loop(hub: Hub, sampler: Arc<dyn DeviceSampler>, options: HubOptions) {
    let mut ticker = tokio::time::interval(options.telemetry_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = hub.shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }
        if hub.active_count().await == 0 {
            continue;
        }

        let sample = tokio::select! {
            _ = hub.shutdown.cancelled() => break,
            sample = sampler.sample() => sample,
        };
        let snapshot = match sample {
            Ok(snapshot) => snapshot,
            Err(err) => {
                tracing::warn!(error = %err, "设备信息采样失败");
                continue;
            }
        };

        match OutboundEnvelope::push(DEVICE_REAL_TIME_INFO, &snapshot)
            .and_then(|envelope| envelope.encode())
        {
            Ok(payload) => {
                if hub.broadcast(payload, options.telemetry_role).is_err() {
                    break;
                }
            }
            Err(err) => tracing::warn!(error = %err, "failed to encode telemetry envelope"),
        }
    }
    tracing::debug!("遥测定时器已停止");
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
