//! 应用层实现。
//!
//! 这里提供围绕领域模型的用例服务、连接注册中心（Hub），
//! 以及对外部适配器（存储、密码哈希、设备采样）的抽象。

pub mod clock;
pub mod envelope;
pub mod error;
pub mod hub;
pub mod password;
pub mod repository;
pub mod services;
pub mod telemetry;

pub use clock::{Clock, SystemClock};
pub use envelope::{generate_request_id, OutboundEnvelope, Payload};
pub use error::ApplicationError;
pub use hub::{DeliveryError, Hub, HubError, HubOptions, SessionHandle, SessionIdentity};
pub use password::{PasswordHasher, PasswordHasherError};
pub use repository::{
    ChatRepository, FriendshipRepository, SettingsRepository, SharedFileDirectory, UserRepository,
};
pub use services::{
    IssuedToken, PeerView, RespondOutcome, SendChatRequest, SettingsService,
    SettingsServiceDependencies, SocialService, SocialServiceDependencies, UserService,
    UserServiceDependencies,
};
pub use telemetry::{DeviceSampler, DeviceSnapshot, InterfaceThroughput, TelemetryError};
