//! Web API 层。
//!
//! 提供 Axum 路由：HTTP 接口、身份边界，以及 WebSocket 会话与消息分发。

mod auth;
mod error;
mod handlers;
pub mod protocol;
mod routes;
mod session;
mod state;

pub use auth::{AuthUser, ClientIp, TOKEN_COOKIE, TOKEN_HEADER};
pub use error::{ApiError, Reply};
pub use routes::router;
pub use state::AppState;
