//! 局域网宿主核心领域模型
//!
//! 包含用户、好友关系、聊天记录、全局设置等核心实体，
//! 以及身份令牌的签发与校验。

pub mod chat;
pub mod errors;
pub mod friendship;
pub mod services;
pub mod setting;
pub mod shared_file;
pub mod user;
pub mod value_objects;

// 重新导出常用类型
pub use chat::*;
pub use errors::*;
pub use friendship::*;
pub use services::*;
pub use setting::*;
pub use shared_file::*;
pub use user::*;
pub use value_objects::*;
