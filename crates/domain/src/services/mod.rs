//! 领域服务

pub mod token_service;

pub use token_service::{TokenClaims, TokenError, TokenService, MAX_VALIDITY_HOURS};
