//! 身份令牌服务
//!
//! 令牌由两层组成：
//! 1. 内层：HS256 签名的 JWT，携带用户 id、名称、角色、签发/过期时间与签发者，
//!    这是真正的信任边界；
//! 2. 外层：对 JWT 文本按字节与静态密钥异或，再做 URL 安全的 base64 编码。
//!    外层只是让令牌形态不那么显眼，不提供任何安全性。

use chrono::{Duration, Utc};
use data_encoding::BASE64URL;
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::user::UserRole;
use crate::value_objects::{Timestamp, UserId};

/// 令牌有效期上限（小时），约 100 年
pub const MAX_VALIDITY_HOURS: i64 = 876_000;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    /// 外层解码失败
    #[error("token format is invalid")]
    InvalidFormat,
    #[error("token signature is invalid")]
    InvalidSignature,
    #[error("token has expired")]
    Expired,
    #[error("token could not be signed: {0}")]
    Signing(String),
    #[error("token validity of {0} hours is out of range")]
    InvalidValidity(i64),
}

/// 解析后的令牌声明，时间精确到秒
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenClaims {
    pub user_id: UserId,
    pub user_name: String,
    pub role: UserRole,
    pub issued_at: i64,
    pub expires_at: i64,
}

impl TokenClaims {
    pub fn is_expired_at(&self, now: Timestamp) -> bool {
        self.expires_at <= now.timestamp()
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireClaims {
    user_id: i64,
    user_name: String,
    role: UserRole,
    iat: i64,
    exp: i64,
    iss: String,
}

#[derive(Clone)]
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    obfuscation_key: Vec<u8>,
    issuer: String,
}

impl TokenService {
    pub fn new(secret: &str, obfuscation_key: &str, issuer: impl Into<String>) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            obfuscation_key: obfuscation_key.as_bytes().to_vec(),
            issuer: issuer.into(),
        }
    }

    /// 签发令牌，`validity_hours` 可以为负数（用于构造已过期令牌），
    /// 绝对值不得超过 [`MAX_VALIDITY_HOURS`]
    pub fn issue(
        &self,
        role: UserRole,
        user_id: UserId,
        user_name: &str,
        validity_hours: i64,
    ) -> Result<String, TokenError> {
        if !(-MAX_VALIDITY_HOURS..=MAX_VALIDITY_HOURS).contains(&validity_hours) {
            return Err(TokenError::InvalidValidity(validity_hours));
        }
        let now = Utc::now();
        let expires_at = Duration::try_hours(validity_hours)
            .and_then(|validity| now.checked_add_signed(validity))
            .ok_or(TokenError::InvalidValidity(validity_hours))?;
        let claims = WireClaims {
            user_id: user_id.0,
            user_name: user_name.to_owned(),
            role,
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            iss: self.issuer.clone(),
        };

        let signed = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|err| TokenError::Signing(err.to_string()))?;
        Ok(BASE64URL.encode(&self.xor(signed.as_bytes())))
    }

    /// 还原外层编码后校验签名、签发者与过期时间
    pub fn parse(&self, token: &str) -> Result<TokenClaims, TokenError> {
        let raw = BASE64URL
            .decode(token.trim().as_bytes())
            .map_err(|_| TokenError::InvalidFormat)?;
        let signed = String::from_utf8(self.xor(&raw)).map_err(|_| TokenError::InvalidFormat)?;

        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_issuer(&[self.issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss"]);

        let data = decode::<WireClaims>(&signed, &self.decoding_key, &validation).map_err(
            |err| match err.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::InvalidSignature,
            },
        )?;
        let claims = data.claims;

        Ok(TokenClaims {
            user_id: UserId(claims.user_id),
            user_name: claims.user_name,
            role: claims.role,
            issued_at: claims.iat,
            expires_at: claims.exp,
        })
    }

    fn xor(&self, input: &[u8]) -> Vec<u8> {
        if self.obfuscation_key.is_empty() {
            return input.to_vec();
        }
        input
            .iter()
            .zip(self.obfuscation_key.iter().cycle())
            .map(|(byte, key)| byte ^ key)
            .collect()
    }
}
