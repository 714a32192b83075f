//! 身份边界
//!
//! 令牌依次从查询参数 `token`、Cookie `ldtoken`、请求头 `X-Ld-Token` 中读取，
//! 缺失或校验失败统一返回 401 / `-999`。

use std::{collections::HashMap, net::SocketAddr};

use axum::{
    extract::{ConnectInfo, FromRequestParts, Query},
    http::{header, request::Parts, HeaderMap},
};
use domain::TokenClaims;

use crate::{error::ApiError, state::AppState};

pub const TOKEN_COOKIE: &str = "ldtoken";
pub const TOKEN_HEADER: &str = "x-ld-token";
const TOKEN_QUERY: &str = "token";

/// 已通过校验的令牌持有者
#[derive(Debug, Clone)]
pub struct AuthUser(pub TokenClaims);

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = extract_token(parts).ok_or_else(|| {
            tracing::debug!(path = %parts.uri.path(), "请求缺少身份凭证");
            ApiError::unauthorized()
        })?;

        state
            .user_service
            .authenticate(&token)
            .map(AuthUser)
            .map_err(|err| {
                tracing::debug!(path = %parts.uri.path(), error = %err, "身份凭证校验失败");
                ApiError::unauthorized()
            })
    }
}

fn extract_token(parts: &Parts) -> Option<String> {
    let from_query = Query::<HashMap<String, String>>::try_from_uri(&parts.uri)
        .ok()
        .and_then(|Query(mut params)| params.remove(TOKEN_QUERY));

    from_query
        .or_else(|| cookie_value(&parts.headers, TOKEN_COOKIE))
        .or_else(|| {
            parts
                .headers
                .get(TOKEN_HEADER)
                .and_then(|value| value.to_str().ok())
                .map(str::to_owned)
        })
        .filter(|token| !token.trim().is_empty())
}

fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.to_owned())
}

/// 请求来源地址：优先取 `X-Forwarded-For` 的第一项，否则取对端地址
#[derive(Debug, Clone)]
pub struct ClientIp(pub String);

impl<S: Send + Sync> FromRequestParts<S> for ClientIp {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let forwarded = parts
            .headers
            .get("x-forwarded-for")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .map(str::trim)
            .filter(|ip| !ip.is_empty())
            .map(str::to_owned);

        let ip = forwarded.unwrap_or_else(|| {
            parts
                .extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
                .unwrap_or_else(|| "unknown".into())
        });
        Ok(ClientIp(ip))
    }
}

#[cfg(test)]
mod tests {
    use axum::http::Request;

    use super::*;

    fn parts(uri: &str, headers: &[(&str, &str)]) -> Parts {
        let mut builder = Request::builder().uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[test]
    fn query_wins_over_cookie_and_header() {
        let parts = parts(
            "/api/v1/getConfigData?token=from-query",
            &[("cookie", "ldtoken=from-cookie"), ("x-ld-token", "from-header")],
        );
        assert_eq!(extract_token(&parts).as_deref(), Some("from-query"));
    }

    #[test]
    fn cookie_wins_over_header() {
        let parts = parts(
            "/api/v1/getConfigData",
            &[
                ("cookie", "theme=dark; ldtoken=from-cookie"),
                ("x-ld-token", "from-header"),
            ],
        );
        assert_eq!(extract_token(&parts).as_deref(), Some("from-cookie"));
    }

    #[test]
    fn header_is_the_last_resort() {
        let parts = parts("/api/v1/getConfigData", &[("X-Ld-Token", "from-header")]);
        assert_eq!(extract_token(&parts).as_deref(), Some("from-header"));
        assert!(extract_token(&super::tests::parts("/x?token=", &[])).is_none());
    }

    #[tokio::test]
    async fn forwarded_for_takes_first_entry() {
        let mut parts = parts("/", &[("x-forwarded-for", "10.0.0.7, 172.16.0.1")]);
        let ClientIp(ip) = ClientIp::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(ip, "10.0.0.7");
    }
}
