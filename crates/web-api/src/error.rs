use application::ApplicationError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use domain::{DomainError, RepositoryError, TokenError};
use serde::Serialize;

/// 身份凭证无效时的业务码
pub const IDENTITY_REJECTED: i64 = -999;
/// 设备注册数超限时的业务码，HTTP 状态仍为 200
pub const DEVICE_LIMIT_CODE: i64 = -1;

const IDENTITY_REJECTED_MSG: &str = "身份凭证过期或无效。请重新登录。";
const DEVICE_LIMIT_MSG: &str = "当前ip地址已经注册超过五台设备，请先解绑后进行注册。";
const BAD_CREDENTIALS_MSG: &str = "管理员账号或密码错误";
const INTERNAL_MSG: &str = "服务器错误";

/// HTTP 接口统一回复体：`{code, msg, data}`
#[derive(Debug, Serialize)]
pub struct Reply<T: Serialize> {
    pub code: i64,
    pub msg: String,
    pub data: T,
}

impl<T: Serialize> Reply<T> {
    pub fn ok(msg: impl Into<String>, data: T) -> Json<Self> {
        Json(Self {
            code: i64::from(StatusCode::OK.as_u16()),
            msg: msg.into(),
            data,
        })
    }
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: i64,
    msg: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: i64, msg: impl Into<String>) -> Self {
        Self {
            status,
            code,
            msg: msg.into(),
        }
    }

    /// 业务码与 HTTP 状态一致
    pub fn status(status: StatusCode, msg: impl Into<String>) -> Self {
        Self::new(status, i64::from(status.as_u16()), msg)
    }

    pub fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, IDENTITY_REJECTED, IDENTITY_REJECTED_MSG)
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::status(StatusCode::BAD_REQUEST, msg)
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::status(StatusCode::FORBIDDEN, msg)
    }

    pub fn code(&self) -> i64 {
        self.code
    }
}

/// 应用层错误到 (状态码, 对外消息) 的映射，HTTP 与 WebSocket 共用
pub(crate) fn classify(error: &ApplicationError) -> (StatusCode, String) {
    match error {
        ApplicationError::Domain(err) => {
            let status = match err {
                DomainError::InvalidArgument { .. } => StatusCode::BAD_REQUEST,
                DomainError::UserNotFound
                | DomainError::FriendRequestNotFound
                | DomainError::FileNotFound => StatusCode::NOT_FOUND,
                DomainError::NotFriends { .. } | DomainError::PermissionDenied { .. } => {
                    StatusCode::FORBIDDEN
                }
                DomainError::FriendshipExists { .. } => StatusCode::CONFLICT,
                DomainError::DeviceLimitReached { .. } => StatusCode::TOO_MANY_REQUESTS,
                DomainError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            };
            (status, err.to_string())
        }
        ApplicationError::Repository(RepositoryError::NotFound) => {
            (StatusCode::NOT_FOUND, "记录不存在".into())
        }
        ApplicationError::Repository(RepositoryError::Conflict) => {
            (StatusCode::CONFLICT, "记录已存在".into())
        }
        ApplicationError::Token(TokenError::Signing(_) | TokenError::InvalidValidity(_)) => {
            (StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_MSG.into())
        }
        ApplicationError::Token(_) | ApplicationError::Authentication => {
            (StatusCode::UNAUTHORIZED, IDENTITY_REJECTED_MSG.into())
        }
        ApplicationError::Authorization => (StatusCode::FORBIDDEN, "权限不足".into()),
        ApplicationError::Repository(_)
        | ApplicationError::Password(_)
        | ApplicationError::Serialization(_)
        | ApplicationError::Hub(_)
        | ApplicationError::Infrastructure(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_MSG.into())
        }
    }
}

impl From<ApplicationError> for ApiError {
    fn from(error: ApplicationError) -> Self {
        match &error {
            ApplicationError::Domain(DomainError::DeviceLimitReached { .. }) => {
                return ApiError::new(StatusCode::OK, DEVICE_LIMIT_CODE, DEVICE_LIMIT_MSG);
            }
            ApplicationError::Domain(DomainError::InvalidCredentials) => {
                return ApiError::bad_request(BAD_CREDENTIALS_MSG);
            }
            ApplicationError::Token(TokenError::Signing(_) | TokenError::InvalidValidity(_)) => {}
            ApplicationError::Token(_) | ApplicationError::Authentication => {
                return ApiError::unauthorized();
            }
            _ => {}
        }

        let (status, msg) = classify(&error);
        if status.is_server_error() {
            tracing::error!(error = %error, "请求处理失败");
        }
        ApiError::status(status, msg)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Reply {
            code: self.code,
            msg: self.msg,
            data: serde_json::Value::Null,
        };
        (self.status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_limit_keeps_http_ok() {
        let err = ApiError::from(ApplicationError::from(DomainError::DeviceLimitReached {
            limit: 5,
        }));
        assert_eq!(err.status, StatusCode::OK);
        assert_eq!(err.code(), DEVICE_LIMIT_CODE);
    }

    #[test]
    fn token_errors_use_identity_code() {
        let err = ApiError::from(ApplicationError::from(domain::TokenError::Expired));
        assert_eq!(err.status, StatusCode::UNAUTHORIZED);
        assert_eq!(err.code(), IDENTITY_REJECTED);
    }

    #[test]
    fn issuance_failure_is_a_server_error() {
        let err = ApiError::from(ApplicationError::from(TokenError::InvalidValidity(
            10_000_000_000,
        )));
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn storage_details_are_not_leaked() {
        let (status, msg) = classify(&ApplicationError::from(RepositoryError::storage(
            "disk I/O error at /var/lib/app.db",
        )));
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!msg.contains("/var/lib"));
    }

    #[test]
    fn missing_relationship_is_forbidden() {
        let (status, _) = classify(&ApplicationError::from(DomainError::NotFriends {
            from: 1000,
            to: 1001,
        }));
        assert_eq!(status, StatusCode::FORBIDDEN);
    }
}
