use application::ApplicationError;
use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, State,
    },
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Duration, Utc};
use domain::{
    DomainError, ProfileUpdate, Setting, SettingsPatch, SharedFile, UserId, UserProfile,
};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;

use crate::{
    auth::{AuthUser, ClientIp, TOKEN_COOKIE},
    error::{ApiError, Reply},
    session,
    state::AppState,
};

const BAD_PARAMS: &str = "请验证参数正确性";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateUserPayload {
    #[serde(default)]
    user_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserPairPayload {
    user_id: i64,
    user_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppLoginPayload {
    #[serde(default)]
    admin_name: String,
    #[serde(default)]
    admin_password: String,
    #[serde(default)]
    time_stamp: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileCodeQuery {
    file_code: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws", get(session::upgrade))
        .nest("/api/v1", api_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn api_routes() -> Router<AppState> {
    Router::new()
        // 公开接口
        .route("/getUserList", post(get_user_list))
        .route("/createUser", post(create_user))
        .route("/createToken", post(create_token))
        .route("/appLogin", post(app_login))
        // 需要身份凭证
        .route("/getWSStatus", get(ws_status))
        .route("/getConfigData", get(get_config))
        .route("/updateConfig", post(update_config))
        .route("/unBindUser", post(unbind_user))
        .route("/updateUserInfo", post(update_user_info))
        .route("/getRealFilePath", get(real_file_path))
}

async fn health() -> StatusCode {
    StatusCode::OK
}

/// 请求体解析失败统一返回 400
fn body<T: DeserializeOwned>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload.map(|Json(value)| value).map_err(|rejection| {
        tracing::debug!(error = %rejection, "请求体解析失败");
        ApiError::bad_request(BAD_PARAMS)
    })
}

async fn get_user_list(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
) -> Result<Json<Reply<Vec<UserProfile>>>, ApiError> {
    let users = state.user_service.list_guests_by_ip(&ip).await?;
    Ok(Reply::ok("查询成功", users))
}

async fn create_user(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    payload: Result<Json<CreateUserPayload>, JsonRejection>,
) -> Result<Json<Reply<Value>>, ApiError> {
    let payload = body(payload)?;
    let profile = state
        .user_service
        .register_guest(&payload.user_name, &ip)
        .await?;
    Ok(Reply::ok("完成", json!({ "createId": profile.id })))
}

async fn create_token(
    State(state): State<AppState>,
    payload: Result<Json<UserPairPayload>, JsonRejection>,
) -> Result<Response, ApiError> {
    let payload = body(payload)?;
    if payload.user_id == 0 || payload.user_name.trim().is_empty() {
        return Err(ApiError::bad_request(BAD_PARAMS));
    }

    let issued = state
        .user_service
        .issue_guest_token(UserId(payload.user_id), &payload.user_name)
        .await?;
    let cookie = token_cookie(&issued.token, issued.expires_in_hours);

    Ok((
        [(header::SET_COOKIE, cookie)],
        Reply::ok("完成", json!({ "token": issued.token })),
    )
        .into_response())
}

fn token_cookie(token: &str, validity_hours: i64) -> String {
    let max_age = validity_hours.saturating_mul(3600);
    let expires = Duration::try_seconds(max_age)
        .and_then(|validity| Utc::now().checked_add_signed(validity))
        .unwrap_or(DateTime::<Utc>::MAX_UTC);
    format!(
        "{TOKEN_COOKIE}={token}; Path=/; Expires={}; Max-Age={max_age}; HttpOnly; SameSite=Lax",
        expires.format("%a, %d %b %Y %H:%M:%S GMT"),
    )
}

async fn app_login(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    payload: Result<Json<AppLoginPayload>, JsonRejection>,
) -> Result<Json<Reply<Value>>, ApiError> {
    let payload = body(payload)?;
    let has_timestamp = match &payload.time_stamp {
        Value::Null => false,
        Value::String(text) => !text.is_empty(),
        _ => true,
    };
    if payload.admin_name.is_empty() || payload.admin_password.is_empty() || !has_timestamp {
        return Err(ApiError::bad_request("缺少必要参数"));
    }

    let issued = state
        .user_service
        .login(&payload.admin_name, &payload.admin_password, &ip)
        .await?;
    let user = issued.user;
    Ok(Reply::ok(
        "完成",
        json!({
            "token": issued.token,
            "adminId": user.id,
            "adminName": user.name,
            "nickName": user.nick_name,
            "role": user.role,
            "avatar": user.avatar,
        }),
    ))
}

async fn ws_status(State(state): State<AppState>, _user: AuthUser) -> Json<Value> {
    Json(json!({
        "active_connections": state.hub.active_count().await,
        "status": "running",
    }))
}

async fn get_config(
    State(state): State<AppState>,
    _user: AuthUser,
) -> Result<Json<Reply<Setting>>, ApiError> {
    Ok(Reply::ok("successed", state.settings_service.load().await?))
}

async fn update_config(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    payload: Result<Json<SettingsPatch>, JsonRejection>,
) -> Result<Json<Reply<Setting>>, ApiError> {
    if !claims.role.is_admin() {
        return Err(ApiError::forbidden("仅管理员可以修改配置"));
    }
    let patch = body(payload)?;
    let setting = state.settings_service.update(patch).await?;
    tracing::info!(user_id = %claims.user_id, "全局设置已更新");
    Ok(Reply::ok("successed", setting))
}

async fn unbind_user(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    payload: Result<Json<UserPairPayload>, JsonRejection>,
) -> Result<Json<Reply<u64>>, ApiError> {
    let payload = body(payload)?;
    let removed = state
        .user_service
        .unbind(&claims, UserId(payload.user_id), &payload.user_name)
        .await?;
    Ok(Reply::ok("完成", removed))
}

async fn update_user_info(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    payload: Result<Json<ProfileUpdate>, JsonRejection>,
) -> Result<Json<Reply<UserProfile>>, ApiError> {
    let update = body(payload)?;
    let profile = state.user_service.update_profile(&claims, update).await?;
    Ok(Reply::ok("完成", profile))
}

async fn real_file_path(
    State(state): State<AppState>,
    _user: AuthUser,
    query: Result<Query<FileCodeQuery>, QueryRejection>,
) -> Result<Json<Reply<SharedFile>>, ApiError> {
    let Ok(Query(query)) = query else {
        return Err(ApiError::bad_request(BAD_PARAMS));
    };
    let file = state
        .shared_files
        .find_by_code(&query.file_code)
        .await
        .map_err(ApplicationError::from)?
        .ok_or_else(|| ApplicationError::from(DomainError::FileNotFound))?;
    Ok(Reply::ok("successed", file))
}
