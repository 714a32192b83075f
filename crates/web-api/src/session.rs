//! WebSocket 会话
//!
//! 建连时先校验令牌、用户 id 与名称，失败则发送 `commonError` 后立即关闭。
//! 通过后注册到 Hub，并启动两个泵：
//! - 入站泵：限制单帧大小与读超时，按顺序分发消息；
//! - 出站泵：把邮箱中的消息写到连接，空闲时定时发送 ping。
//!
//! 任一泵退出都会向 Hub 注销会话；注销会取消会话作用域，另一个泵随之退出。

use std::sync::Arc;

use application::{OutboundEnvelope, Payload, SessionHandle, SessionIdentity};
use axum::{
    body::Bytes,
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use serde::Deserialize;
use tokio::{
    sync::mpsc,
    time::{interval_at, timeout, Instant, MissedTickBehavior},
};

use crate::{handlers, state::AppState};

const MISSING_TOKEN: &str = "缺少token数据";
const TOKEN_UNVERIFIED: &str = "无法验证token有效性";
const ACCOUNT_MISMATCH: &str = "token账号验证失败";

/// 建连参数
#[derive(Debug, Default, Deserialize)]
pub(crate) struct ConnectParams {
    #[serde(rename = "ldToken", alias = "token")]
    ld_token: Option<String>,
    id: Option<String>,
    name: Option<String>,
}

pub(crate) async fn upgrade(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(params): Query<ConnectParams>,
) -> Response {
    let max_message_bytes = state.session.max_message_bytes;
    ws.max_message_size(max_message_bytes)
        .max_frame_size(max_message_bytes)
        .on_upgrade(move |socket| accept(socket, state, params))
}

async fn accept(socket: WebSocket, state: AppState, params: ConnectParams) {
    let identity = match authorize(&state, &params) {
        Ok(identity) => identity,
        Err(reason) => {
            tracing::info!(id = ?params.id, name = ?params.name, reason, "拒绝 WebSocket 连接");
            reject(socket, &state, reason).await;
            return;
        }
    };

    let (session, mailbox) = SessionHandle::new(identity, state.session.mailbox_capacity);
    if let Err(err) = state.hub.register(session.clone()).await {
        tracing::warn!(session = %session.key(), error = %err, "会话注册失败");
        reject(socket, &state, "服务暂不可用").await;
        return;
    }

    let (sink, stream) = socket.split();
    let inbound = tokio::spawn(inbound_pump(stream, state.clone(), session.clone()));
    let outbound = tokio::spawn(outbound_pump(sink, mailbox, state.clone(), session.clone()));
    let (inbound, outbound) = tokio::join!(inbound, outbound);
    if inbound.is_err() || outbound.is_err() {
        // 泵任务 panic 时仍需注销
        state.hub.unregister(&session).await;
    }
    tracing::debug!(session = %session.key(), "会话已结束");
}

/// 依次检查：参数齐全、令牌有效、令牌账号与参数一致
fn authorize(state: &AppState, params: &ConnectParams) -> Result<SessionIdentity, &'static str> {
    let (Some(token), Some(id), Some(name)) = (
        non_empty(&params.ld_token),
        non_empty(&params.id),
        non_empty(&params.name),
    ) else {
        return Err(MISSING_TOKEN);
    };

    // 角色在令牌解码时即限定为已知取值
    let claims = state
        .user_service
        .authenticate(token)
        .map_err(|_| TOKEN_UNVERIFIED)?;

    let id: i64 = id.parse().map_err(|_| ACCOUNT_MISMATCH)?;
    if claims.user_id.0 != id || claims.user_name != name {
        return Err(ACCOUNT_MISMATCH);
    }

    Ok(SessionIdentity {
        user_id: claims.user_id,
        name: claims.user_name,
        role: claims.role,
        token_expires_at: claims.expires_at,
    })
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|value| !value.is_empty())
}

async fn reject(mut socket: WebSocket, state: &AppState, reason: &str) {
    let deadline = state.session.write_deadline();
    match OutboundEnvelope::error(None, 401, reason).encode() {
        Ok(payload) => {
            let _ = timeout(deadline, socket.send(Message::Text(payload.as_ref().into()))).await;
        }
        Err(err) => tracing::warn!(error = %err, "failed to encode rejection envelope"),
    }
    let _ = timeout(deadline, socket.send(Message::Close(None))).await;
}

async fn inbound_pump(mut stream: SplitStream<WebSocket>, state: AppState, session: Arc<SessionHandle>) {
    let cancel = session.cancellation();
    let read_deadline = state.session.read_deadline();

    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            next = timeout(read_deadline, stream.next()) => next,
        };
        let message = match next {
            Err(_) => {
                tracing::info!(session = %session.key(), "读取超时，心跳丢失");
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(err))) => {
                tracing::debug!(session = %session.key(), error = %err, "读取失败");
                break;
            }
            Ok(Some(Ok(message))) => message,
        };

        let frame = match &message {
            Message::Text(text) => text.as_str(),
            Message::Binary(bytes) => match std::str::from_utf8(bytes) {
                Ok(text) => text,
                Err(_) => {
                    tracing::warn!(session = %session.key(), "收到非 UTF-8 二进制帧");
                    break;
                }
            },
            Message::Ping(_) | Message::Pong(_) => {
                session.touch();
                continue;
            }
            Message::Close(_) => break,
        };

        if handlers::handle_frame(&state, &session, frame).await.is_err() {
            break;
        }
    }

    state.hub.unregister(&session).await;
}

async fn outbound_pump(
    mut sink: SplitSink<WebSocket, Message>,
    mut mailbox: mpsc::Receiver<Payload>,
    state: AppState,
    session: Arc<SessionHandle>,
) {
    let cancel = session.cancellation();
    let write_deadline = state.session.write_deadline();
    let ping_interval = state.session.ping_interval();
    let mut heartbeat = interval_at(Instant::now() + ping_interval, ping_interval);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        // 邮箱优先：注销时邮箱先被关闭，已排队的消息仍会写出
        let frame = tokio::select! {
            biased;
            payload = mailbox.recv() => match payload {
                Some(payload) => {
                    heartbeat.reset();
                    Message::Text(payload.as_ref().into())
                }
                None => break,
            },
            _ = heartbeat.tick() => Message::Ping(Bytes::new()),
            _ = cancel.cancelled() => break,
        };

        match timeout(write_deadline, sink.send(frame)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                tracing::debug!(session = %session.key(), error = %err, "写入失败");
                break;
            }
            Err(_) => {
                tracing::warn!(session = %session.key(), "写入超时");
                break;
            }
        }
    }

    let _ = timeout(write_deadline, sink.send(Message::Close(None))).await;
    state.hub.unregister(&session).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_parameters_count_as_missing() {
        assert_eq!(non_empty(&Some("  ".into())), None);
        assert_eq!(non_empty(&Some(" 1001 ".into())), Some("1001"));
        assert_eq!(non_empty(&None), None);
    }

    #[test]
    fn connect_params_accept_both_token_names() {
        let legacy: ConnectParams =
            serde_json::from_value(serde_json::json!({"ldToken": "t", "id": "1", "name": "n"}))
                .unwrap();
        let short: ConnectParams =
            serde_json::from_value(serde_json::json!({"token": "t"})).unwrap();
        assert_eq!(legacy.ld_token.as_deref(), Some("t"));
        assert_eq!(short.ld_token.as_deref(), Some("t"));
    }
}
