//! 下行消息信封
//!
//! 所有推送给会话的消息都是同一个 JSON 形状：
//! `{sId, type, content, clientType, timeStamp}`，
//! 其中回复的 `content` 为 `{code, data}`，错误为 `{code, error}`。

use std::{fmt::Display, sync::Arc};

use rand::Rng;
use serde::Serialize;
use serde_json::{json, Value};

/// 已编码、可在多个邮箱间共享的消息
pub type Payload = Arc<str>;

pub const CLIENT_TYPE: &str = "LD_APP";
/// 成功回复的业务码
pub const REPLY_OK: i64 = 1;

pub const WELCOME: &str = "welcome";
pub const COMMON_ERROR: &str = "commonError";
pub const DEVICE_REAL_TIME_INFO: &str = "deviceRealTimeInfo";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundEnvelope {
    #[serde(rename = "sId", skip_serializing_if = "Option::is_none")]
    pub s_id: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    pub content: Value,
    pub client_type: &'static str,
    pub time_stamp: i64,
}

impl OutboundEnvelope {
    fn new(s_id: Option<String>, kind: &str, content: Value) -> Self {
        Self {
            s_id,
            kind: kind.to_owned(),
            content,
            client_type: CLIENT_TYPE,
            time_stamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// 针对某个请求的成功回复
    pub fn reply<T: Serialize>(
        request_id: &str,
        kind: &str,
        data: &T,
    ) -> Result<Self, serde_json::Error> {
        let data = serde_json::to_value(data)?;
        Ok(Self::new(
            Some(request_id.to_owned()),
            kind,
            json!({ "code": REPLY_OK, "data": data }),
        ))
    }

    /// 服务端主动推送，没有请求 id
    pub fn push<T: Serialize>(kind: &str, data: &T) -> Result<Self, serde_json::Error> {
        let data = serde_json::to_value(data)?;
        Ok(Self::new(None, kind, json!({ "code": REPLY_OK, "data": data })))
    }

    pub fn error(request_id: Option<&str>, code: u16, message: impl Display) -> Self {
        Self::new(
            request_id.map(str::to_owned),
            COMMON_ERROR,
            json!({ "code": code, "error": message.to_string() }),
        )
    }

    pub fn encode(&self) -> Result<Payload, serde_json::Error> {
        serde_json::to_string(self).map(Payload::from)
    }
}

/// 客户端未携带 sId 时生成：`LD_<毫秒>_<0..100000>`
pub fn generate_request_id() -> String {
    let suffix: u32 = rand::rng().random_range(0..100_000);
    format!("LD_{}_{}", chrono::Utc::now().timestamp_millis(), suffix)
}
