use serde::{Deserialize, Serialize};

use crate::errors::DomainError;
use crate::value_objects::{ChatRecordId, UserId};

/// 聊天历史窗口：最近 500 条
pub const CHAT_HISTORY_LIMIT: i64 = 500;
/// 聊天历史窗口：最近 7 天
pub const CHAT_HISTORY_WINDOW_DAYS: i64 = 7;

/// 待写入的一条聊天消息
#[derive(Debug, Clone, PartialEq)]
pub struct NewChatMessage {
    pub from_id: UserId,
    pub to_id: UserId,
    pub kind: String,
    pub message: String,
    /// 附件列表，原样序列化为 JSON 存储
    pub files: serde_json::Value,
    pub sent_at: i64,
}

impl NewChatMessage {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.from_id == self.to_id {
            return Err(DomainError::invalid_argument("toId", "cannot chat with yourself"));
        }
        if self.message.is_empty() && is_empty_attachment(&self.files) {
            return Err(DomainError::invalid_argument(
                "message",
                "message or files is required",
            ));
        }
        Ok(())
    }
}

fn is_empty_attachment(files: &serde_json::Value) -> bool {
    match files {
        serde_json::Value::Null => true,
        serde_json::Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

/// 聊天记录（带双方名称），也是推送给客户端的结构
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRecordView {
    pub c_id: ChatRecordId,
    pub to_id: UserId,
    pub from_id: UserId,
    /// `y` / `n`
    pub is_read: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    pub files: serde_json::Value,
    /// 毫秒时间戳
    pub time: i64,
    pub from_name: String,
    pub from_nick_name: String,
    pub to_name: String,
    pub to_nick_name: String,
}

/// 标记已读的方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkReadMode {
    /// 单条记录
    One(ChatRecordId),
    /// 某个发送者发给自己的全部记录
    AllFrom(UserId),
}

impl MarkReadMode {
    /// `all` 时 `id` 为发送者，否则为聊天记录 id
    pub fn from_wire(mode: &str, id: i64) -> Self {
        if mode == "all" {
            MarkReadMode::AllFrom(UserId(id))
        } else {
            MarkReadMode::One(ChatRecordId(id))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn message(text: &str, files: serde_json::Value) -> NewChatMessage {
        NewChatMessage {
            from_id: UserId(1000),
            to_id: UserId(1001),
            kind: "text".into(),
            message: text.into(),
            files,
            sent_at: 0,
        }
    }

    #[test]
    fn message_requires_body_or_files() {
        assert!(message("", json!(null)).validate().is_err());
        assert!(message("", json!([])).validate().is_err());
        assert!(message("hi", json!(null)).validate().is_ok());
        assert!(message("", json!([{"fileCode": "x"}])).validate().is_ok());
    }

    #[test]
    fn mark_mode_follows_flag() {
        assert_eq!(MarkReadMode::from_wire("all", 5), MarkReadMode::AllFrom(UserId(5)));
        assert_eq!(MarkReadMode::from_wire("one", 5), MarkReadMode::One(ChatRecordId(5)));
    }
}
