//! 上行消息协议
//!
//! 先按 `type` 判别消息种类，再把 `sendData`（或 `content`）解码为该种类的强类型参数。
//! 历史客户端标签与规范名称都可以作为 `type`。

use application::generate_request_id;
use serde::{de::DeserializeOwned, Deserialize, Deserializer};
use serde_json::Value;
use thiserror::Error;

pub const REPLY_PULL_DATA: &str = "replyPullData";
pub const REPLY_CLIENT_LIST: &str = "replyClientList";
pub const REPLY_ADD_FRIENDS: &str = "replyAddFriends";
pub const REPLY_DEAL_WITH_FRIENDS: &str = "replyDealWithFriends";
pub const REPLY_FRIEND_LIST: &str = "replyFriendList";
pub const REPLY_CHAT_RECORDS: &str = "replyChatRecords";
pub const REPLY_LATEST_FRIEND_LIST: &str = "replyLatestFriendList";
pub const REPLY_CHAT_RECEIVE_DATA: &str = "replyChatReceiveData";

#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    #[error("未知消息类型: {0}")]
    UnknownType(String),
    #[error("消息参数无效({kind}): {reason}")]
    InvalidPayload { kind: &'static str, reason: String },
}

/// 消息携带的用户信息，必须与会话身份一致
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeUser {
    #[serde(default, deserialize_with = "lenient_id")]
    pub user_id: i64,
    #[serde(default)]
    pub user_name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundEnvelope {
    #[serde(rename = "sId", alias = "reqId", default)]
    pub s_id: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub content: Option<Value>,
    #[serde(default)]
    pub send_data: Option<Value>,
    #[serde(default)]
    pub client_type: Option<String>,
    #[serde(default)]
    pub time_stamp: Option<i64>,
    #[serde(default)]
    pub user: EnvelopeUser,
}

impl InboundEnvelope {
    /// 客户端未携带请求 id 时由服务端生成
    pub fn request_id(&self) -> String {
        match self.s_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => id.to_owned(),
            _ => generate_request_id(),
        }
    }

    /// `sendData` 优先，其次 `content`
    fn payload(&self) -> Value {
        self.send_data
            .clone()
            .or_else(|| self.content.clone())
            .unwrap_or(Value::Null)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FriendRequestArgs {
    #[serde(deserialize_with = "lenient_id")]
    pub to_id: i64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FriendDecisionArgs {
    pub status: String,
    #[serde(rename = "fId", deserialize_with = "lenient_id")]
    pub f_id: i64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatHistoryArgs {
    #[serde(deserialize_with = "lenient_id")]
    pub friend_id: i64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MarkReadArgs {
    /// `all` 表示某个发送者的全部记录
    #[serde(rename = "type")]
    pub mode: String,
    #[serde(deserialize_with = "lenient_id")]
    pub id: i64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendChatArgs {
    #[serde(deserialize_with = "lenient_id")]
    pub to_id: i64,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub files: Value,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    PullState,
    DiscoverPeers,
    RequestFriend(FriendRequestArgs),
    RespondToFriendRequest(FriendDecisionArgs),
    ListFriends,
    ListChatHistory(ChatHistoryArgs),
    MarkChatRead(MarkReadArgs),
    SendChat(SendChatArgs),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CommandKind {
    PullState,
    DiscoverPeers,
    RequestFriend,
    RespondToFriendRequest,
    ListFriends,
    ListChatHistory,
    MarkChatRead,
    SendChat,
}

impl CommandKind {
    fn from_tag(tag: &str) -> Option<Self> {
        let kind = match tag {
            "pullData" | "pullState" => CommandKind::PullState,
            "queryClients" | "discoverPeers" => CommandKind::DiscoverPeers,
            "addFriends" | "requestFriend" => CommandKind::RequestFriend,
            "dealWithFriendsRequest" | "respondToFriendRequest" => {
                CommandKind::RespondToFriendRequest
            }
            "queryFriendList" | "listFriends" => CommandKind::ListFriends,
            "queryChatRecords" | "listChatHistory" => CommandKind::ListChatHistory,
            "changeChatRecordsStatus" | "markChatRead" => CommandKind::MarkChatRead,
            "chatSendData" | "sendChat" => CommandKind::SendChat,
            _ => return None,
        };
        Some(kind)
    }

    fn name(self) -> &'static str {
        match self {
            CommandKind::PullState => "pullState",
            CommandKind::DiscoverPeers => "discoverPeers",
            CommandKind::RequestFriend => "requestFriend",
            CommandKind::RespondToFriendRequest => "respondToFriendRequest",
            CommandKind::ListFriends => "listFriends",
            CommandKind::ListChatHistory => "listChatHistory",
            CommandKind::MarkChatRead => "markChatRead",
            CommandKind::SendChat => "sendChat",
        }
    }
}

impl Command {
    pub fn decode(envelope: &InboundEnvelope) -> Result<Self, ProtocolError> {
        let kind = CommandKind::from_tag(&envelope.kind)
            .ok_or_else(|| ProtocolError::UnknownType(envelope.kind.clone()))?;

        let command = match kind {
            CommandKind::PullState => Command::PullState,
            CommandKind::DiscoverPeers => Command::DiscoverPeers,
            CommandKind::ListFriends => Command::ListFriends,
            CommandKind::RequestFriend => Command::RequestFriend(args(kind, envelope)?),
            CommandKind::RespondToFriendRequest => {
                Command::RespondToFriendRequest(args(kind, envelope)?)
            }
            CommandKind::ListChatHistory => Command::ListChatHistory(args(kind, envelope)?),
            CommandKind::MarkChatRead => Command::MarkChatRead(args(kind, envelope)?),
            CommandKind::SendChat => Command::SendChat(args(kind, envelope)?),
        };
        Ok(command)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::PullState => CommandKind::PullState.name(),
            Command::DiscoverPeers => CommandKind::DiscoverPeers.name(),
            Command::RequestFriend(_) => CommandKind::RequestFriend.name(),
            Command::RespondToFriendRequest(_) => CommandKind::RespondToFriendRequest.name(),
            Command::ListFriends => CommandKind::ListFriends.name(),
            Command::ListChatHistory(_) => CommandKind::ListChatHistory.name(),
            Command::MarkChatRead(_) => CommandKind::MarkChatRead.name(),
            Command::SendChat(_) => CommandKind::SendChat.name(),
        }
    }
}

fn args<T: DeserializeOwned>(kind: CommandKind, envelope: &InboundEnvelope) -> Result<T, ProtocolError> {
    serde_json::from_value(envelope.payload()).map_err(|err| ProtocolError::InvalidPayload {
        kind: kind.name(),
        reason: err.to_string(),
    })
}

/// 网页端有时把数字 id 以字符串发送
fn lenient_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(i64),
        Text(String),
    }

    match Repr::deserialize(deserializer)? {
        Repr::Number(value) => Ok(value),
        Repr::Text(text) => text
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("invalid id {text:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn envelope(value: Value) -> InboundEnvelope {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn historical_and_canonical_tags_decode_alike() {
        let legacy = envelope(json!({
            "type": "chatSendData",
            "user": {"userId": 1000, "userName": "aB3dE6gH"},
            "sendData": {"to": "x#1001", "toId": 1001, "message": "hi", "files": [], "type": "text"}
        }));
        let canonical = envelope(json!({
            "type": "sendChat",
            "user": {"userId": 1000},
            "content": {"toId": "1001", "message": "hi", "files": [], "type": "text"}
        }));

        let expected = Command::SendChat(SendChatArgs {
            to_id: 1001,
            message: "hi".into(),
            files: json!([]),
            kind: Some("text".into()),
        });
        assert_eq!(Command::decode(&legacy).unwrap(), expected);
        assert_eq!(Command::decode(&canonical).unwrap(), expected);
    }

    #[test]
    fn unknown_tag_is_reported() {
        let env = envelope(json!({"type": "dropTables", "user": {"userId": 1}}));
        assert_eq!(
            Command::decode(&env),
            Err(ProtocolError::UnknownType("dropTables".into()))
        );
    }

    #[test]
    fn missing_arguments_are_invalid_payload() {
        let env = envelope(json!({"type": "queryChatRecords", "sendData": {}}));
        match Command::decode(&env) {
            Err(ProtocolError::InvalidPayload { kind, .. }) => assert_eq!(kind, "listChatHistory"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn decision_reads_wire_field_names() {
        let env = envelope(json!({
            "type": "dealWithFriendsRequest",
            "sendData": {"status": "accept", "fId": 7, "fromName": "n", "fromId": 1000}
        }));
        assert_eq!(
            Command::decode(&env).unwrap(),
            Command::RespondToFriendRequest(FriendDecisionArgs {
                status: "accept".into(),
                f_id: 7
            })
        );
    }

    #[test]
    fn request_id_is_kept_or_generated() {
        let with_id = envelope(json!({"type": "pullData", "reqId": "abc"}));
        assert_eq!(with_id.request_id(), "abc");

        let without = envelope(json!({"type": "pullData", "sId": ""}));
        assert!(without.request_id().starts_with("LD_"));
        assert_eq!(without.user.user_id, 0);
    }
}
