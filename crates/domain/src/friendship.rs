use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::errors::DomainError;
use crate::value_objects::{ChatRecordId, FriendshipId, UserId};

/// 好友关系状态，单向行上只允许 pending -> accept | reject
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FriendshipStatus {
    Pending,
    Accept,
    Reject,
}

impl FriendshipStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FriendshipStatus::Pending => "pending",
            FriendshipStatus::Accept => "accept",
            FriendshipStatus::Reject => "reject",
        }
    }

    /// 申请的处理结果只能是 accept 或 reject
    pub fn decision(value: &str) -> Result<Self, DomainError> {
        match value.parse()? {
            FriendshipStatus::Pending => Err(DomainError::invalid_argument(
                "status",
                "a request cannot be moved back to pending",
            )),
            status => Ok(status),
        }
    }
}

impl fmt::Display for FriendshipStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FriendshipStatus {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(FriendshipStatus::Pending),
            "accept" => Ok(FriendshipStatus::Accept),
            "reject" => Ok(FriendshipStatus::Reject),
            other => Err(DomainError::invalid_argument(
                "status",
                format!("unknown friendship status {other}"),
            )),
        }
    }
}

/// 单向好友关系行
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Friendship {
    pub id: FriendshipId,
    pub user_id: UserId,
    pub friend_id: UserId,
    pub status: FriendshipStatus,
    pub last_chat_id: Option<ChatRecordId>,
    /// 毫秒时间戳
    pub create_time: i64,
}

impl Friendship {
    pub fn is_pending(&self) -> bool {
        self.status == FriendshipStatus::Pending
    }
}

/// 好友申请通知，带双方资料
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FriendRequestView {
    pub f_id: FriendshipId,
    pub user_id: UserId,
    pub friend_id: UserId,
    pub status: FriendshipStatus,
    pub last_chat_id: Option<ChatRecordId>,
    pub create_time: i64,
    pub from_id: UserId,
    pub from_name: String,
    pub from_nick_name: String,
    pub from_role: String,
    pub from_ip: String,
    pub to_id: UserId,
    pub to_name: String,
    pub to_nick_name: String,
    pub to_role: String,
    pub to_ip: String,
}

/// 好友列表项：好友资料 + 最近一条消息预览 + 未读数
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FriendListEntry {
    pub f_id: FriendshipId,
    pub user_id: UserId,
    pub friend_id: UserId,
    pub status: FriendshipStatus,
    pub last_chat_id: Option<ChatRecordId>,
    pub create_time: i64,
    pub friend_name: String,
    pub friend_nick_name: String,
    pub friend_avatar: String,
    pub friend_role: String,
    pub friend_ip: String,
    pub msg_type: Option<String>,
    pub last_msg: Option<String>,
    pub msg_time: Option<i64>,
    pub unread_count: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decision_rejects_pending() {
        assert_eq!(
            FriendshipStatus::decision("accept").unwrap(),
            FriendshipStatus::Accept
        );
        assert_eq!(
            FriendshipStatus::decision("reject").unwrap(),
            FriendshipStatus::Reject
        );
        assert!(FriendshipStatus::decision("pending").is_err());
        assert!(FriendshipStatus::decision("maybe").is_err());
    }

    #[test]
    fn view_serializes_with_wire_names() {
        let view = FriendListEntry {
            f_id: FriendshipId(7),
            user_id: UserId(1000),
            friend_id: UserId(1001),
            status: FriendshipStatus::Accept,
            last_chat_id: None,
            create_time: 1,
            friend_name: "n".into(),
            friend_nick_name: "nick".into(),
            friend_avatar: String::new(),
            friend_role: "guest".into(),
            friend_ip: "10.0.0.2".into(),
            msg_type: None,
            last_msg: None,
            msg_time: None,
            unread_count: 2,
        };
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["fId"], 7);
        assert_eq!(json["friendNickName"], "nick");
        assert_eq!(json["unreadCount"], 2);
        assert_eq!(json["status"], "accept");
    }
}
