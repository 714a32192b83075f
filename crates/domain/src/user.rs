use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::errors::DomainError;
use crate::value_objects::{PasswordHash, SessionKey, Timestamp, UserId};

/// 用户角色，线上取值为 `admin+` / `admin` / `guest`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UserRole {
    #[serde(rename = "admin+")]
    SuperAdmin,
    #[serde(rename = "admin")]
    Admin,
    #[serde(rename = "guest")]
    Guest,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::SuperAdmin => "admin+",
            UserRole::Admin => "admin",
            UserRole::Guest => "guest",
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, UserRole::SuperAdmin | UserRole::Admin)
    }
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UserRole {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "admin+" => Ok(UserRole::SuperAdmin),
            "admin" => Ok(UserRole::Admin),
            "guest" => Ok(UserRole::Guest),
            other => Err(DomainError::invalid_argument(
                "role",
                format!("unknown role {other}"),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub avatar: String,
    /// 系统生成的唯一短名
    pub name: String,
    pub nick_name: String,
    pub password: PasswordHash,
    pub role: UserRole,
    /// 最近一次登录/注册的来源地址
    pub ip: String,
    pub created_at: Timestamp,
}

impl User {
    pub fn session_key(&self) -> SessionKey {
        SessionKey::new(&self.name, self.id)
    }

    pub fn profile(&self) -> UserProfile {
        UserProfile {
            id: self.id,
            avatar: self.avatar.clone(),
            name: self.name.clone(),
            nick_name: self.nick_name.clone(),
            role: self.role,
            ip: self.ip.clone(),
            created_at: self.created_at,
        }
    }
}

/// 对外暴露的用户资料，不含密码。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: UserId,
    pub avatar: String,
    pub name: String,
    pub nick_name: String,
    pub role: UserRole,
    pub ip: String,
    pub created_at: Timestamp,
}

/// 新建用户所需的数据，id 由存储分配。
#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub nick_name: String,
    pub password: PasswordHash,
    pub role: UserRole,
    pub ip: String,
    pub created_at: Timestamp,
}

/// 资料修改，至少包含一个字段。
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    pub nick_name: Option<String>,
    pub avatar: Option<String>,
}

impl ProfileUpdate {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.nick_name.is_none() && self.avatar.is_none() {
            return Err(DomainError::invalid_argument(
                "profile",
                "nickName or avatar is required",
            ));
        }
        if let Some(nick) = &self.nick_name {
            if nick.trim().is_empty() {
                return Err(DomainError::invalid_argument("nickName", "must not be empty"));
            }
        }
        Ok(())
    }
}
