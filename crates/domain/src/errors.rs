//! 领域模型错误定义
//!
//! 定义了系统中所有可能的错误类型，提供清晰的错误上下文。

use thiserror::Error;

/// 领域模型错误类型
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DomainError {
    /// 参数校验失败
    #[error("参数无效: {field}: {reason}")]
    InvalidArgument { field: String, reason: String },

    #[error("用户不存在")]
    UserNotFound,

    /// 没有处于 pending 状态、且发给当前用户的好友申请
    #[error("未查询到好友关系")]
    FriendRequestNotFound,

    /// 同方向已有待处理申请或已是好友
    #[error("好友申请已存在: {from} => {to}")]
    FriendshipExists { from: i64, to: i64 },

    /// 双方不存在已接受的好友关系
    #[error("不存在的好友关系不能发送消息: {from} => {to}")]
    NotFriends { from: i64, to: i64 },

    /// 同一 IP 下的访客账号数量已达上限
    #[error("当前设备可创建用户数已达上限({limit})")]
    DeviceLimitReached { limit: usize },

    #[error("账号或密码错误")]
    InvalidCredentials,

    /// 权限错误
    #[error("权限不足: {action}")]
    PermissionDenied { action: String },

    #[error("文件不存在")]
    FileNotFound,
}

impl DomainError {
    /// 创建参数校验错误
    pub fn invalid_argument(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// 创建权限错误
    pub fn permission_denied(action: impl Into<String>) -> Self {
        Self::PermissionDenied {
            action: action.into(),
        }
    }
}

/// 领域模型结果类型
pub type DomainResult<T> = Result<T, DomainError>;

/// 存储层错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RepositoryError {
    #[error("record not found")]
    NotFound,
    #[error("record conflict")]
    Conflict,
    /// 语句目录中不存在该名称
    #[error("unknown statement: {name}")]
    UnknownStatement { name: String },
    #[error("storage error: {message}")]
    Storage { message: String },
    #[error("transaction timed out")]
    Timeout,
    /// 事务闭包内部 panic，事务已回滚
    #[error("[-9999] transaction aborted by fatal fault: {message}")]
    TransactionPanicked { message: String },
}

impl RepositoryError {
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    pub fn unknown_statement(name: impl Into<String>) -> Self {
        Self::UnknownStatement { name: name.into() }
    }
}
