//! 统一配置中心
//!
//! 提供宿主进程的全局配置管理，包括：
//! - 监听地址
//! - SQLite 数据库
//! - 令牌签名与混淆密钥
//! - 会话心跳/邮箱容量与 Hub 遥测周期
//!
//! 加载顺序：内置默认值 -> 可选 YAML 文件 -> `LANDROP_` 前缀的环境变量。

use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// 默认配置文件路径，可通过 `LANDROP_CONFIG` 覆盖
pub const DEFAULT_CONFIG_FILE: &str = "landrop.yaml";
const ENV_PREFIX: &str = "LANDROP_";

/// 全局应用配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate, Default)]
pub struct AppConfig {
    #[validate(nested)]
    pub server: ServerConfig,
    #[validate(nested)]
    pub database: DatabaseConfig,
    #[validate(nested)]
    pub token: TokenConfig,
    #[validate(nested)]
    pub session: SessionConfig,
    #[validate(nested)]
    pub hub: HubConfig,
    #[validate(nested)]
    pub transaction: TransactionConfig,
    pub log: LogConfig,
}

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ServerConfig {
    #[validate(length(min = 1))]
    pub host: String,
    #[validate(range(min = 1))]
    pub port: u16,
    pub bcrypt_cost: Option<u32>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 4321,
            bcrypt_cost: None,
        }
    }
}

/// 数据库配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DatabaseConfig {
    #[validate(length(min = 1))]
    pub url: String,
    #[validate(range(min = 1))]
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://app.db?mode=rwc".into(),
            max_connections: 5,
        }
    }
}

/// 令牌配置
///
/// `obfuscation_key` 只用于外层异或混淆，不构成安全边界；
/// 真正的信任边界是 `secret` 签名的内层令牌。
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct TokenConfig {
    #[validate(length(min = 8))]
    pub secret: String,
    #[validate(length(min = 1))]
    pub obfuscation_key: String,
    #[validate(length(min = 1))]
    pub issuer: String,
    /// 应用端登录令牌有效期（小时），默认 100 年
    #[validate(range(min = 1, max = 876000))]
    pub app_validity_hours: i64,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            secret: "KNTWcTMPxMbGPhUZskWn".into(),
            obfuscation_key: "xmn30241yv413y5b01vy".into(),
            issuer: "landrop_client".into(),
            app_validity_hours: 100 * 365 * 24,
        }
    }
}

/// 单个会话的传输参数
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SessionConfig {
    #[validate(range(min = 1))]
    pub mailbox_capacity: usize,
    #[validate(range(min = 1024))]
    pub max_message_bytes: usize,
    #[validate(range(min = 1))]
    pub read_deadline_secs: u64,
    #[validate(range(min = 1))]
    pub write_deadline_secs: u64,
    #[validate(range(min = 1))]
    pub ping_interval_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: 1024,
            max_message_bytes: 512 * 1024,
            read_deadline_secs: 30,
            write_deadline_secs: 10,
            ping_interval_secs: 10,
        }
    }
}

impl SessionConfig {
    pub fn read_deadline(&self) -> Duration {
        Duration::from_secs(self.read_deadline_secs)
    }

    pub fn write_deadline(&self) -> Duration {
        Duration::from_secs(self.write_deadline_secs)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }
}

/// Hub 配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct HubConfig {
    #[validate(range(min = 1))]
    pub telemetry_interval_secs: u64,
    pub telemetry_sample_gap_ms: u64,
    /// 为空时遥测推送给全部会话
    pub telemetry_role: Option<String>,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            telemetry_interval_secs: 3,
            telemetry_sample_gap_ms: 1000,
            telemetry_role: None,
        }
    }
}

impl HubConfig {
    pub fn telemetry_interval(&self) -> Duration {
        Duration::from_secs(self.telemetry_interval_secs)
    }

    pub fn telemetry_sample_gap(&self) -> Duration {
        Duration::from_millis(self.telemetry_sample_gap_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct TransactionConfig {
    #[validate(range(min = 1))]
    pub timeout_secs: u64,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self { timeout_secs: 60 }
    }
}

impl TransactionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

impl AppConfig {
    /// 按 默认值 -> 配置文件 -> 环境变量 的优先级加载配置
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("LANDROP_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_FILE.into());
        Self::from_figment(Self::figment(&path))
    }

    /// 构造配置源，便于测试中替换文件路径
    pub fn figment(path: &str) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(AppConfig::default()))
            .merge(Yaml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let cfg: AppConfig = figment
            .extract()
            .map_err(|err| ConfigError::Extract(err.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        Validate::validate(self).map_err(|err| ConfigError::Invalid(err.to_string()))?;

        if let Some(role) = &self.hub.telemetry_role {
            if !matches!(role.as_str(), "admin+" | "admin" | "guest") {
                return Err(ConfigError::Invalid(format!(
                    "hub.telemetry_role: unknown role {role}"
                )));
            }
        }
        if self.session.ping_interval_secs >= self.session.read_deadline_secs {
            return Err(ConfigError::Invalid(
                "session.ping_interval_secs must be shorter than read_deadline_secs".into(),
            ));
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

/// 配置错误类型
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Extract(String),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.port, 4321);
        assert_eq!(config.token.issuer, "landrop_client");
        assert_eq!(config.transaction.timeout(), Duration::from_secs(60));
        assert!(config.hub.telemetry_role.is_none());
    }

    #[test]
    fn file_and_env_override_defaults() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "landrop.yaml",
                r#"
server:
  port: 9000
session:
  mailbox_capacity: 16
"#,
            )?;
            jail.set_env("LANDROP_HUB__TELEMETRY_ROLE", "admin");
            jail.set_env("LANDROP_SERVER__HOST", "127.0.0.1");

            let config = AppConfig::from_figment(AppConfig::figment("landrop.yaml"))
                .map_err(|err| err.to_string())?;
            assert_eq!(config.server.port, 9000);
            assert_eq!(config.server.host, "127.0.0.1");
            assert_eq!(config.session.mailbox_capacity, 16);
            assert_eq!(config.hub.telemetry_role.as_deref(), Some("admin"));
            Ok(())
        });
    }

    #[test]
    fn rejects_unknown_telemetry_role() {
        let mut config = AppConfig::default();
        config.hub.telemetry_role = Some("root".into());
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn rejects_app_validity_beyond_a_century() {
        let mut config = AppConfig::default();
        config.token.app_validity_hours = 10_000_000_000;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        config.token.app_validity_hours = 876_000;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_ping_slower_than_read_deadline() {
        let mut config = AppConfig::default();
        config.session.ping_interval_secs = 30;
        assert!(config.validate().is_err());
    }
}
