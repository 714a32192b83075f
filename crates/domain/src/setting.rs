use serde::{Deserialize, Serialize};

use crate::errors::DomainError;
use crate::services::MAX_VALIDITY_HOURS;
use crate::value_objects::Timestamp;

/// 全局设置行的固定键
pub const SETTINGS_KEY: &str = "config";

/// 全局设置（单例）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Setting {
    pub name: String,
    pub app_name: String,
    pub port: u16,
    /// 访客令牌有效期（小时）
    pub token_expiry_time: i64,
    pub shared_dir: String,
    pub version: String,
    pub created_at: Timestamp,
    pub modified_at: Timestamp,
}

impl Setting {
    pub fn defaults(shared_dir: impl Into<String>, now: Timestamp) -> Self {
        Self {
            name: SETTINGS_KEY.into(),
            app_name: "LanDrop".into(),
            port: 4321,
            token_expiry_time: 24,
            shared_dir: shared_dir.into(),
            version: "V1.0.0".into(),
            created_at: now,
            modified_at: now,
        }
    }

    /// 按白名单字段更新
    pub fn apply(&mut self, patch: SettingsPatch, now: Timestamp) -> Result<(), DomainError> {
        patch.validate()?;
        if let Some(app_name) = patch.app_name {
            self.app_name = app_name;
        }
        if let Some(port) = patch.port {
            self.port = port;
        }
        if let Some(hours) = patch.token_expiry_time {
            self.token_expiry_time = hours;
        }
        if let Some(dir) = patch.shared_dir {
            self.shared_dir = dir;
        }
        if let Some(version) = patch.version {
            self.version = version;
        }
        self.modified_at = now;
        Ok(())
    }
}

/// 允许修改的设置字段；未知字段在反序列化时即被拒绝
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SettingsPatch {
    pub app_name: Option<String>,
    pub port: Option<u16>,
    pub token_expiry_time: Option<i64>,
    pub shared_dir: Option<String>,
    pub version: Option<String>,
}

impl SettingsPatch {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.app_name.is_none()
            && self.port.is_none()
            && self.token_expiry_time.is_none()
            && self.shared_dir.is_none()
            && self.version.is_none()
        {
            return Err(DomainError::invalid_argument("settings", "nothing to update"));
        }
        if self.port == Some(0) {
            return Err(DomainError::invalid_argument("port", "must be positive"));
        }
        if matches!(self.token_expiry_time, Some(hours) if hours <= 0) {
            return Err(DomainError::invalid_argument(
                "tokenExpiryTime",
                "must be positive",
            ));
        }
        if matches!(self.token_expiry_time, Some(hours) if hours > MAX_VALIDITY_HOURS) {
            return Err(DomainError::invalid_argument(
                "tokenExpiryTime",
                format!("must not exceed {MAX_VALIDITY_HOURS} hours"),
            ));
        }
        for (field, value) in [
            ("appName", &self.app_name),
            ("sharedDir", &self.shared_dir),
            ("version", &self.version),
        ] {
            if matches!(value, Some(v) if v.trim().is_empty()) {
                return Err(DomainError::invalid_argument(field, "must not be empty"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn patch_only_touches_given_fields() {
        let now = Utc::now();
        let mut setting = Setting::defaults("/srv/shared", now);
        setting
            .apply(
                SettingsPatch {
                    port: Some(8080),
                    ..Default::default()
                },
                now,
            )
            .unwrap();
        assert_eq!(setting.port, 8080);
        assert_eq!(setting.app_name, "LanDrop");
        assert_eq!(setting.token_expiry_time, 24);
    }

    #[test]
    fn unknown_fields_are_refused() {
        let parsed: Result<SettingsPatch, _> =
            serde_json::from_value(serde_json::json!({ "name": "hijack" }));
        assert!(parsed.is_err());
    }

    #[test]
    fn non_positive_expiry_is_invalid() {
        let patch = SettingsPatch {
            token_expiry_time: Some(0),
            ..Default::default()
        };
        assert!(patch.validate().is_err());
        assert!(SettingsPatch::default().validate().is_err());
    }

    #[test]
    fn expiry_beyond_upper_bound_is_invalid() {
        let patch = SettingsPatch {
            token_expiry_time: Some(10_000_000_000),
            ..Default::default()
        };
        assert!(patch.validate().is_err());

        let at_bound = SettingsPatch {
            token_expiry_time: Some(MAX_VALIDITY_HOURS),
            ..Default::default()
        };
        assert!(at_bound.validate().is_ok());
    }
}
