use std::sync::Arc;

use domain::{Setting, SettingsPatch};

use crate::{clock::Clock, error::ApplicationError, repository::SettingsRepository};

pub struct SettingsServiceDependencies {
    pub settings_repository: Arc<dyn SettingsRepository>,
    pub clock: Arc<dyn Clock>,
    /// 首次读取时写入的共享目录
    pub default_shared_dir: String,
}

/// 全局设置：首次读取时按默认值落库，之后只能按白名单字段修改
pub struct SettingsService {
    deps: SettingsServiceDependencies,
}

impl SettingsService {
    pub fn new(deps: SettingsServiceDependencies) -> Self {
        Self { deps }
    }

    pub async fn load(&self) -> Result<Setting, ApplicationError> {
        if let Some(setting) = self.deps.settings_repository.load().await? {
            return Ok(setting);
        }
        let defaults = Setting::defaults(self.deps.default_shared_dir.clone(), self.deps.clock.now());
        let setting = self.deps.settings_repository.insert_default(&defaults).await?;
        tracing::info!(app_name = %setting.app_name, port = setting.port, "已写入默认设置");
        Ok(setting)
    }

    pub async fn update(&self, patch: SettingsPatch) -> Result<Setting, ApplicationError> {
        let mut setting = self.load().await?;
        setting.apply(patch, self.deps.clock.now())?;
        Ok(self.deps.settings_repository.save(&setting).await?)
    }
}
