use std::sync::Arc;

use application::{Hub, SettingsService, SharedFileDirectory, SocialService, UserService};
use config::SessionConfig;

#[derive(Clone)]
pub struct AppState {
    pub user_service: Arc<UserService>,
    pub social_service: Arc<SocialService>,
    pub settings_service: Arc<SettingsService>,
    pub shared_files: Arc<dyn SharedFileDirectory>,
    /// 连接注册中心，连接入口与处理器共用同一个实例
    pub hub: Hub,
    pub session: Arc<SessionConfig>,
}

impl AppState {
    pub fn new(
        user_service: Arc<UserService>,
        social_service: Arc<SocialService>,
        settings_service: Arc<SettingsService>,
        shared_files: Arc<dyn SharedFileDirectory>,
        hub: Hub,
        session: SessionConfig,
    ) -> Self {
        Self {
            user_service,
            social_service,
            settings_service,
            shared_files,
            hub,
            session: Arc::new(session),
        }
    }
}
