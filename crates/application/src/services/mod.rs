mod settings_service;
mod social_service;
mod user_service;

pub use settings_service::{SettingsService, SettingsServiceDependencies};
pub use social_service::{
    PeerView, RespondOutcome, SendChatRequest, SocialService, SocialServiceDependencies,
};
pub use user_service::{
    generate_handle, IssuedToken, UserService, UserServiceDependencies, MAX_GUESTS_PER_IP,
};
