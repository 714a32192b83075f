use std::sync::Arc;

use domain::{
    DomainError, NewUser, ProfileUpdate, RepositoryError, TokenClaims, TokenService, User, UserId,
    UserProfile, UserRole,
};
use rand::Rng;
use serde::Serialize;

use crate::{
    clock::Clock,
    error::ApplicationError,
    password::{guest_initial_password, PasswordHasher},
    repository::UserRepository,
    services::SettingsService,
};

/// 同一来源地址最多创建的访客数
pub const MAX_GUESTS_PER_IP: i64 = 5;
const HANDLE_LEN: usize = 8;
const HANDLE_ATTEMPTS: usize = 5;
const HANDLE_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// 生成 8 位字母数字短名
pub fn generate_handle() -> String {
    let mut rng = rand::rng();
    (0..HANDLE_LEN)
        .map(|_| HANDLE_CHARSET[rng.random_range(0..HANDLE_CHARSET.len())] as char)
        .collect()
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedToken {
    pub token: String,
    pub user: UserProfile,
    pub expires_in_hours: i64,
}

pub struct UserServiceDependencies {
    pub user_repository: Arc<dyn UserRepository>,
    pub settings_service: Arc<SettingsService>,
    pub password_hasher: Arc<dyn PasswordHasher>,
    pub token_service: Arc<TokenService>,
    pub clock: Arc<dyn Clock>,
    /// 应用端登录令牌有效期（小时）
    pub app_token_validity_hours: i64,
}

pub struct UserService {
    deps: UserServiceDependencies,
}

impl UserService {
    pub fn new(deps: UserServiceDependencies) -> Self {
        Self { deps }
    }

    /// 访客自助注册
    pub async fn register_guest(
        &self,
        nick_name: &str,
        ip: &str,
    ) -> Result<UserProfile, ApplicationError> {
        let nick_name = nick_name.trim();
        if nick_name.is_empty() || nick_name.chars().count() > 32 {
            return Err(DomainError::invalid_argument("nickName", "1 to 32 characters").into());
        }

        let owned = self.deps.user_repository.count_guests_by_ip(ip).await?;
        if owned >= MAX_GUESTS_PER_IP {
            return Err(DomainError::DeviceLimitReached {
                limit: MAX_GUESTS_PER_IP as usize,
            }
            .into());
        }

        let password = self
            .deps
            .password_hasher
            .hash(&guest_initial_password(nick_name))
            .await?;

        for _ in 0..HANDLE_ATTEMPTS {
            let candidate = NewUser {
                name: generate_handle(),
                nick_name: nick_name.to_owned(),
                password: password.clone(),
                role: UserRole::Guest,
                ip: ip.to_owned(),
                created_at: self.deps.clock.now(),
            };
            match self.deps.user_repository.create(candidate).await {
                Ok(user) => {
                    tracing::info!(user_id = %user.id, ip = %ip, "访客已注册");
                    return Ok(user.profile());
                }
                Err(RepositoryError::Conflict) => continue,
                Err(err) => return Err(err.into()),
            }
        }
        Err(ApplicationError::infrastructure("could not allocate a unique handle"))
    }

    pub async fn list_guests_by_ip(&self, ip: &str) -> Result<Vec<UserProfile>, ApplicationError> {
        let users = self.deps.user_repository.list_guests_by_ip(ip).await?;
        Ok(users.iter().map(User::profile).collect())
    }

    /// 访客凭 id + 短名换取令牌，有效期取自全局设置
    pub async fn issue_guest_token(
        &self,
        user_id: UserId,
        name: &str,
    ) -> Result<IssuedToken, ApplicationError> {
        let user = self
            .deps
            .user_repository
            .find_by_id(user_id)
            .await?
            .filter(|user| user.name == name)
            .ok_or(DomainError::UserNotFound)?;

        let setting = self.deps.settings_service.load().await?;
        self.issue_for(&user, setting.token_expiry_time)
    }

    /// 账号为短名或数字 id
    pub async fn login(
        &self,
        account: &str,
        password: &str,
        ip: &str,
    ) -> Result<IssuedToken, ApplicationError> {
        let account = account.trim();
        let mut user = self.deps.user_repository.find_by_name(account).await?;
        if user.is_none() {
            if let Ok(id) = account.parse::<i64>() {
                user = self.deps.user_repository.find_by_id(UserId(id)).await?;
            }
        }
        let mut user = user.ok_or(DomainError::InvalidCredentials)?;

        if !self.deps.password_hasher.verify(password, &user.password).await? {
            tracing::warn!(user_id = %user.id, "登录密码错误");
            return Err(DomainError::InvalidCredentials.into());
        }

        self.deps.user_repository.update_ip(user.id, ip).await?;
        user.ip = ip.to_owned();
        self.issue_for(&user, self.deps.app_token_validity_hours)
    }

    pub fn authenticate(&self, token: &str) -> Result<TokenClaims, ApplicationError> {
        Ok(self.deps.token_service.parse(token)?)
    }

    /// 只能注销令牌持有者自己；连带删除聊天记录与好友关系
    pub async fn unbind(
        &self,
        identity: &TokenClaims,
        user_id: UserId,
        name: &str,
    ) -> Result<u64, ApplicationError> {
        if identity.user_id != user_id || identity.user_name != name {
            return Err(DomainError::permission_denied("unbind another user").into());
        }
        if user_id == UserId::SUPER_ADMIN {
            return Err(DomainError::permission_denied("unbind the super administrator").into());
        }

        let removed = self.deps.user_repository.delete_cascade(user_id).await?;
        if removed == 0 {
            return Err(DomainError::UserNotFound.into());
        }
        tracing::info!(user_id = %user_id, removed, "用户已注销");
        Ok(removed)
    }

    pub async fn update_profile(
        &self,
        identity: &TokenClaims,
        update: ProfileUpdate,
    ) -> Result<UserProfile, ApplicationError> {
        update.validate()?;
        let user = self
            .deps
            .user_repository
            .update_profile(identity.user_id, &update)
            .await
            .map_err(|err| match err {
                RepositoryError::NotFound => ApplicationError::from(DomainError::UserNotFound),
                other => other.into(),
            })?;
        Ok(user.profile())
    }

    fn issue_for(&self, user: &User, validity_hours: i64) -> Result<IssuedToken, ApplicationError> {
        let token = self
            .deps
            .token_service
            .issue(user.role, user.id, &user.name, validity_hours)?;
        Ok(IssuedToken {
            token,
            user: user.profile(),
            expires_in_hours: validity_hours,
        })
    }
}
