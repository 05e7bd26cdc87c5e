//! 身份域用户档案服务
//!
//! 每个变更在同一事务中写入用户行与发件箱行（由
//! [`IdentityUserStore`] 保证），从不直接调用消息代理：
//! 发布由发件箱中继异步完成。

use std::sync::Arc;

use tracing::info;

use domain::{
    DomainError, IdentityEvent, IdentityUserStore, OutboxEvent, RepositoryError, UserId,
    UserProfile,
};

use crate::clock::Clock;
use crate::error::ApplicationError;

/// 档案更新请求。`None` 字段保持原值。
#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub username: Option<String>,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
}

pub struct ProfileService {
    store: Arc<dyn IdentityUserStore>,
    clock: Arc<dyn Clock>,
}

impl ProfileService {
    pub fn new(store: Arc<dyn IdentityUserStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub async fn create_user(
        &self,
        username: String,
        display_name: Option<String>,
    ) -> Result<UserProfile, ApplicationError> {
        let now = self.clock.now();
        let profile = UserProfile::new(username, display_name, now)?;

        let event = IdentityEvent::UserCreated {
            user_id: profile.id,
            username: profile.username.clone(),
            display_name: profile.display_name.clone(),
            avatar_url: profile.avatar_url.clone(),
            timestamp: now,
        };
        let row = OutboxEvent::from_identity_event(&event, now)?;

        let created = self.store.create(profile, row).await?;
        info!(user_id = %created.id, username = %created.username, "user created");
        Ok(created)
    }

    pub async fn update_user(
        &self,
        user_id: UserId,
        update: ProfileUpdate,
    ) -> Result<UserProfile, ApplicationError> {
        let mut profile = self
            .store
            .find_by_id(user_id)
            .await?
            .ok_or(DomainError::UserNotFound(user_id))?;

        if let Some(username) = update.username {
            if username.trim().is_empty() {
                return Err(DomainError::invalid_argument(
                    "username",
                    "username must not be empty",
                )
                .into());
            }
            profile.username = username;
        }
        if let Some(display_name) = update.display_name {
            profile.display_name = Some(display_name);
        }
        if let Some(avatar_url) = update.avatar_url {
            profile.avatar_url = Some(avatar_url);
        }

        let now = self.clock.now();
        profile.updated_at = now;

        let event = IdentityEvent::UserUpdated {
            user_id: profile.id,
            username: profile.username.clone(),
            display_name: profile.display_name.clone(),
            avatar_url: profile.avatar_url.clone(),
            timestamp: now,
        };
        let row = OutboxEvent::from_identity_event(&event, now)?;

        let updated = self.store.update(profile, row).await?;
        info!(user_id = %updated.id, "user profile updated");
        Ok(updated)
    }

    pub async fn delete_user(&self, user_id: UserId) -> Result<(), ApplicationError> {
        let now = self.clock.now();
        let event = IdentityEvent::UserDeleted {
            user_id,
            timestamp: now,
        };
        let row = OutboxEvent::from_identity_event(&event, now)?;

        match self.store.delete(user_id, row).await {
            Ok(()) => {
                info!(user_id = %user_id, "user deleted");
                Ok(())
            }
            Err(RepositoryError::NotFound) => Err(DomainError::UserNotFound(user_id).into()),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn get_user(&self, user_id: UserId) -> Result<UserProfile, ApplicationError> {
        self.store
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| DomainError::UserNotFound(user_id).into())
    }
}
