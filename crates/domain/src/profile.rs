//! 身份域用户档案与消息域物化副本
//!
//! [`UserProfile`] 由身份服务拥有；[`ReplicaProfile`] 是消息服务本地的
//! 读优化副本，只由投影器依据事件更新，请求处理器从不直接修改。

use serde::{Deserialize, Serialize};

use crate::errors::DomainError;
use crate::value_objects::{Timestamp, UserId};

/// 身份服务拥有的用户档案。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: UserId,
    pub username: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl UserProfile {
    pub fn new(
        username: String,
        display_name: Option<String>,
        created_at: Timestamp,
    ) -> Result<Self, DomainError> {
        if username.trim().is_empty() {
            return Err(DomainError::invalid_argument(
                "username",
                "username must not be empty",
            ));
        }
        Ok(Self {
            id: UserId::new(),
            username,
            display_name,
            avatar_url: None,
            created_at,
            updated_at: created_at,
        })
    }
}

/// 消息服务侧的物化用户副本。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicaProfile {
    pub subject_id: UserId,
    pub username: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub is_online: bool,
    pub last_seen: Option<Timestamp>,
    pub updated_at: Timestamp,
}

impl ReplicaProfile {
    /// Last-write-wins 合并：仅当来者的 `updated_at` 更新时才应用。
    ///
    /// 返回是否发生了变更。重复或乱序的旧事件被吸收为无操作，
    /// 保证事件重放的幂等性。
    pub fn absorb(&mut self, incoming: &ReplicaProfile) -> bool {
        if incoming.updated_at <= self.updated_at {
            return false;
        }
        self.username = incoming.username.clone();
        self.display_name = incoming.display_name.clone();
        self.avatar_url = incoming.avatar_url.clone();
        self.updated_at = incoming.updated_at;
        true
    }
}
