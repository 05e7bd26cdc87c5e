//! Redis 在线与输入状态存储
//!
//! 状态放在共享的键值存储里，多个网关实例看到同一份真相：
//! - `presence:{user_id}` -> socket_id，在线标记
//! - `last-seen:{user_id}` -> RFC3339 时间戳
//! - `typing:{conversation_id}:{user_id}`，带 TTL，过期即"未在输入"

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::{info, warn};
use uuid::Uuid;

use application::{PresenceError, PresenceStore, TypingStore};
use domain::{ConversationId, Timestamp, UserId};

use crate::config::RedisConfig;
use crate::redis::{RedisError, RedisResult};

fn presence_key(user_id: UserId) -> String {
    format!("presence:{}", user_id)
}

fn last_seen_key(user_id: UserId) -> String {
    format!("last-seen:{}", user_id)
}

fn typing_key(conversation_id: ConversationId, user_id: UserId) -> String {
    format!("typing:{}:{}", conversation_id, user_id)
}

/// Redis 在线状态存储
pub struct RedisPresenceStore {
    manager: ConnectionManager,
}

impl RedisPresenceStore {
    pub async fn new(config: &RedisConfig) -> RedisResult<Self> {
        let client =
            redis::Client::open(config.url.as_str()).map_err(|e| RedisError::ConfigError {
                message: format!("创建 Redis 客户端失败: {}", e),
            })?;

        let manager =
            ConnectionManager::new(client)
                .await
                .map_err(|e| RedisError::ConnectionError {
                    message: format!("连接 Redis 失败: {}", e),
                })?;

        info!("Redis 在线状态存储创建成功，已连接到: {}", config.url);

        Ok(Self { manager })
    }
}

fn map_redis_err(err: redis::RedisError) -> PresenceError {
    PresenceError::new(err.to_string())
}

#[async_trait]
impl PresenceStore for RedisPresenceStore {
    async fn set_online(&self, user_id: UserId, socket_id: &str) -> Result<(), PresenceError> {
        let mut conn = self.manager.clone();
        let _: () = conn
            .set(presence_key(user_id), socket_id)
            .await
            .map_err(map_redis_err)?;
        Ok(())
    }

    async fn set_offline(&self, user_id: UserId) -> Result<Option<Timestamp>, PresenceError> {
        let now = Utc::now();
        let mut conn = self.manager.clone();

        let _: () = conn
            .del(presence_key(user_id))
            .await
            .map_err(map_redis_err)?;
        let _: () = conn
            .set(last_seen_key(user_id), now.to_rfc3339())
            .await
            .map_err(map_redis_err)?;

        Ok(Some(now))
    }

    async fn is_online(&self, user_id: UserId) -> Result<bool, PresenceError> {
        let mut conn = self.manager.clone();
        conn.exists(presence_key(user_id))
            .await
            .map_err(map_redis_err)
    }
}

#[async_trait]
impl TypingStore for RedisPresenceStore {
    async fn mark_typing(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
        ttl: Duration,
    ) -> Result<(), PresenceError> {
        let mut conn = self.manager.clone();
        let _: () = conn
            .set_ex(
                typing_key(conversation_id, user_id),
                1,
                ttl.as_secs().max(1),
            )
            .await
            .map_err(map_redis_err)?;
        Ok(())
    }

    async fn clear_typing(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> Result<(), PresenceError> {
        let mut conn = self.manager.clone();
        let _: () = conn
            .del(typing_key(conversation_id, user_id))
            .await
            .map_err(map_redis_err)?;
        Ok(())
    }

    async fn typing_users(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Vec<UserId>, PresenceError> {
        let pattern = format!("typing:{}:*", conversation_id);
        let mut conn = self.manager.clone();

        let keys: Vec<String> = {
            let mut iter = conn
                .scan_match::<_, String>(&pattern)
                .await
                .map_err(map_redis_err)?;
            let mut keys = Vec::new();
            while let Some(key) = iter.next_item().await {
                keys.push(key);
            }
            keys
        };

        let mut users = Vec::with_capacity(keys.len());
        for key in keys {
            match key.rsplit(':').next().map(Uuid::from_str) {
                Some(Ok(id)) => users.push(UserId::from(id)),
                _ => warn!(key, "malformed typing marker key, skipping"),
            }
        }
        Ok(users)
    }
}
