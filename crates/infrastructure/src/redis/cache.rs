//! Redis 会话列表缓存
//!
//! 短 TTL 的读穿缓存条目，键形如 `conversation-list:{user_id}`。
//! 失效就是删除键；条目不存在时删除也算成功。

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::info;

use application::{conversation_list_key, CacheError, ConversationCache};
use domain::UserId;

use crate::config::RedisConfig;
use crate::redis::{RedisError, RedisResult};

/// Redis 会话列表缓存
pub struct RedisConversationCache {
    manager: ConnectionManager,
}

impl RedisConversationCache {
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

        info!("Redis 会话列表缓存创建成功，已连接到: {}", config.url);

        Ok(Self { manager })
    }
}

fn map_redis_err(err: redis::RedisError) -> CacheError {
    CacheError::new(err.to_string())
}

#[async_trait]
impl ConversationCache for RedisConversationCache {
    async fn get(&self, user_id: UserId) -> Result<Option<String>, CacheError> {
        let mut conn = self.manager.clone();
        conn.get(conversation_list_key(user_id))
            .await
            .map_err(map_redis_err)
    }

    async fn put(
        &self,
        user_id: UserId,
        payload: String,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let mut conn = self.manager.clone();
        let _: () = conn
            .set_ex(
                conversation_list_key(user_id),
                payload,
                ttl.as_secs().max(1),
            )
            .await
            .map_err(map_redis_err)?;
        Ok(())
    }

    async fn invalidate(&self, user_id: UserId) -> Result<(), CacheError> {
        let mut conn = self.manager.clone();
        let _: () = conn
            .del(conversation_list_key(user_id))
            .await
            .map_err(map_redis_err)?;
        Ok(())
    }
}
