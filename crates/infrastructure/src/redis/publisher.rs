//! Redis 实时事件发布者
//!
//! 按会话频道或全局频道发布聊天事件。ConnectionManager 内部
//! 处理断线重连，克隆开销很低，每次发布克隆一份使用。

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::{debug, info};

use application::{BrokerError, ChatEventPublisher};
use domain::ChatEvent;

use crate::config::RedisConfig;
use crate::redis::{RedisError, RedisResult};

/// Redis 事件发布者
///
/// 会话级事件发往 `{prefix}{conversation_id}`，全局事件
/// （在线状态变更）发往全局频道。
pub struct RedisEventPublisher {
    manager: ConnectionManager,
    channel_prefix: String,
    global_channel: String,
}

impl RedisEventPublisher {
    /// 创建新的 Redis 发布者
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

        info!("Redis 发布者创建成功，已连接到: {}", config.url);

        Ok(Self {
            manager,
            channel_prefix: config.conversation_channel_prefix.clone(),
            global_channel: config.global_channel.clone(),
        })
    }

    /// 事件的目标频道。
    fn channel_for(&self, event: &ChatEvent) -> String {
        match event.conversation_id() {
            Some(id) => format!("{}{}", self.channel_prefix, id),
            None => self.global_channel.clone(),
        }
    }

    async fn publish_event(&self, event: &ChatEvent) -> RedisResult<u32> {
        let payload =
            serde_json::to_string(event).map_err(|e| RedisError::SerializationError {
                message: format!("序列化事件失败: {}", e),
            })?;
        let channel = self.channel_for(event);

        let mut conn = self.manager.clone();
        let subscriber_count: u32 =
            conn.publish(&channel, &payload)
                .await
                .map_err(|e| RedisError::PublishError {
                    message: format!("发布到频道 {} 失败: {}", channel, e),
                })?;

        debug!(
            event_type = event.event_type(),
            channel = %channel,
            subscribers = subscriber_count,
            "chat event published"
        );
        Ok(subscriber_count)
    }
}

#[async_trait]
impl ChatEventPublisher for RedisEventPublisher {
    async fn publish(&self, event: &ChatEvent) -> Result<(), BrokerError> {
        self.publish_event(event).await.map_err(|e| match e {
            RedisError::ConnectionError { message } => BrokerError::unavailable(message),
            other => BrokerError::publish_failed(other.to_string()),
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use domain::{ConversationId, UserId};

    #[test]
    fn conversation_events_target_conversation_channel() {
        let conversation_id = ConversationId::new();
        let event = ChatEvent::TypingIndicator {
            conversation_id,
            user_id: UserId::new(),
            typing: true,
            timestamp: Utc::now(),
        };

        assert_eq!(
            event.conversation_id(),
            Some(conversation_id),
            "typing indicator is conversation-scoped"
        );
    }

    #[test]
    fn presence_events_target_global_channel() {
        let event = ChatEvent::UserPresenceUpdate {
            user_id: UserId::new(),
            is_online: false,
            last_seen: Some(Utc::now()),
        };
        assert!(event.conversation_id().is_none());
    }

    #[tokio::test]
    async fn test_publisher_creation() {
        // 需要运行中的 Redis 实例才能通过
        if std::env::var("REDIS_INTEGRATION_TEST").is_ok() {
            let publisher = RedisEventPublisher::new(&RedisConfig::default()).await;
            assert!(publisher.is_ok());
        }
    }
}
