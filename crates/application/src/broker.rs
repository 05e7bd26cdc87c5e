//! 消息代理端口
//!
//! 身份事件经由持久化管道（发件箱 -> Kafka）中继；
//! 实时聊天事件经由 Redis Pub/Sub 推送到网关。两条管道都是
//! 至少一次投递，下游必须幂等。

use async_trait::async_trait;
use domain::{ChatEvent, IdentityEvent};
use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum BrokerError {
    #[error("publish failed: {message}")]
    PublishFailed { message: String },
    #[error("broker unavailable: {message}")]
    Unavailable { message: String },
}

impl BrokerError {
    pub fn publish_failed(message: impl Into<String>) -> Self {
        Self::PublishFailed {
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }
}

/// 发件箱中继的下游：发布身份事件到持久主题。
#[async_trait]
pub trait IdentityEventPublisher: Send + Sync {
    async fn publish(&self, event: &IdentityEvent) -> Result<(), BrokerError>;
}

/// 实时事件发布：按会话频道或全局频道发布聊天事件。
#[async_trait]
pub trait ChatEventPublisher: Send + Sync {
    async fn publish(&self, event: &ChatEvent) -> Result<(), BrokerError>;
}
