//! 在线与输入状态端口
//!
//! 状态以带 TTL 的键存放在共享的键值存储中，而非进程内可变映射，
//! 保证多网关实例下的正确性。输入标记的缺失（包括 TTL 过期）
//! 本身就是"未在输入"的含义，不存在显式的"停止输入"记录。

use std::time::Duration;

use async_trait::async_trait;
use domain::{ConversationId, Timestamp, UserId};
use thiserror::Error;

/// 输入标记的存活时间。崩溃的客户端在这个窗口内自动清除。
pub const TYPING_TTL: Duration = Duration::from_secs(10);

#[derive(Debug, Error, Clone)]
#[error("presence store error: {message}")]
pub struct PresenceError {
    pub message: String,
}

impl PresenceError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// 在线状态存储。记录的是"最后已知"状态，不是权威真相。
#[async_trait]
pub trait PresenceStore: Send + Sync {
    async fn set_online(&self, user_id: UserId, socket_id: &str) -> Result<(), PresenceError>;

    /// 标记离线并返回最后在线时间。
    async fn set_offline(&self, user_id: UserId) -> Result<Option<Timestamp>, PresenceError>;

    async fn is_online(&self, user_id: UserId) -> Result<bool, PresenceError>;
}

/// 输入标记存储。
#[async_trait]
pub trait TypingStore: Send + Sync {
    /// 写入（或刷新）带 TTL 的输入标记。
    async fn mark_typing(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
        ttl: Duration,
    ) -> Result<(), PresenceError>;

    /// 删除输入标记。标记不存在时也是成功。
    async fn clear_typing(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> Result<(), PresenceError>;

    /// 会话中当前持有未过期标记的用户。
    async fn typing_users(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Vec<UserId>, PresenceError>;
}
