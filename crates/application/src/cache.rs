//! 会话列表缓存端口
//!
//! 短 TTL 的读穿缓存。任何影响参与者视图的写操作都删除对应条目，
//! 从不就地修补。缓存正确性是尽力而为：失败只记录日志，
//! 权威数据始终来自关系存储。

use std::time::Duration;

use async_trait::async_trait;
use domain::UserId;
use thiserror::Error;

#[derive(Debug, Error, Clone)]
#[error("cache error: {message}")]
pub struct CacheError {
    pub message: String,
}

impl CacheError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// 某用户会话列表的缓存键。
pub fn conversation_list_key(user_id: UserId) -> String {
    format!("conversation-list:{}", user_id)
}

#[async_trait]
pub trait ConversationCache: Send + Sync {
    async fn get(&self, user_id: UserId) -> Result<Option<String>, CacheError>;

    async fn put(&self, user_id: UserId, payload: String, ttl: Duration)
        -> Result<(), CacheError>;

    /// 删除条目。条目不存在时也是成功。
    async fn invalidate(&self, user_id: UserId) -> Result<(), CacheError>;
}
