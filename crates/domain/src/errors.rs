//! 领域模型错误定义
//!
//! 区分不变量违反（同步拒绝）与存储层错误，幂等冲突不在此建模，
//! 由调用方以无操作方式吸收。

use thiserror::Error;

use crate::value_objects::{ConversationId, MessageId, UserId};
use crate::MessageStatus;

/// 领域模型错误类型
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DomainError {
    /// 发送者不能推进自己消息的投递状态
    #[error("sender {user_id} cannot mark own message {message_id} as {target}")]
    OwnMessageStatus {
        user_id: UserId,
        message_id: MessageId,
        target: MessageStatus,
    },

    /// 非法的状态目标（如回退到 sent）
    #[error("invalid status target: {target} from {current}")]
    InvalidStatusTarget {
        current: MessageStatus,
        target: MessageStatus,
    },

    /// 用户不是会话参与者
    #[error("user {user_id} is not a participant of conversation {conversation_id}")]
    NotParticipant {
        user_id: UserId,
        conversation_id: ConversationId,
    },

    /// 重复的会话参与者
    #[error("user {user_id} already participates in conversation {conversation_id}")]
    DuplicateParticipant {
        user_id: UserId,
        conversation_id: ConversationId,
    },

    /// 会话不存在
    #[error("conversation {0} not found")]
    ConversationNotFound(ConversationId),

    /// 消息不存在
    #[error("message {0} not found")]
    MessageNotFound(MessageId),

    /// 用户不存在
    #[error("user {0} not found")]
    UserNotFound(UserId),

    /// 消息已被删除
    #[error("message {0} has been deleted")]
    MessageDeleted(MessageId),

    /// 验证错误
    #[error("invalid argument {field}: {reason}")]
    InvalidArgument { field: String, reason: String },
}

impl DomainError {
    pub fn invalid_argument(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// 存储层错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RepositoryError {
    #[error("resource not found")]
    NotFound,

    #[error("resource already exists")]
    Conflict,

    #[error("storage error: {message}")]
    Storage { message: String },
}

impl RepositoryError {
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }
}
