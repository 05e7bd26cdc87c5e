//! 消息实体与投递状态机
//!
//! 状态机 `sent -> delivered -> read` 单调推进：重复或回退的标记
//! 报告为"已达到或越过目标状态"，不视为错误，也不破坏已有状态。

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::DomainError;
use crate::value_objects::{ConversationId, MessageId, Timestamp, UserId};

/// 消息投递状态，派生的顺序即状态机顺序。
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Sent,
    Delivered,
    Read,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Sent => "sent",
            MessageStatus::Delivered => "delivered",
            MessageStatus::Read => "read",
        }
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 一次状态推进的结果。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusTransition {
    /// 状态被推进，记录推进前的状态用于审计。
    Applied { previous: MessageStatus },
    /// 已处于目标状态或更高状态，无操作。
    AlreadyAtOrBeyond,
}

impl StatusTransition {
    pub fn is_applied(&self) -> bool {
        matches!(self, StatusTransition::Applied { .. })
    }
}

/// 消息实体
///
/// `status` 为消息行上的粗粒度全局状态；逐接收者的精确轨迹
/// 记录在 [`crate::StatusEvent`] 审计行中。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub content: String,
    pub status: MessageStatus,
    pub delivered_at: Option<Timestamp>,
    pub read_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub edited_at: Option<Timestamp>,
    pub deleted_at: Option<Timestamp>,
}

impl Message {
    pub fn new(
        conversation_id: ConversationId,
        sender_id: UserId,
        content: String,
        created_at: Timestamp,
    ) -> Result<Self, DomainError> {
        if content.trim().is_empty() {
            return Err(DomainError::invalid_argument(
                "content",
                "message content must not be empty",
            ));
        }

        Ok(Self {
            id: MessageId::new(),
            conversation_id,
            sender_id,
            content,
            status: MessageStatus::Sent,
            delivered_at: None,
            read_at: None,
            created_at,
            edited_at: None,
            deleted_at: None,
        })
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// 接收者推进消息状态。
    ///
    /// 发送者不能推进自己消息的状态；目标必须高于 `sent`；
    /// 已达到或越过目标状态时返回 [`StatusTransition::AlreadyAtOrBeyond`]。
    pub fn advance_status(
        &mut self,
        actor: UserId,
        target: MessageStatus,
        at: Timestamp,
    ) -> Result<StatusTransition, DomainError> {
        if actor == self.sender_id {
            return Err(DomainError::OwnMessageStatus {
                user_id: actor,
                message_id: self.id,
                target,
            });
        }

        if target == MessageStatus::Sent {
            return Err(DomainError::InvalidStatusTarget {
                current: self.status,
                target,
            });
        }

        if self.status >= target {
            return Ok(StatusTransition::AlreadyAtOrBeyond);
        }

        let previous = self.status;
        self.status = target;
        match target {
            MessageStatus::Delivered => {
                self.delivered_at.get_or_insert(at);
            }
            MessageStatus::Read => {
                // 直接从 sent 跳到 read 时，送达时间与阅读时间一致
                self.delivered_at.get_or_insert(at);
                self.read_at.get_or_insert(at);
            }
            MessageStatus::Sent => unreachable!(),
        }

        Ok(StatusTransition::Applied { previous })
    }

    /// 发送者编辑消息内容。
    pub fn edit(
        &mut self,
        actor: UserId,
        content: String,
        at: Timestamp,
    ) -> Result<(), DomainError> {
        if actor != self.sender_id {
            return Err(DomainError::invalid_argument(
                "actor",
                "only the sender may edit a message",
            ));
        }
        if self.is_deleted() {
            return Err(DomainError::MessageDeleted(self.id));
        }
        if content.trim().is_empty() {
            return Err(DomainError::invalid_argument(
                "content",
                "message content must not be empty",
            ));
        }

        self.content = content;
        self.edited_at = Some(at);
        Ok(())
    }

    /// 发送者软删除消息。幂等：重复删除是无操作。
    pub fn soft_delete(&mut self, actor: UserId, at: Timestamp) -> Result<(), DomainError> {
        if actor != self.sender_id {
            return Err(DomainError::invalid_argument(
                "actor",
                "only the sender may delete a message",
            ));
        }
        if self.deleted_at.is_none() {
            self.deleted_at = Some(at);
        }
        Ok(())
    }
}
