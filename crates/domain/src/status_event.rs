//! 消息状态审计行
//!
//! 只追加，从不更新或删除。每次被接受的状态推进、每条被
//! "全部已读"覆盖的消息各产生一行。

use serde::{Deserialize, Serialize};

use crate::message::MessageStatus;
use crate::value_objects::{ConversationId, MessageId, Timestamp, UserId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusEvent {
    pub message_id: MessageId,
    pub conversation_id: ConversationId,
    pub user_id: UserId,
    pub status: MessageStatus,
    pub previous_status: Option<MessageStatus>,
    pub timestamp: Timestamp,
    pub device_id: Option<String>,
}

impl StatusEvent {
    pub fn new(
        message_id: MessageId,
        conversation_id: ConversationId,
        user_id: UserId,
        status: MessageStatus,
        previous_status: Option<MessageStatus>,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            message_id,
            conversation_id,
            user_id,
            status,
            previous_status,
            timestamp,
            device_id: None,
        }
    }

    pub fn with_device(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }
}
