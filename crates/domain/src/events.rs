//! 领域事件定义
//!
//! [`IdentityEvent`] 是身份域经由发件箱/Kafka 中继到消息域的持久事件；
//! [`ChatEvent`] 是经由 Redis Pub/Sub 推送到网关的实时事件。
//! 两者都是封闭的带标签联合，订阅方的分发可以被穷尽检查。

use serde::{Deserialize, Serialize};

use crate::conversation::Conversation;
use crate::message::Message;
use crate::value_objects::{ConversationId, MessageId, Timestamp, UserId};

/// 身份域事件（发件箱负载）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IdentityEvent {
    UserCreated {
        user_id: UserId,
        username: String,
        display_name: Option<String>,
        avatar_url: Option<String>,
        timestamp: Timestamp,
    },
    UserUpdated {
        user_id: UserId,
        username: String,
        display_name: Option<String>,
        avatar_url: Option<String>,
        timestamp: Timestamp,
    },
    UserDeleted {
        user_id: UserId,
        timestamp: Timestamp,
    },
}

impl IdentityEvent {
    /// 事件主体，同时作为发件箱行与 Kafka 分区键。
    pub fn subject_id(&self) -> UserId {
        match self {
            IdentityEvent::UserCreated { user_id, .. }
            | IdentityEvent::UserUpdated { user_id, .. }
            | IdentityEvent::UserDeleted { user_id, .. } => *user_id,
        }
    }

    pub fn timestamp(&self) -> Timestamp {
        match self {
            IdentityEvent::UserCreated { timestamp, .. }
            | IdentityEvent::UserUpdated { timestamp, .. }
            | IdentityEvent::UserDeleted { timestamp, .. } => *timestamp,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            IdentityEvent::UserCreated { .. } => "USER_CREATED",
            IdentityEvent::UserUpdated { .. } => "USER_UPDATED",
            IdentityEvent::UserDeleted { .. } => "USER_DELETED",
        }
    }
}

/// 实时聊天事件（网关推送负载）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    /// 新消息，广播给房间内所有会话，包括发送者自己的回显
    NewMessage { message: Message },

    /// 消息编辑
    MessageUpdated { message: Message },

    /// 消息删除
    MessageDeleted {
        message_id: MessageId,
        conversation_id: ConversationId,
        deleted_by: UserId,
        timestamp: Timestamp,
    },

    /// 消息送达回执，广播给房间但排除操作者
    MessageDelivered {
        message_id: MessageId,
        conversation_id: ConversationId,
        user_id: UserId,
        timestamp: Timestamp,
    },

    /// 消息已读回执，广播给房间但排除操作者
    MessageRead {
        message_id: MessageId,
        conversation_id: ConversationId,
        user_id: UserId,
        timestamp: Timestamp,
    },

    /// 会话级全部已读，携带新覆盖的消息 id 列表
    ConversationRead {
        conversation_id: ConversationId,
        user_id: UserId,
        message_ids: Vec<MessageId>,
        timestamp: Timestamp,
    },

    /// 会话创建，单播给每个被邀请的参与者（此时还没有共享房间）
    ConversationCreated {
        conversation: Conversation,
        participant_ids: Vec<UserId>,
    },

    /// 输入状态指示
    TypingIndicator {
        conversation_id: ConversationId,
        user_id: UserId,
        typing: bool,
        timestamp: Timestamp,
    },

    /// 用户在线状态变更，全局广播
    UserPresenceUpdate {
        user_id: UserId,
        is_online: bool,
        last_seen: Option<Timestamp>,
    },
}

impl ChatEvent {
    /// 事件类型名称（与 WebSocket 协议的帧名一致）。
    pub fn event_type(&self) -> &'static str {
        match self {
            ChatEvent::NewMessage { .. } => "new_message",
            ChatEvent::MessageUpdated { .. } => "message_updated",
            ChatEvent::MessageDeleted { .. } => "message_deleted",
            ChatEvent::MessageDelivered { .. } => "message_delivered",
            ChatEvent::MessageRead { .. } => "message_read",
            ChatEvent::ConversationRead { .. } => "conversation_read",
            ChatEvent::ConversationCreated { .. } => "conversation_created",
            ChatEvent::TypingIndicator { .. } => "typing_indicator",
            ChatEvent::UserPresenceUpdate { .. } => "user_presence_update",
        }
    }

    /// 事件所属的会话（用于房间路由）。全局事件返回 `None`。
    pub fn conversation_id(&self) -> Option<ConversationId> {
        match self {
            ChatEvent::NewMessage { message } | ChatEvent::MessageUpdated { message } => {
                Some(message.conversation_id)
            }
            ChatEvent::MessageDeleted {
                conversation_id, ..
            }
            | ChatEvent::MessageDelivered {
                conversation_id, ..
            }
            | ChatEvent::MessageRead {
                conversation_id, ..
            }
            | ChatEvent::ConversationRead {
                conversation_id, ..
            }
            | ChatEvent::TypingIndicator {
                conversation_id, ..
            } => Some(*conversation_id),
            ChatEvent::ConversationCreated { conversation, .. } => Some(conversation.id),
            ChatEvent::UserPresenceUpdate { .. } => None,
        }
    }

    /// 回执类事件的操作者，其会话在投递时被排除
    /// （操作者已从自己请求的响应获得本地确认）。
    pub fn excluded_actor(&self) -> Option<UserId> {
        match self {
            ChatEvent::MessageDelivered { user_id, .. }
            | ChatEvent::MessageRead { user_id, .. }
            | ChatEvent::ConversationRead { user_id, .. } => Some(*user_id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn identity_event_round_trips_with_type_tag() {
        let event = IdentityEvent::UserUpdated {
            user_id: UserId::new(),
            username: "alice".to_string(),
            display_name: Some("Alice".to_string()),
            avatar_url: None,
            timestamp: Utc::now(),
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event_type"], "USER_UPDATED");

        let back: IdentityEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn chat_event_type_tags_match_protocol_names() {
        let event = ChatEvent::MessageRead {
            message_id: MessageId::new(),
            conversation_id: ConversationId::new(),
            user_id: UserId::new(),
            timestamp: Utc::now(),
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], event.event_type());
    }

    #[test]
    fn receipts_carry_an_excluded_actor() {
        let actor = UserId::new();
        let event = ChatEvent::ConversationRead {
            conversation_id: ConversationId::new(),
            user_id: actor,
            message_ids: vec![MessageId::new()],
            timestamp: Utc::now(),
        };
        assert_eq!(event.excluded_actor(), Some(actor));

        let message = Message::new(
            ConversationId::new(),
            UserId::new(),
            "hi".to_string(),
            Utc::now(),
        )
        .unwrap();
        let echo = ChatEvent::NewMessage { message };
        // 新消息不排除任何人：发送者依赖自己的回显
        assert_eq!(echo.excluded_actor(), None);
    }

    #[test]
    fn presence_event_is_global() {
        let event = ChatEvent::UserPresenceUpdate {
            user_id: UserId::new(),
            is_online: true,
            last_seen: None,
        };
        assert!(event.conversation_id().is_none());
    }
}
