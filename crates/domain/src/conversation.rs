//! 会话与参与者实体
//!
//! 会话类型创建后不可变；参与者的已读指针只能向前移动。

use serde::{Deserialize, Serialize};

use crate::errors::DomainError;
use crate::value_objects::{ConversationId, MessageId, Timestamp, UserId};

/// 会话类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationKind {
    Direct,
    Group,
}

impl ConversationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationKind::Direct => "direct",
            ConversationKind::Group => "group",
        }
    }
}

/// 参与者角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantRole {
    Owner,
    Member,
}

impl ParticipantRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParticipantRole::Owner => "owner",
            ParticipantRole::Member => "member",
        }
    }
}

/// 会话实体
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub kind: ConversationKind,
    pub name: Option<String>,
    pub created_by: UserId,
    pub created_at: Timestamp,
}

impl Conversation {
    /// 创建单聊会话。
    pub fn new_direct(created_by: UserId, created_at: Timestamp) -> Self {
        Self {
            id: ConversationId::new(),
            kind: ConversationKind::Direct,
            name: None,
            created_by,
            created_at,
        }
    }

    /// 创建群聊会话。群聊必须有名称。
    pub fn new_group(
        name: String,
        created_by: UserId,
        created_at: Timestamp,
    ) -> Result<Self, DomainError> {
        if name.trim().is_empty() {
            return Err(DomainError::invalid_argument(
                "name",
                "group conversation requires a name",
            ));
        }
        Ok(Self {
            id: ConversationId::new(),
            kind: ConversationKind::Group,
            name: Some(name),
            created_by,
            created_at,
        })
    }
}

/// 会话参与者
///
/// `(conversation_id, user_id)` 唯一。`last_read_message_id` 为前向指针，
/// 其顺序性由服务层依据消息创建时间裁决，存储层再以条件更新兜底。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub conversation_id: ConversationId,
    pub user_id: UserId,
    pub role: ParticipantRole,
    pub joined_at: Timestamp,
    pub last_read_message_id: Option<MessageId>,
}

impl Participant {
    pub fn new(
        conversation_id: ConversationId,
        user_id: UserId,
        role: ParticipantRole,
        joined_at: Timestamp,
    ) -> Self {
        Self {
            conversation_id,
            user_id,
            role,
            joined_at,
            last_read_message_id: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn direct_conversation_has_no_name() {
        let conversation = Conversation::new_direct(UserId::new(), Utc::now());
        assert_eq!(conversation.kind, ConversationKind::Direct);
        assert!(conversation.name.is_none());
    }

    #[test]
    fn group_conversation_requires_name() {
        assert!(Conversation::new_group("  ".to_string(), UserId::new(), Utc::now()).is_err());

        let conversation =
            Conversation::new_group("team".to_string(), UserId::new(), Utc::now()).unwrap();
        assert_eq!(conversation.kind, ConversationKind::Group);
        assert_eq!(conversation.name.as_deref(), Some("team"));
    }

    #[test]
    fn new_participant_has_unset_read_pointer() {
        let participant = Participant::new(
            ConversationId::new(),
            UserId::new(),
            ParticipantRole::Member,
            Utc::now(),
        );
        assert!(participant.last_read_message_id.is_none());
    }
}
