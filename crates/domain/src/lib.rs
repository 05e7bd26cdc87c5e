//! 聊天系统核心领域模型
//!
//! 包含会话、消息、状态审计、物化副本和发件箱事件等核心实体，
//! 以及跨服务一致性相关的业务规则。

pub mod conversation;
pub mod errors;
pub mod events;
pub mod message;
pub mod outbox;
pub mod profile;
pub mod repositories;
pub mod status_event;
pub mod value_objects;

// 重新导出常用类型
pub use conversation::{Conversation, ConversationKind, Participant, ParticipantRole};
pub use errors::{DomainError, RepositoryError};
pub use events::{ChatEvent, IdentityEvent};
pub use message::{Message, MessageStatus, StatusTransition};
pub use outbox::OutboxEvent;
pub use profile::{ReplicaProfile, UserProfile};
pub use repositories::{
    ConversationRepository, IdentityUserStore, MessageRepository, OutboxRepository,
    ReplicaRepository, RepositoryResult, StatusEventRepository,
};
pub use status_event::StatusEvent;
pub use value_objects::{ConversationId, MessageId, Timestamp, UserId};
