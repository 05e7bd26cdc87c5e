//! 应用层实现。
//!
//! 这里提供围绕领域模型的用例服务：发件箱中继、物化视图投影器、
//! 消息状态引擎、在线/输入状态编排，以及对外部适配器
//! （消息代理、缓存、在线状态存储）的抽象。

pub mod broker;
pub mod cache;
pub mod clock;
pub mod error;
pub mod presence;
pub mod projector;
pub mod relay;
pub mod services;

#[cfg(test)]
pub(crate) mod test_support;

pub use broker::{BrokerError, ChatEventPublisher, IdentityEventPublisher};
pub use cache::{conversation_list_key, CacheError, ConversationCache};
pub use clock::{Clock, SystemClock};
pub use error::ApplicationError;
pub use presence::{PresenceError, PresenceStore, TypingStore, TYPING_TTL};
pub use projector::ProfileProjector;
pub use relay::{OutboxRelay, RelayConfig, RelayCycle};
pub use services::{
    ConversationService, MessageService, PresenceService, ProfileService, ProfileUpdate,
    StatusService,
};
