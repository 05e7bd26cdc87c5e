//! Redis 模块
//!
//! 实时事件 Pub/Sub、在线/输入状态键值存储、会话列表缓存。

pub mod cache;
pub mod error;
pub mod presence;
pub mod publisher;
pub mod subscriber;

// 重新导出
pub use cache::*;
pub use error::*;
pub use presence::*;
pub use publisher::*;
pub use subscriber::*;
