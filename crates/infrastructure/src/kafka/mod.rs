//! Kafka 消息队列模块
//!
//! 身份事件的持久管道：按用户分区的生产者与投影消费者。

pub mod consumer;
pub mod error;
pub mod producer;

// 重新导出
pub use consumer::*;
pub use error::*;
pub use producer::*;
