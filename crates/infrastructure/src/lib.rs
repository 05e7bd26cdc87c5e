//! 基础设施层实现。
//!
//! 提供 PostgreSQL 仓储、Kafka 身份事件管道、Redis 实时发布/订阅、
//! 在线状态存储与会话列表缓存，实现应用/领域层定义的接口。

pub mod config;
pub mod db;
pub mod kafka;
pub mod redis;

pub use config::{AppConfig, DatabaseConfig, KafkaConfig, RedisConfig, RelaySettings, ServerConfig};
pub use db::{
    create_pg_pool, DbPool, PgConversationRepository, PgIdentityUserStore, PgMessageRepository,
    PgOutboxRepository, PgReplicaRepository, PgStatusEventRepository,
};
pub use kafka::{KafkaError, KafkaIdentityConsumer, KafkaIdentityProducer, KafkaResult};
pub use self::redis::{
    RedisConversationCache, RedisError, RedisEventPublisher, RedisEventSubscriber,
    RedisPresenceStore, RedisResult,
};
