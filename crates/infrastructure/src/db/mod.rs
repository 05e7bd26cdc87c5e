//! PostgreSQL 仓储实现

use domain::{MessageStatus, RepositoryError};
use sqlx::{Pool, Postgres};

mod conversation_repository;
mod message_repository;
mod outbox_repository;
mod replica_repository;
mod status_event_repository;
mod user_store;

pub use conversation_repository::PgConversationRepository;
pub use message_repository::PgMessageRepository;
pub use outbox_repository::PgOutboxRepository;
pub use replica_repository::PgReplicaRepository;
pub use status_event_repository::PgStatusEventRepository;
pub use user_store::PgIdentityUserStore;

pub type DbPool = Pool<Postgres>;

/// 创建 PostgreSQL 连接池。
pub async fn create_pg_pool(database_url: &str, max_connections: u32) -> Result<DbPool, sqlx::Error> {
    sqlx::postgres::PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}

pub(crate) fn map_sqlx_err(err: sqlx::Error) -> RepositoryError {
    match err {
        sqlx::Error::RowNotFound => RepositoryError::NotFound,
        sqlx::Error::Database(db) if db.is_unique_violation() => RepositoryError::Conflict,
        other => RepositoryError::storage(other.to_string()),
    }
}

pub(crate) fn status_from_db(value: &str) -> Result<MessageStatus, RepositoryError> {
    match value {
        "sent" => Ok(MessageStatus::Sent),
        "delivered" => Ok(MessageStatus::Delivered),
        "read" => Ok(MessageStatus::Read),
        other => Err(RepositoryError::storage(format!(
            "unknown message status in storage: {other}"
        ))),
    }
}
