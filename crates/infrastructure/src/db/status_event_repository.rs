//! 状态审计行存储实现
//!
//! 只有 INSERT 与按消息的读取，没有 UPDATE/DELETE 语句。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::FromRow;
use std::sync::Arc;
use uuid::Uuid;

use domain::{
    ConversationId, MessageId, RepositoryError, RepositoryResult, StatusEvent,
    StatusEventRepository, UserId,
};

use super::{map_sqlx_err, status_from_db, DbPool};

#[derive(Debug, Clone, FromRow)]
struct DbStatusEvent {
    pub message_id: Uuid,
    pub conversation_id: Uuid,
    pub user_id: Uuid,
    pub status: String,
    pub previous_status: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub device_id: Option<String>,
}

impl TryFrom<DbStatusEvent> for StatusEvent {
    type Error = RepositoryError;

    fn try_from(row: DbStatusEvent) -> Result<Self, Self::Error> {
        Ok(StatusEvent {
            message_id: MessageId::from(row.message_id),
            conversation_id: ConversationId::from(row.conversation_id),
            user_id: UserId::from(row.user_id),
            status: status_from_db(&row.status)?,
            previous_status: row
                .previous_status
                .as_deref()
                .map(status_from_db)
                .transpose()?,
            timestamp: row.timestamp,
            device_id: row.device_id,
        })
    }
}

pub struct PgStatusEventRepository {
    pool: Arc<DbPool>,
}

impl PgStatusEventRepository {
    pub fn new(pool: Arc<DbPool>) -> Self {
        Self { pool }
    }

    async fn insert<'e, E>(executor: E, event: &StatusEvent) -> Result<(), sqlx::Error>
    where
        E: sqlx::Executor<'e, Database = sqlx::Postgres>,
    {
        sqlx::query(
            r#"
            INSERT INTO status_events
                (message_id, conversation_id, user_id, status, previous_status, timestamp, device_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(event.message_id.0)
        .bind(event.conversation_id.0)
        .bind(event.user_id.0)
        .bind(event.status.as_str())
        .bind(event.previous_status.map(|s| s.as_str()))
        .bind(event.timestamp)
        .bind(&event.device_id)
        .execute(executor)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl StatusEventRepository for PgStatusEventRepository {
    async fn append(&self, event: &StatusEvent) -> RepositoryResult<()> {
        Self::insert(&*self.pool, event).await.map_err(map_sqlx_err)
    }

    async fn append_batch(&self, events: &[StatusEvent]) -> RepositoryResult<()> {
        if events.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;
        for event in events {
            Self::insert(&mut *tx, event).await.map_err(map_sqlx_err)?;
        }
        tx.commit().await.map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn list_for_message(&self, message_id: MessageId) -> RepositoryResult<Vec<StatusEvent>> {
        let rows = sqlx::query_as::<_, DbStatusEvent>(
            r#"
            SELECT message_id, conversation_id, user_id, status, previous_status, timestamp, device_id
            FROM status_events
            WHERE message_id = $1
            ORDER BY id ASC
            "#,
        )
        .bind(message_id.0)
        .fetch_all(&*self.pool)
        .await
        .map_err(map_sqlx_err)?;

        rows.into_iter().map(TryInto::try_into).collect()
    }
}
