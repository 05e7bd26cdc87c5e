//! 发件箱仓储实现
//!
//! 行的写入发生在身份变更事务内（见 [`super::PgIdentityUserStore`]），
//! 这里只实现中继侧的取行与标记。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::FromRow;
use std::sync::Arc;
use uuid::Uuid;

use domain::{OutboxEvent, OutboxRepository, RepositoryResult, Timestamp, UserId};

use super::{map_sqlx_err, DbPool};

/// 数据库发件箱行
#[derive(Debug, Clone, FromRow)]
pub(crate) struct DbOutboxEvent {
    pub id: Uuid,
    pub subject_id: Uuid,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub processed: bool,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl From<DbOutboxEvent> for OutboxEvent {
    fn from(row: DbOutboxEvent) -> Self {
        OutboxEvent {
            id: row.id,
            subject_id: UserId::from(row.subject_id),
            event_type: row.event_type,
            payload: row.payload,
            processed: row.processed,
            created_at: row.created_at,
            processed_at: row.processed_at,
        }
    }
}

pub struct PgOutboxRepository {
    pool: Arc<DbPool>,
}

impl PgOutboxRepository {
    pub fn new(pool: Arc<DbPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OutboxRepository for PgOutboxRepository {
    async fn fetch_unprocessed(&self, limit: u32) -> RepositoryResult<Vec<OutboxEvent>> {
        let rows = sqlx::query_as::<_, DbOutboxEvent>(
            r#"
            SELECT id, subject_id, event_type, payload, processed, created_at, processed_at
            FROM outbox_events
            WHERE processed = false
            ORDER BY created_at ASC, id ASC
            LIMIT $1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&*self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn mark_processed(&self, id: Uuid, processed_at: Timestamp) -> RepositoryResult<()> {
        let result = sqlx::query(
            "UPDATE outbox_events SET processed = true, processed_at = $2 WHERE id = $1",
        )
        .bind(id)
        .bind(processed_at)
        .execute(&*self.pool)
        .await
        .map_err(map_sqlx_err)?;

        if result.rows_affected() == 0 {
            return Err(domain::RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn unprocessed_count(&self) -> RepositoryResult<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM outbox_events WHERE processed = false")
                .fetch_one(&*self.pool)
                .await
                .map_err(map_sqlx_err)?;
        Ok(count)
    }
}
