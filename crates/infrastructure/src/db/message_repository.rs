//! 消息仓储实现
//!
//! 未读范围查询以 `(created_at, id)` 为游标做范围扫描，与已读指针
//! 的比较规则一致；软删除的消息留在表里但被这里的查询过滤。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::FromRow;
use std::sync::Arc;
use uuid::Uuid;

use domain::{
    ConversationId, Message, MessageId, MessageRepository, RepositoryError, RepositoryResult,
    UserId,
};

use super::{map_sqlx_err, status_from_db, DbPool};

#[derive(Debug, Clone, FromRow)]
struct DbMessage {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    pub status: String,
    pub delivered_at: Option<DateTime<Utc>>,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub edited_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl TryFrom<DbMessage> for Message {
    type Error = RepositoryError;

    fn try_from(row: DbMessage) -> Result<Self, Self::Error> {
        Ok(Message {
            id: MessageId::from(row.id),
            conversation_id: ConversationId::from(row.conversation_id),
            sender_id: UserId::from(row.sender_id),
            content: row.content,
            status: status_from_db(&row.status)?,
            delivered_at: row.delivered_at,
            read_at: row.read_at,
            created_at: row.created_at,
            edited_at: row.edited_at,
            deleted_at: row.deleted_at,
        })
    }
}

const MESSAGE_COLUMNS: &str = "id, conversation_id, sender_id, content, status, \
     delivered_at, read_at, created_at, edited_at, deleted_at";

pub struct PgMessageRepository {
    pool: Arc<DbPool>,
}

impl PgMessageRepository {
    pub fn new(pool: Arc<DbPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageRepository for PgMessageRepository {
    async fn create(&self, message: &Message) -> RepositoryResult<()> {
        sqlx::query(
            r#"
            INSERT INTO messages
                (id, conversation_id, sender_id, content, status,
                 delivered_at, read_at, created_at, edited_at, deleted_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(message.id.0)
        .bind(message.conversation_id.0)
        .bind(message.sender_id.0)
        .bind(&message.content)
        .bind(message.status.as_str())
        .bind(message.delivered_at)
        .bind(message.read_at)
        .bind(message.created_at)
        .bind(message.edited_at)
        .bind(message.deleted_at)
        .execute(&*self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn update(&self, message: &Message) -> RepositoryResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE messages
            SET content = $2, status = $3, delivered_at = $4, read_at = $5,
                edited_at = $6, deleted_at = $7
            WHERE id = $1
            "#,
        )
        .bind(message.id.0)
        .bind(&message.content)
        .bind(message.status.as_str())
        .bind(message.delivered_at)
        .bind(message.read_at)
        .bind(message.edited_at)
        .bind(message.deleted_at)
        .execute(&*self.pool)
        .await
        .map_err(map_sqlx_err)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn find_by_id(&self, id: MessageId) -> RepositoryResult<Option<Message>> {
        let row = sqlx::query_as::<_, DbMessage>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = $1"
        ))
        .bind(id.0)
        .fetch_optional(&*self.pool)
        .await
        .map_err(map_sqlx_err)?;

        row.map(TryInto::try_into).transpose()
    }

    async fn latest_in_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> RepositoryResult<Option<Message>> {
        let row = sqlx::query_as::<_, DbMessage>(&format!(
            r#"
            SELECT {MESSAGE_COLUMNS}
            FROM messages
            WHERE conversation_id = $1 AND deleted_at IS NULL
            ORDER BY created_at DESC, id DESC
            LIMIT 1
            "#
        ))
        .bind(conversation_id.0)
        .fetch_optional(&*self.pool)
        .await
        .map_err(map_sqlx_err)?;

        row.map(TryInto::try_into).transpose()
    }

    async fn list_after_pointer(
        &self,
        conversation_id: ConversationId,
        reader: UserId,
        after: Option<MessageId>,
    ) -> RepositoryResult<Vec<Message>> {
        let rows = sqlx::query_as::<_, DbMessage>(&format!(
            r#"
            SELECT {MESSAGE_COLUMNS}
            FROM messages m
            WHERE m.conversation_id = $1
              AND m.sender_id <> $2
              AND m.deleted_at IS NULL
              AND ($3::uuid IS NULL OR EXISTS (
                  SELECT 1 FROM messages p
                  WHERE p.id = $3
                    AND (m.created_at > p.created_at
                         OR (m.created_at = p.created_at AND m.id > p.id))
              ))
            ORDER BY m.created_at ASC, m.id ASC
            "#
        ))
        .bind(conversation_id.0)
        .bind(reader.0)
        .bind(after.map(|id| id.0))
        .fetch_all(&*self.pool)
        .await
        .map_err(map_sqlx_err)?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn count_after_pointer(
        &self,
        conversation_id: ConversationId,
        reader: UserId,
        after: Option<MessageId>,
    ) -> RepositoryResult<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM messages m
            WHERE m.conversation_id = $1
              AND m.sender_id <> $2
              AND m.deleted_at IS NULL
              AND ($3::uuid IS NULL OR EXISTS (
                  SELECT 1 FROM messages p
                  WHERE p.id = $3
                    AND (m.created_at > p.created_at
                         OR (m.created_at = p.created_at AND m.id > p.id))
              ))
            "#,
        )
        .bind(conversation_id.0)
        .bind(reader.0)
        .bind(after.map(|id| id.0))
        .fetch_one(&*self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(count)
    }
}
