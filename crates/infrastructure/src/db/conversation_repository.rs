//! 会话与参与者仓储实现
//!
//! 会话与全部参与者在同一事务中创建；已读指针用条件更新保证
//! 只能前移，并发的"全部已读"请求在这里被序列化为单调推进。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::FromRow;
use std::sync::Arc;
use uuid::Uuid;

use domain::{
    Conversation, ConversationId, ConversationKind, ConversationRepository, MessageId,
    Participant, ParticipantRole, RepositoryError, RepositoryResult, UserId,
};

use super::{map_sqlx_err, DbPool};

#[derive(Debug, Clone, FromRow)]
struct DbConversation {
    pub id: Uuid,
    pub kind: String,
    pub name: Option<String>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<DbConversation> for Conversation {
    type Error = RepositoryError;

    fn try_from(row: DbConversation) -> Result<Self, Self::Error> {
        let kind = match row.kind.as_str() {
            "direct" => ConversationKind::Direct,
            "group" => ConversationKind::Group,
            other => {
                return Err(RepositoryError::storage(format!(
                    "unknown conversation kind in storage: {other}"
                )))
            }
        };
        Ok(Conversation {
            id: ConversationId::from(row.id),
            kind,
            name: row.name,
            created_by: UserId::from(row.created_by),
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
struct DbParticipant {
    pub conversation_id: Uuid,
    pub user_id: Uuid,
    pub role: String,
    pub joined_at: DateTime<Utc>,
    pub last_read_message_id: Option<Uuid>,
}

impl TryFrom<DbParticipant> for Participant {
    type Error = RepositoryError;

    fn try_from(row: DbParticipant) -> Result<Self, Self::Error> {
        let role = match row.role.as_str() {
            "owner" => ParticipantRole::Owner,
            "member" => ParticipantRole::Member,
            other => {
                return Err(RepositoryError::storage(format!(
                    "unknown participant role in storage: {other}"
                )))
            }
        };
        Ok(Participant {
            conversation_id: ConversationId::from(row.conversation_id),
            user_id: UserId::from(row.user_id),
            role,
            joined_at: row.joined_at,
            last_read_message_id: row.last_read_message_id.map(MessageId::from),
        })
    }
}

pub struct PgConversationRepository {
    pool: Arc<DbPool>,
}

impl PgConversationRepository {
    pub fn new(pool: Arc<DbPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ConversationRepository for PgConversationRepository {
    async fn create(
        &self,
        conversation: &Conversation,
        participants: &[Participant],
    ) -> RepositoryResult<()> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;

        sqlx::query(
            r#"
            INSERT INTO conversations (id, kind, name, created_by, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(conversation.id.0)
        .bind(conversation.kind.as_str())
        .bind(&conversation.name)
        .bind(conversation.created_by.0)
        .bind(conversation.created_at)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

        for participant in participants {
            sqlx::query(
                r#"
                INSERT INTO participants (conversation_id, user_id, role, joined_at)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(participant.conversation_id.0)
            .bind(participant.user_id.0)
            .bind(participant.role.as_str())
            .bind(participant.joined_at)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_err)?;
        }

        tx.commit().await.map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn find_by_id(&self, id: ConversationId) -> RepositoryResult<Option<Conversation>> {
        let row = sqlx::query_as::<_, DbConversation>(
            "SELECT id, kind, name, created_by, created_at FROM conversations WHERE id = $1",
        )
        .bind(id.0)
        .fetch_optional(&*self.pool)
        .await
        .map_err(map_sqlx_err)?;

        row.map(TryInto::try_into).transpose()
    }

    async fn find_participant(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> RepositoryResult<Option<Participant>> {
        let row = sqlx::query_as::<_, DbParticipant>(
            r#"
            SELECT conversation_id, user_id, role, joined_at, last_read_message_id
            FROM participants
            WHERE conversation_id = $1 AND user_id = $2
            "#,
        )
        .bind(conversation_id.0)
        .bind(user_id.0)
        .fetch_optional(&*self.pool)
        .await
        .map_err(map_sqlx_err)?;

        row.map(TryInto::try_into).transpose()
    }

    async fn list_participants(
        &self,
        conversation_id: ConversationId,
    ) -> RepositoryResult<Vec<Participant>> {
        let rows = sqlx::query_as::<_, DbParticipant>(
            r#"
            SELECT conversation_id, user_id, role, joined_at, last_read_message_id
            FROM participants
            WHERE conversation_id = $1
            ORDER BY joined_at ASC
            "#,
        )
        .bind(conversation_id.0)
        .fetch_all(&*self.pool)
        .await
        .map_err(map_sqlx_err)?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn list_for_user(&self, user_id: UserId) -> RepositoryResult<Vec<Conversation>> {
        let rows = sqlx::query_as::<_, DbConversation>(
            r#"
            SELECT c.id, c.kind, c.name, c.created_by, c.created_at
            FROM conversations c
            JOIN participants p ON p.conversation_id = c.id
            WHERE p.user_id = $1
            ORDER BY c.created_at DESC
            "#,
        )
        .bind(user_id.0)
        .fetch_all(&*self.pool)
        .await
        .map_err(map_sqlx_err)?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn co_participant_ids(&self, user_id: UserId) -> RepositoryResult<Vec<UserId>> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT DISTINCT other.user_id
            FROM participants own
            JOIN participants other ON other.conversation_id = own.conversation_id
            WHERE own.user_id = $1 AND other.user_id <> $1
            "#,
        )
        .bind(user_id.0)
        .fetch_all(&*self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(ids.into_iter().map(UserId::from).collect())
    }

    async fn advance_read_pointer(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
        message_id: MessageId,
    ) -> RepositoryResult<()> {
        // 指针已领先时条件不满足，影响行数为 0，这是无操作而非错误
        sqlx::query(
            r#"
            UPDATE participants
            SET last_read_message_id = $3
            WHERE conversation_id = $1 AND user_id = $2
              AND EXISTS (
                  SELECT 1
                  FROM messages new_m
                  LEFT JOIN messages cur ON cur.id = participants.last_read_message_id
                  WHERE new_m.id = $3
                    AND (cur.id IS NULL
                         OR new_m.created_at > cur.created_at
                         OR (new_m.created_at = cur.created_at AND new_m.id > cur.id))
              )
            "#,
        )
        .bind(conversation_id.0)
        .bind(user_id.0)
        .bind(message_id.0)
        .execute(&*self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(())
    }
}
