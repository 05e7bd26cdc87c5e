//! 身份域用户存储实现
//!
//! 每个变更方法在同一事务中写入用户行与发件箱行：事务回滚则
//! 两者都不存在，绝不产生无事件的变更或无变更的孤儿事件。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, Postgres, Transaction};
use std::sync::Arc;
use uuid::Uuid;

use domain::{
    IdentityUserStore, OutboxEvent, RepositoryError, RepositoryResult, UserId, UserProfile,
};

use super::{map_sqlx_err, DbPool};

/// 数据库用户行
#[derive(Debug, Clone, FromRow)]
struct DbUser {
    pub id: Uuid,
    pub username: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<DbUser> for UserProfile {
    fn from(row: DbUser) -> Self {
        UserProfile {
            id: UserId::from(row.id),
            username: row.username,
            display_name: row.display_name,
            avatar_url: row.avatar_url,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

pub struct PgIdentityUserStore {
    pool: Arc<DbPool>,
}

impl PgIdentityUserStore {
    pub fn new(pool: Arc<DbPool>) -> Self {
        Self { pool }
    }

    async fn insert_outbox_row(
        tx: &mut Transaction<'_, Postgres>,
        event: &OutboxEvent,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO outbox_events (id, subject_id, event_type, payload, processed, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(event.id)
        .bind(event.subject_id.0)
        .bind(&event.event_type)
        .bind(&event.payload)
        .bind(event.processed)
        .bind(event.created_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl IdentityUserStore for PgIdentityUserStore {
    async fn create(
        &self,
        profile: UserProfile,
        event: OutboxEvent,
    ) -> RepositoryResult<UserProfile> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;

        let row = sqlx::query_as::<_, DbUser>(
            r#"
            INSERT INTO users (id, username, display_name, avatar_url, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, username, display_name, avatar_url, created_at, updated_at
            "#,
        )
        .bind(profile.id.0)
        .bind(&profile.username)
        .bind(&profile.display_name)
        .bind(&profile.avatar_url)
        .bind(profile.created_at)
        .bind(profile.updated_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

        Self::insert_outbox_row(&mut tx, &event)
            .await
            .map_err(map_sqlx_err)?;
        tx.commit().await.map_err(map_sqlx_err)?;

        Ok(row.into())
    }

    async fn update(
        &self,
        profile: UserProfile,
        event: OutboxEvent,
    ) -> RepositoryResult<UserProfile> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;

        let row = sqlx::query_as::<_, DbUser>(
            r#"
            UPDATE users
            SET username = $2, display_name = $3, avatar_url = $4, updated_at = $5
            WHERE id = $1
            RETURNING id, username, display_name, avatar_url, created_at, updated_at
            "#,
        )
        .bind(profile.id.0)
        .bind(&profile.username)
        .bind(&profile.display_name)
        .bind(&profile.avatar_url)
        .bind(profile.updated_at)
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_sqlx_err)?
        .ok_or(RepositoryError::NotFound)?;

        Self::insert_outbox_row(&mut tx, &event)
            .await
            .map_err(map_sqlx_err)?;
        tx.commit().await.map_err(map_sqlx_err)?;

        Ok(row.into())
    }

    async fn delete(&self, user_id: UserId, event: OutboxEvent) -> RepositoryResult<()> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;

        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(user_id.0)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_err)?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }

        Self::insert_outbox_row(&mut tx, &event)
            .await
            .map_err(map_sqlx_err)?;
        tx.commit().await.map_err(map_sqlx_err)?;

        Ok(())
    }

    async fn find_by_id(&self, user_id: UserId) -> RepositoryResult<Option<UserProfile>> {
        let row = sqlx::query_as::<_, DbUser>(
            r#"
            SELECT id, username, display_name, avatar_url, created_at, updated_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(user_id.0)
        .fetch_optional(&*self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(row.map(Into::into))
    }
}
