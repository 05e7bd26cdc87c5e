//! 物化用户副本仓储实现
//!
//! upsert 以 last-write-wins 语义在 SQL 层裁决：条件更新只在来者
//! `updated_at` 更新时生效，重复与乱序事件在数据库里就被吸收。
//! 在线状态字段由在线状态存储独立维护，档案事件不覆盖它们。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::FromRow;
use std::sync::Arc;
use uuid::Uuid;

use domain::{ReplicaProfile, ReplicaRepository, RepositoryResult, UserId};

use super::{map_sqlx_err, DbPool};

#[derive(Debug, Clone, FromRow)]
struct DbReplica {
    pub subject_id: Uuid,
    pub username: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub is_online: bool,
    pub last_seen: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl From<DbReplica> for ReplicaProfile {
    fn from(row: DbReplica) -> Self {
        ReplicaProfile {
            subject_id: UserId::from(row.subject_id),
            username: row.username,
            display_name: row.display_name,
            avatar_url: row.avatar_url,
            is_online: row.is_online,
            last_seen: row.last_seen,
            updated_at: row.updated_at,
        }
    }
}

pub struct PgReplicaRepository {
    pool: Arc<DbPool>,
}

impl PgReplicaRepository {
    pub fn new(pool: Arc<DbPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ReplicaRepository for PgReplicaRepository {
    async fn upsert(&self, replica: ReplicaProfile) -> RepositoryResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO user_replicas
                (subject_id, username, display_name, avatar_url, is_online, last_seen, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (subject_id) DO UPDATE
            SET username = EXCLUDED.username,
                display_name = EXCLUDED.display_name,
                avatar_url = EXCLUDED.avatar_url,
                updated_at = EXCLUDED.updated_at
            WHERE user_replicas.updated_at < EXCLUDED.updated_at
            "#,
        )
        .bind(replica.subject_id.0)
        .bind(&replica.username)
        .bind(&replica.display_name)
        .bind(&replica.avatar_url)
        .bind(replica.is_online)
        .bind(replica.last_seen)
        .bind(replica.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(map_sqlx_err)?;

        // 过期事件不满足条件更新，影响行数为 0
        Ok(result.rows_affected() > 0)
    }

    async fn delete(&self, subject_id: UserId) -> RepositoryResult<bool> {
        let result = sqlx::query("DELETE FROM user_replicas WHERE subject_id = $1")
            .bind(subject_id.0)
            .execute(&*self.pool)
            .await
            .map_err(map_sqlx_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn find(&self, subject_id: UserId) -> RepositoryResult<Option<ReplicaProfile>> {
        let row = sqlx::query_as::<_, DbReplica>(
            r#"
            SELECT subject_id, username, display_name, avatar_url, is_online, last_seen, updated_at
            FROM user_replicas
            WHERE subject_id = $1
            "#,
        )
        .bind(subject_id.0)
        .fetch_optional(&*self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(row.map(Into::into))
    }
}
