//! 物化视图投影器
//!
//! 消费中继过来的身份事件，把消息服务本地的用户副本保持为
//! 最终一致。所有处理器都是幂等的：重复投递（中继的至少一次
//! 语义或代理重投）不改变最终状态。
//!
//! 副本变更之后，失效每个与主体共享会话的参与者的会话列表缓存。
//! 缓存失效失败只记录日志：缓存正确性是尽力而为，副本正确性不是。

use std::sync::Arc;

use tracing::{debug, info, warn};

use domain::{
    ConversationRepository, IdentityEvent, ReplicaProfile, ReplicaRepository, UserId,
};

use crate::cache::ConversationCache;
use crate::error::ApplicationError;

pub struct ProfileProjector {
    replicas: Arc<dyn ReplicaRepository>,
    conversations: Arc<dyn ConversationRepository>,
    cache: Arc<dyn ConversationCache>,
}

impl ProfileProjector {
    pub fn new(
        replicas: Arc<dyn ReplicaRepository>,
        conversations: Arc<dyn ConversationRepository>,
        cache: Arc<dyn ConversationCache>,
    ) -> Self {
        Self {
            replicas,
            conversations,
            cache,
        }
    }

    /// 应用一条身份事件。
    ///
    /// upsert 语义容忍 create/update 乱序；last-write-wins 时间戳
    /// 吸收重复与过期事件。只有副本实际变更时才做缓存失效扇出。
    pub async fn apply(&self, event: &IdentityEvent) -> Result<(), ApplicationError> {
        let subject_id = event.subject_id();

        let changed = match event {
            IdentityEvent::UserCreated {
                user_id,
                username,
                display_name,
                avatar_url,
                timestamp,
            }
            | IdentityEvent::UserUpdated {
                user_id,
                username,
                display_name,
                avatar_url,
                timestamp,
            } => {
                let replica = ReplicaProfile {
                    subject_id: *user_id,
                    username: username.clone(),
                    display_name: display_name.clone(),
                    avatar_url: avatar_url.clone(),
                    is_online: false,
                    last_seen: None,
                    updated_at: *timestamp,
                };
                self.replicas.upsert(replica).await?
            }
            IdentityEvent::UserDeleted { user_id, .. } => self.replicas.delete(*user_id).await?,
        };

        if changed {
            info!(
                subject_id = %subject_id,
                event_type = event.event_type(),
                "replica updated"
            );
            self.invalidate_dependent_caches(subject_id).await;
        } else {
            debug!(
                subject_id = %subject_id,
                event_type = event.event_type(),
                "stale or duplicate event absorbed"
            );
        }

        Ok(())
    }

    /// 失效主体及其所有共同参与者的会话列表缓存。
    async fn invalidate_dependent_caches(&self, subject_id: UserId) {
        let mut affected = match self.conversations.co_participant_ids(subject_id).await {
            Ok(ids) => ids,
            Err(err) => {
                warn!(
                    subject_id = %subject_id,
                    error = %err,
                    "cache fan-out query failed, skipping invalidation"
                );
                return;
            }
        };
        affected.push(subject_id);

        for user_id in affected {
            if let Err(err) = self.cache.invalidate(user_id).await {
                warn!(
                    user_id = %user_id,
                    error = %err,
                    "cache invalidation failed"
                );
            }
        }
    }
}
