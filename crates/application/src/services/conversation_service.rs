//! 会话服务
//!
//! 创建会话、维护参与者，并以短 TTL 读穿缓存服务会话列表。
//! 缓存失败从不影响请求结果，权威数据总是来自关系存储。

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use domain::{
    ChatEvent, Conversation, ConversationId, ConversationRepository, DomainError, Participant,
    ParticipantRole, ReplicaRepository, RepositoryError, UserId,
};

use crate::broker::ChatEventPublisher;
use crate::cache::ConversationCache;
use crate::clock::Clock;
use crate::error::ApplicationError;
use crate::services::{invalidate_lists, publish_best_effort};

pub struct ConversationService {
    conversations: Arc<dyn ConversationRepository>,
    replicas: Arc<dyn ReplicaRepository>,
    cache: Arc<dyn ConversationCache>,
    realtime: Arc<dyn ChatEventPublisher>,
    clock: Arc<dyn Clock>,
    cache_ttl: Duration,
}

impl ConversationService {
    pub fn new(
        conversations: Arc<dyn ConversationRepository>,
        replicas: Arc<dyn ReplicaRepository>,
        cache: Arc<dyn ConversationCache>,
        realtime: Arc<dyn ChatEventPublisher>,
        clock: Arc<dyn Clock>,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            conversations,
            replicas,
            cache,
            realtime,
            clock,
            cache_ttl,
        }
    }

    /// 创建单聊会话。
    pub async fn create_direct(
        &self,
        creator: UserId,
        peer: UserId,
    ) -> Result<Conversation, ApplicationError> {
        if creator == peer {
            return Err(DomainError::invalid_argument(
                "peer",
                "direct conversation requires two distinct users",
            )
            .into());
        }
        self.ensure_known_user(peer).await?;

        let conversation = Conversation::new_direct(creator, self.clock.now());
        self.persist_and_announce(conversation, &[peer]).await
    }

    /// 创建群聊会话。成员列表不含创建者，重复成员被去重。
    pub async fn create_group(
        &self,
        creator: UserId,
        name: String,
        member_ids: Vec<UserId>,
    ) -> Result<Conversation, ApplicationError> {
        let mut members: Vec<UserId> = member_ids
            .into_iter()
            .filter(|id| *id != creator)
            .collect();
        members.sort_by_key(|id| id.0);
        members.dedup();

        if members.is_empty() {
            return Err(DomainError::invalid_argument(
                "member_ids",
                "group conversation requires at least one other member",
            )
            .into());
        }
        for member in &members {
            self.ensure_known_user(*member).await?;
        }

        let conversation = Conversation::new_group(name, creator, self.clock.now())?;
        self.persist_and_announce(conversation, &members).await
    }

    /// 用户的会话列表，读穿缓存。
    pub async fn list_for_user(
        &self,
        user_id: UserId,
    ) -> Result<Vec<Conversation>, ApplicationError> {
        match self.cache.get(user_id).await {
            Ok(Some(payload)) => match serde_json::from_str(&payload) {
                Ok(list) => {
                    debug!(user_id = %user_id, "conversation list cache hit");
                    return Ok(list);
                }
                Err(err) => {
                    // 不可解析的条目按未命中处理并删除
                    warn!(user_id = %user_id, error = %err, "discarding corrupt cache entry");
                    let _ = self.cache.invalidate(user_id).await;
                }
            },
            Ok(None) => {}
            Err(err) => {
                warn!(user_id = %user_id, error = %err, "cache read failed, falling back to storage");
            }
        }

        let list = self.conversations.list_for_user(user_id).await?;

        match serde_json::to_string(&list) {
            Ok(payload) => {
                if let Err(err) = self.cache.put(user_id, payload, self.cache_ttl).await {
                    warn!(user_id = %user_id, error = %err, "cache write failed");
                }
            }
            Err(err) => {
                warn!(user_id = %user_id, error = %err, "conversation list not cacheable");
            }
        }

        Ok(list)
    }

    pub async fn get(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Conversation, ApplicationError> {
        self.conversations
            .find_by_id(conversation_id)
            .await?
            .ok_or_else(|| DomainError::ConversationNotFound(conversation_id).into())
    }

    pub async fn participants(
        &self,
        conversation_id: ConversationId,
        requester: UserId,
    ) -> Result<Vec<Participant>, ApplicationError> {
        self.ensure_participant(conversation_id, requester).await?;
        Ok(self.conversations.list_participants(conversation_id).await?)
    }

    pub(crate) async fn ensure_participant(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> Result<Participant, ApplicationError> {
        if self
            .conversations
            .find_by_id(conversation_id)
            .await?
            .is_none()
        {
            return Err(DomainError::ConversationNotFound(conversation_id).into());
        }
        self.conversations
            .find_participant(conversation_id, user_id)
            .await?
            .ok_or_else(|| {
                DomainError::NotParticipant {
                    user_id,
                    conversation_id,
                }
                .into()
            })
    }

    async fn ensure_known_user(&self, user_id: UserId) -> Result<(), ApplicationError> {
        // 对照物化副本校验：身份服务不在请求路径上
        match self.replicas.find(user_id).await? {
            Some(_) => Ok(()),
            None => Err(DomainError::UserNotFound(user_id).into()),
        }
    }

    async fn persist_and_announce(
        &self,
        conversation: Conversation,
        members: &[UserId],
    ) -> Result<Conversation, ApplicationError> {
        let joined_at = conversation.created_at;
        let mut participants = vec![Participant::new(
            conversation.id,
            conversation.created_by,
            ParticipantRole::Owner,
            joined_at,
        )];
        for member in members {
            participants.push(Participant::new(
                conversation.id,
                *member,
                ParticipantRole::Member,
                joined_at,
            ));
        }

        match self.conversations.create(&conversation, &participants).await {
            Ok(()) => {}
            Err(RepositoryError::Conflict) => {
                return Err(DomainError::DuplicateParticipant {
                    user_id: conversation.created_by,
                    conversation_id: conversation.id,
                }
                .into());
            }
            Err(err) => return Err(err.into()),
        }

        let participant_ids: Vec<UserId> = participants.iter().map(|p| p.user_id).collect();
        invalidate_lists(&self.cache, &participant_ids).await;

        info!(
            conversation_id = %conversation.id,
            kind = conversation.kind.as_str(),
            participants = participant_ids.len(),
            "conversation created"
        );

        // 此时尚无共享房间，网关对每个参与者单播
        publish_best_effort(
            &self.realtime,
            &ChatEvent::ConversationCreated {
                conversation: conversation.clone(),
                participant_ids,
            },
        )
        .await;

        Ok(conversation)
    }
}
