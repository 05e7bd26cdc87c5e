//! 消息服务
//!
//! 发送、编辑与软删除。写入落库后广播实时事件：新消息广播给
//! 房间内所有会话，包括发送者自己的回显。

use std::sync::Arc;

use tracing::info;

use domain::{
    ChatEvent, ConversationId, ConversationRepository, DomainError, Message, MessageId,
    MessageRepository, UserId,
};

use crate::broker::ChatEventPublisher;
use crate::cache::ConversationCache;
use crate::clock::Clock;
use crate::error::ApplicationError;
use crate::services::{invalidate_lists, publish_best_effort};

pub struct MessageService {
    messages: Arc<dyn MessageRepository>,
    conversations: Arc<dyn ConversationRepository>,
    cache: Arc<dyn ConversationCache>,
    realtime: Arc<dyn ChatEventPublisher>,
    clock: Arc<dyn Clock>,
}

impl MessageService {
    pub fn new(
        messages: Arc<dyn MessageRepository>,
        conversations: Arc<dyn ConversationRepository>,
        cache: Arc<dyn ConversationCache>,
        realtime: Arc<dyn ChatEventPublisher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            messages,
            conversations,
            cache,
            realtime,
            clock,
        }
    }

    /// 在会话中发送消息。发送者必须是参与者。
    pub async fn send_message(
        &self,
        conversation_id: ConversationId,
        sender: UserId,
        content: String,
    ) -> Result<Message, ApplicationError> {
        self.ensure_participant(conversation_id, sender).await?;

        let message = Message::new(conversation_id, sender, content, self.clock.now())?;
        self.messages.create(&message).await?;

        info!(
            message_id = %message.id,
            conversation_id = %conversation_id,
            sender_id = %sender,
            "message sent"
        );

        // 最后一条消息与未读数都变了，所有参与者的列表缓存失效
        self.invalidate_participant_lists(conversation_id).await;

        publish_best_effort(
            &self.realtime,
            &ChatEvent::NewMessage {
                message: message.clone(),
            },
        )
        .await;

        Ok(message)
    }

    /// 发送者编辑消息内容。
    pub async fn edit_message(
        &self,
        message_id: MessageId,
        actor: UserId,
        content: String,
    ) -> Result<Message, ApplicationError> {
        let mut message = self.load(message_id).await?;
        message.edit(actor, content, self.clock.now())?;
        self.messages.update(&message).await?;

        publish_best_effort(
            &self.realtime,
            &ChatEvent::MessageUpdated {
                message: message.clone(),
            },
        )
        .await;

        Ok(message)
    }

    /// 发送者软删除消息。重复删除是无操作。
    pub async fn delete_message(
        &self,
        message_id: MessageId,
        actor: UserId,
    ) -> Result<(), ApplicationError> {
        let mut message = self.load(message_id).await?;
        let already_deleted = message.is_deleted();
        let deleted_at = self.clock.now();
        message.soft_delete(actor, deleted_at)?;
        if already_deleted {
            return Ok(());
        }
        self.messages.update(&message).await?;

        info!(message_id = %message_id, deleted_by = %actor, "message deleted");

        self.invalidate_participant_lists(message.conversation_id)
            .await;

        publish_best_effort(
            &self.realtime,
            &ChatEvent::MessageDeleted {
                message_id,
                conversation_id: message.conversation_id,
                deleted_by: actor,
                timestamp: deleted_at,
            },
        )
        .await;

        Ok(())
    }

    pub async fn get_message(&self, message_id: MessageId) -> Result<Message, ApplicationError> {
        self.load(message_id).await
    }

    async fn load(&self, message_id: MessageId) -> Result<Message, ApplicationError> {
        self.messages
            .find_by_id(message_id)
            .await?
            .ok_or_else(|| DomainError::MessageNotFound(message_id).into())
    }

    async fn ensure_participant(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> Result<(), ApplicationError> {
        if self
            .conversations
            .find_by_id(conversation_id)
            .await?
            .is_none()
        {
            return Err(DomainError::ConversationNotFound(conversation_id).into());
        }
        if self
            .conversations
            .find_participant(conversation_id, user_id)
            .await?
            .is_none()
        {
            return Err(DomainError::NotParticipant {
                user_id,
                conversation_id,
            }
            .into());
        }
        Ok(())
    }

    async fn invalidate_participant_lists(&self, conversation_id: ConversationId) {
        match self.conversations.list_participants(conversation_id).await {
            Ok(participants) => {
                let user_ids: Vec<UserId> = participants.iter().map(|p| p.user_id).collect();
                invalidate_lists(&self.cache, &user_ids).await;
            }
            Err(err) => {
                tracing::warn!(
                    conversation_id = %conversation_id,
                    error = %err,
                    "participant lookup for cache invalidation failed"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use domain::{Conversation, MessageStatus, Participant, ParticipantRole};

    use crate::test_support::{
        FixedClock, MemoryChatStore, MemoryConversationCache, RecordingChatPublisher,
    };

    struct Fixture {
        service: MessageService,
        store: Arc<MemoryChatStore>,
        cache: Arc<MemoryConversationCache>,
        realtime: Arc<RecordingChatPublisher>,
        clock: Arc<FixedClock>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryChatStore::new());
        let cache = Arc::new(MemoryConversationCache::new());
        let realtime = Arc::new(RecordingChatPublisher::new());
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let service = MessageService::new(
            store.clone(),
            store.clone(),
            cache.clone(),
            realtime.clone(),
            clock.clone(),
        );
        Fixture {
            service,
            store,
            cache,
            realtime,
            clock,
        }
    }

    async fn seed_conversation(store: &MemoryChatStore, members: &[UserId]) -> ConversationId {
        let conversation = Conversation::new_direct(members[0], Utc::now());
        let participants: Vec<Participant> = members
            .iter()
            .map(|id| Participant::new(conversation.id, *id, ParticipantRole::Member, Utc::now()))
            .collect();
        ConversationRepository::create(store, &conversation, &participants)
            .await
            .unwrap();
        conversation.id
    }

    #[tokio::test]
    async fn sent_message_starts_in_sent_and_echoes_to_room() {
        let fx = fixture();
        let sender = UserId::new();
        let peer = UserId::new();
        let conversation_id = seed_conversation(&fx.store, &[sender, peer]).await;

        let message = fx
            .service
            .send_message(conversation_id, sender, "hello".to_string())
            .await
            .unwrap();

        assert_eq!(message.status, MessageStatus::Sent);

        let published = fx.realtime.published().await;
        assert_eq!(published.len(), 1);
        match &published[0] {
            ChatEvent::NewMessage { message: event } => assert_eq!(event.id, message.id),
            other => panic!("unexpected event: {other:?}"),
        }
        // 新消息广播不排除发送者：回显是协议的一部分
        assert_eq!(published[0].excluded_actor(), None);
    }

    #[tokio::test]
    async fn non_participant_cannot_send() {
        let fx = fixture();
        let sender = UserId::new();
        let conversation_id = seed_conversation(&fx.store, &[sender, UserId::new()]).await;

        let err = fx
            .service
            .send_message(conversation_id, UserId::new(), "hi".to_string())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ApplicationError::Domain(DomainError::NotParticipant { .. })
        ));
    }

    #[tokio::test]
    async fn send_invalidates_every_participant_cache() {
        let fx = fixture();
        let sender = UserId::new();
        let peer = UserId::new();
        let conversation_id = seed_conversation(&fx.store, &[sender, peer]).await;

        fx.cache.seed(sender, "stale").await;
        fx.cache.seed(peer, "stale").await;

        fx.service
            .send_message(conversation_id, sender, "hello".to_string())
            .await
            .unwrap();

        assert!(fx.cache.get(sender).await.unwrap().is_none());
        assert!(fx.cache.get(peer).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn only_sender_edits() {
        let fx = fixture();
        let sender = UserId::new();
        let peer = UserId::new();
        let conversation_id = seed_conversation(&fx.store, &[sender, peer]).await;
        let message = fx
            .service
            .send_message(conversation_id, sender, "hello".to_string())
            .await
            .unwrap();

        assert!(fx
            .service
            .edit_message(message.id, peer, "hacked".to_string())
            .await
            .is_err());

        fx.clock.advance(chrono::Duration::seconds(1));
        let edited = fx
            .service
            .edit_message(message.id, sender, "hello again".to_string())
            .await
            .unwrap();
        assert_eq!(edited.content, "hello again");
        assert!(edited.edited_at.is_some());
    }

    #[tokio::test]
    async fn delete_is_idempotent_and_broadcasts_once() {
        let fx = fixture();
        let sender = UserId::new();
        let peer = UserId::new();
        let conversation_id = seed_conversation(&fx.store, &[sender, peer]).await;
        let message = fx
            .service
            .send_message(conversation_id, sender, "hello".to_string())
            .await
            .unwrap();

        fx.service.delete_message(message.id, sender).await.unwrap();
        fx.service.delete_message(message.id, sender).await.unwrap();

        let deletions = fx
            .realtime
            .published()
            .await
            .into_iter()
            .filter(|e| matches!(e, ChatEvent::MessageDeleted { .. }))
            .count();
        assert_eq!(deletions, 1);

        let stored = MessageRepository::find_by_id(fx.store.as_ref(), message.id)
            .await
            .unwrap()
            .unwrap();
        assert!(stored.is_deleted());
    }

    #[tokio::test]
    async fn deleted_message_cannot_be_edited() {
        let fx = fixture();
        let sender = UserId::new();
        let conversation_id = seed_conversation(&fx.store, &[sender, UserId::new()]).await;
        let message = fx
            .service
            .send_message(conversation_id, sender, "hello".to_string())
            .await
            .unwrap();

        fx.service.delete_message(message.id, sender).await.unwrap();

        let err = fx
            .service
            .edit_message(message.id, sender, "late edit".to_string())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ApplicationError::Domain(DomainError::MessageDeleted(_))
        ));
    }
}
