//! 消息状态引擎
//!
//! 逐接收者推进 `sent -> delivered -> read`，每次被接受的推进
//! 追加一行审计记录。重复与回退标记被吸收为无操作：既不报错，
//! 也不产生审计行或实时事件。
//!
//! "会话全部已读"将接收者的前向指针推到最后一条未读消息，
//! 为每条新覆盖的消息补齐审计行，并发布一条聚合回执。

use std::sync::Arc;

use tracing::{debug, info};

use domain::{
    ChatEvent, ConversationId, ConversationRepository, DomainError, Message, MessageId,
    MessageRepository, MessageStatus, StatusEvent, StatusEventRepository, StatusTransition,
    UserId,
};

use crate::broker::ChatEventPublisher;
use crate::cache::ConversationCache;
use crate::clock::Clock;
use crate::error::ApplicationError;
use crate::services::{invalidate_lists, publish_best_effort};

pub struct StatusService {
    messages: Arc<dyn MessageRepository>,
    conversations: Arc<dyn ConversationRepository>,
    status_events: Arc<dyn StatusEventRepository>,
    cache: Arc<dyn ConversationCache>,
    realtime: Arc<dyn ChatEventPublisher>,
    clock: Arc<dyn Clock>,
}

impl StatusService {
    pub fn new(
        messages: Arc<dyn MessageRepository>,
        conversations: Arc<dyn ConversationRepository>,
        status_events: Arc<dyn StatusEventRepository>,
        cache: Arc<dyn ConversationCache>,
        realtime: Arc<dyn ChatEventPublisher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            messages,
            conversations,
            status_events,
            cache,
            realtime,
            clock,
        }
    }

    /// 接收者标记消息已送达。
    pub async fn mark_delivered(
        &self,
        message_id: MessageId,
        actor: UserId,
        device_id: Option<String>,
    ) -> Result<StatusTransition, ApplicationError> {
        self.mark(message_id, actor, MessageStatus::Delivered, device_id)
            .await
    }

    /// 接收者标记单条消息已读。不移动会话级已读指针。
    pub async fn mark_read(
        &self,
        message_id: MessageId,
        actor: UserId,
        device_id: Option<String>,
    ) -> Result<StatusTransition, ApplicationError> {
        self.mark(message_id, actor, MessageStatus::Read, device_id)
            .await
    }

    async fn mark(
        &self,
        message_id: MessageId,
        actor: UserId,
        target: MessageStatus,
        device_id: Option<String>,
    ) -> Result<StatusTransition, ApplicationError> {
        let mut message = self.load(message_id).await?;
        if message.is_deleted() {
            return Err(DomainError::MessageDeleted(message_id).into());
        }
        self.ensure_participant(message.conversation_id, actor)
            .await?;

        let now = self.clock.now();
        let transition = message.advance_status(actor, target, now)?;

        let previous = match transition {
            StatusTransition::Applied { previous } => previous,
            StatusTransition::AlreadyAtOrBeyond => {
                debug!(
                    message_id = %message_id,
                    user_id = %actor,
                    target = %target,
                    "status mark absorbed as no-op"
                );
                return Ok(transition);
            }
        };

        self.messages.update(&message).await?;

        let mut audit = StatusEvent::new(
            message_id,
            message.conversation_id,
            actor,
            target,
            Some(previous),
            now,
        );
        if let Some(device_id) = device_id {
            audit = audit.with_device(device_id);
        }
        self.status_events.append(&audit).await?;

        // 操作者被排除：其客户端已从本次请求的响应得到确认
        let receipt = match target {
            MessageStatus::Delivered => ChatEvent::MessageDelivered {
                message_id,
                conversation_id: message.conversation_id,
                user_id: actor,
                timestamp: now,
            },
            MessageStatus::Read => ChatEvent::MessageRead {
                message_id,
                conversation_id: message.conversation_id,
                user_id: actor,
                timestamp: now,
            },
            MessageStatus::Sent => unreachable!(),
        };
        publish_best_effort(&self.realtime, &receipt).await;

        Ok(transition)
    }

    /// 会话级全部已读。
    ///
    /// 覆盖已读指针之后、非本人发送的全部未删除消息，返回新覆盖的
    /// 消息 id。没有新消息可覆盖时是无操作，不产生任何事件。
    pub async fn mark_conversation_read(
        &self,
        conversation_id: ConversationId,
        actor: UserId,
        device_id: Option<String>,
    ) -> Result<Vec<MessageId>, ApplicationError> {
        let participant = self.ensure_participant(conversation_id, actor).await?;

        let unread = self
            .messages
            .list_after_pointer(conversation_id, actor, participant.last_read_message_id)
            .await?;
        let Some(newest) = unread.last().cloned() else {
            debug!(
                conversation_id = %conversation_id,
                user_id = %actor,
                "conversation already fully read"
            );
            return Ok(Vec::new());
        };

        let now = self.clock.now();
        let mut covered = Vec::with_capacity(unread.len());
        let mut audit_rows = Vec::new();

        for mut message in unread {
            covered.push(message.id);
            // 单独已读过的消息已处于 read，审计行不重复
            if let StatusTransition::Applied { previous } =
                message.advance_status(actor, MessageStatus::Read, now)?
            {
                self.messages.update(&message).await?;
                let mut audit = StatusEvent::new(
                    message.id,
                    conversation_id,
                    actor,
                    MessageStatus::Read,
                    Some(previous),
                    now,
                );
                if let Some(device_id) = &device_id {
                    audit = audit.with_device(device_id.clone());
                }
                audit_rows.push(audit);
            }
        }

        if !audit_rows.is_empty() {
            self.status_events.append_batch(&audit_rows).await?;
        }

        self.conversations
            .advance_read_pointer(conversation_id, actor, newest.id)
            .await?;

        info!(
            conversation_id = %conversation_id,
            user_id = %actor,
            covered = covered.len(),
            "conversation marked read"
        );

        // 未读数归零影响本人的会话列表
        invalidate_lists(&self.cache, &[actor]).await;

        publish_best_effort(
            &self.realtime,
            &ChatEvent::ConversationRead {
                conversation_id,
                user_id: actor,
                message_ids: covered.clone(),
                timestamp: now,
            },
        )
        .await;

        Ok(covered)
    }

    /// 用户在会话中的未读消息数（指针之后、非本人发送、未删除）。
    pub async fn unread_count(
        &self,
        conversation_id: ConversationId,
        actor: UserId,
    ) -> Result<i64, ApplicationError> {
        let participant = self.ensure_participant(conversation_id, actor).await?;
        Ok(self
            .messages
            .count_after_pointer(conversation_id, actor, participant.last_read_message_id)
            .await?)
    }

    /// 消息的状态审计轨迹，按追加顺序。只有会话参与者可查询。
    pub async fn status_history(
        &self,
        message_id: MessageId,
        requester: UserId,
    ) -> Result<Vec<StatusEvent>, ApplicationError> {
        let message = self.load(message_id).await?;
        self.ensure_participant(message.conversation_id, requester)
            .await?;
        Ok(self.status_events.list_for_message(message_id).await?)
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
    ) -> Result<domain::Participant, ApplicationError> {
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
}
