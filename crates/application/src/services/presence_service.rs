//! 在线与输入状态服务
//!
//! 网关在连接建立/断开时调用，输入指示由客户端帧驱动。
//! 状态写入共享键值存储（带 TTL），事件全局或按房间广播。

use std::sync::Arc;

use tracing::info;

use domain::{ChatEvent, ConversationId, ConversationRepository, DomainError, UserId};

use crate::broker::ChatEventPublisher;
use crate::clock::Clock;
use crate::error::ApplicationError;
use crate::presence::{PresenceStore, TypingStore, TYPING_TTL};
use crate::services::publish_best_effort;

pub struct PresenceService {
    presence: Arc<dyn PresenceStore>,
    typing: Arc<dyn TypingStore>,
    conversations: Arc<dyn ConversationRepository>,
    realtime: Arc<dyn ChatEventPublisher>,
    clock: Arc<dyn Clock>,
}

impl PresenceService {
    pub fn new(
        presence: Arc<dyn PresenceStore>,
        typing: Arc<dyn TypingStore>,
        conversations: Arc<dyn ConversationRepository>,
        realtime: Arc<dyn ChatEventPublisher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            presence,
            typing,
            conversations,
            realtime,
            clock,
        }
    }

    /// 连接建立：标记在线并全局广播。
    pub async fn connected(
        &self,
        user_id: UserId,
        socket_id: &str,
    ) -> Result<(), ApplicationError> {
        self.presence.set_online(user_id, socket_id).await?;
        info!(user_id = %user_id, socket_id, "user online");

        publish_best_effort(
            &self.realtime,
            &ChatEvent::UserPresenceUpdate {
                user_id,
                is_online: true,
                last_seen: None,
            },
        )
        .await;
        Ok(())
    }

    /// 连接断开：标记离线并携带最后在线时间广播。
    pub async fn disconnected(&self, user_id: UserId) -> Result<(), ApplicationError> {
        let last_seen = self.presence.set_offline(user_id).await?;
        info!(user_id = %user_id, "user offline");

        publish_best_effort(
            &self.realtime,
            &ChatEvent::UserPresenceUpdate {
                user_id,
                is_online: false,
                last_seen,
            },
        )
        .await;
        Ok(())
    }

    pub async fn is_online(&self, user_id: UserId) -> Result<bool, ApplicationError> {
        Ok(self.presence.is_online(user_id).await?)
    }

    /// 写入带 TTL 的输入标记并广播指示。
    ///
    /// 崩溃或断网的客户端发不出停止帧，标记在 TTL 窗口内自动过期。
    pub async fn typing_started(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> Result<(), ApplicationError> {
        self.ensure_participant(conversation_id, user_id).await?;
        self.typing
            .mark_typing(conversation_id, user_id, TYPING_TTL)
            .await?;

        self.broadcast_typing(conversation_id, user_id, true).await;
        Ok(())
    }

    /// 删除输入标记并广播停止指示。
    pub async fn typing_stopped(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> Result<(), ApplicationError> {
        self.ensure_participant(conversation_id, user_id).await?;
        self.typing.clear_typing(conversation_id, user_id).await?;

        self.broadcast_typing(conversation_id, user_id, false).await;
        Ok(())
    }

    /// 会话中当前正在输入的用户。
    pub async fn typing_users(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Vec<UserId>, ApplicationError> {
        Ok(self.typing.typing_users(conversation_id).await?)
    }

    async fn broadcast_typing(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
        typing: bool,
    ) {
        publish_best_effort(
            &self.realtime,
            &ChatEvent::TypingIndicator {
                conversation_id,
                user_id,
                typing,
                timestamp: self.clock.now(),
            },
        )
        .await;
    }

    async fn ensure_participant(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> Result<(), ApplicationError> {
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
}
