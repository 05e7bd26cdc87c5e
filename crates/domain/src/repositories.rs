//! 仓储接口定义
//!
//! 基础设施层提供 PostgreSQL 实现；应用层测试使用内存假实现。

use async_trait::async_trait;
use uuid::Uuid;

use crate::conversation::{Conversation, Participant};
use crate::errors::RepositoryError;
use crate::message::Message;
use crate::outbox::OutboxEvent;
use crate::profile::{ReplicaProfile, UserProfile};
use crate::status_event::StatusEvent;
use crate::value_objects::{ConversationId, MessageId, Timestamp, UserId};

pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// 发件箱存储。
///
/// 行的写入发生在产生它的业务事务内（见 [`IdentityUserStore`]），
/// 此接口只覆盖中继侧：崩溃恢复仅依赖 `processed` 标志。
#[async_trait]
pub trait OutboxRepository: Send + Sync {
    /// 按创建时间顺序取出最多 `limit` 条未处理行。
    async fn fetch_unprocessed(&self, limit: u32) -> RepositoryResult<Vec<OutboxEvent>>;

    /// 将行标记为已处理。
    async fn mark_processed(&self, id: Uuid, processed_at: Timestamp) -> RepositoryResult<()>;

    /// 未处理行数（用于健康检查）。
    async fn unprocessed_count(&self) -> RepositoryResult<i64>;
}

/// 身份域用户存储。
///
/// 每个变更方法在同一事务中写入用户行与对应的发件箱行：
/// 事务回滚则两者都不存在。
#[async_trait]
pub trait IdentityUserStore: Send + Sync {
    async fn create(
        &self,
        profile: UserProfile,
        event: OutboxEvent,
    ) -> RepositoryResult<UserProfile>;

    async fn update(
        &self,
        profile: UserProfile,
        event: OutboxEvent,
    ) -> RepositoryResult<UserProfile>;

    async fn delete(&self, user_id: UserId, event: OutboxEvent) -> RepositoryResult<()>;

    async fn find_by_id(&self, user_id: UserId) -> RepositoryResult<Option<UserProfile>>;
}

/// 物化副本存储，只由投影器写入。
#[async_trait]
pub trait ReplicaRepository: Send + Sync {
    /// Last-write-wins upsert。返回副本是否实际发生了变更；
    /// 重复或过期事件返回 `false`。
    async fn upsert(&self, replica: ReplicaProfile) -> RepositoryResult<bool>;

    /// 删除副本。幂等：副本不存在时也是成功。
    async fn delete(&self, subject_id: UserId) -> RepositoryResult<bool>;

    async fn find(&self, subject_id: UserId) -> RepositoryResult<Option<ReplicaProfile>>;
}

/// 会话与参与者存储。
#[async_trait]
pub trait ConversationRepository: Send + Sync {
    /// 在同一事务中创建会话与全部参与者。
    async fn create(
        &self,
        conversation: &Conversation,
        participants: &[Participant],
    ) -> RepositoryResult<()>;

    async fn find_by_id(&self, id: ConversationId) -> RepositoryResult<Option<Conversation>>;

    async fn find_participant(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> RepositoryResult<Option<Participant>>;

    async fn list_participants(
        &self,
        conversation_id: ConversationId,
    ) -> RepositoryResult<Vec<Participant>>;

    async fn list_for_user(&self, user_id: UserId) -> RepositoryResult<Vec<Conversation>>;

    /// 与给定用户共享至少一个会话的所有其他用户（去重）。
    /// 投影器用它做缓存失效扇出。
    async fn co_participant_ids(&self, user_id: UserId) -> RepositoryResult<Vec<UserId>>;

    /// 前向推进已读指针。存储实现必须保证指针从不后退
    /// （条件更新），指针已领先时为无操作。
    async fn advance_read_pointer(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
        message_id: MessageId,
    ) -> RepositoryResult<()>;
}

/// 消息存储。
#[async_trait]
pub trait MessageRepository: Send + Sync {
    async fn create(&self, message: &Message) -> RepositoryResult<()>;

    async fn update(&self, message: &Message) -> RepositoryResult<()>;

    async fn find_by_id(&self, id: MessageId) -> RepositoryResult<Option<Message>>;

    /// 会话中最新的未删除消息。
    async fn latest_in_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> RepositoryResult<Option<Message>>;

    /// 已读指针之后、且非 `reader` 本人发送的未删除消息，
    /// 按创建时间升序。指针为空时返回全部。
    async fn list_after_pointer(
        &self,
        conversation_id: ConversationId,
        reader: UserId,
        after: Option<MessageId>,
    ) -> RepositoryResult<Vec<Message>>;

    /// [`Self::list_after_pointer`] 的计数版本：索引范围扫描，
    /// 不做逐消息布尔扫描。
    async fn count_after_pointer(
        &self,
        conversation_id: ConversationId,
        reader: UserId,
        after: Option<MessageId>,
    ) -> RepositoryResult<i64>;
}

/// 状态审计存储，只追加。
#[async_trait]
pub trait StatusEventRepository: Send + Sync {
    async fn append(&self, event: &StatusEvent) -> RepositoryResult<()>;

    async fn append_batch(&self, events: &[StatusEvent]) -> RepositoryResult<()>;

    async fn list_for_message(&self, message_id: MessageId) -> RepositoryResult<Vec<StatusEvent>>;
}
