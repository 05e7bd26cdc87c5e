//! 测试用的内存假实现
//!
//! 与领域仓储接口一一对应，供应用层单元测试使用。

use std::collections::HashMap;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use domain::{
    ChatEvent, Conversation, ConversationId, ConversationRepository, IdentityEvent,
    IdentityUserStore, Message, MessageId, MessageRepository, OutboxEvent, OutboxRepository,
    Participant, ReplicaProfile, ReplicaRepository, RepositoryError, RepositoryResult,
    StatusEvent, StatusEventRepository, Timestamp, UserId, UserProfile,
};

use crate::broker::{BrokerError, ChatEventPublisher, IdentityEventPublisher};
use crate::cache::{CacheError, ConversationCache};
use crate::clock::Clock;
use crate::presence::{PresenceError, PresenceStore, TypingStore};

/// 可手动推进的固定时钟。
pub struct FixedClock {
    now: StdMutex<Timestamp>,
}

impl FixedClock {
    pub fn new(now: Timestamp) -> Self {
        Self {
            now: StdMutex::new(now),
        }
    }

    pub fn advance(&self, delta: chrono::Duration) {
        let mut now = self.now.lock().unwrap();
        *now += delta;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> Timestamp {
        *self.now.lock().unwrap()
    }
}

/// 内存发件箱。
pub struct MemoryOutboxRepository {
    rows: Mutex<Vec<OutboxEvent>>,
    mark_calls: Mutex<usize>,
    seq: Mutex<i64>,
}

impl MemoryOutboxRepository {
    pub fn new() -> Self {
        Self {
            rows: Mutex::new(Vec::new()),
            mark_calls: Mutex::new(0),
            seq: Mutex::new(0),
        }
    }

    /// 以单调递增的创建时间写入一行。
    pub async fn record(&self, event: &IdentityEvent) -> OutboxEvent {
        let mut seq = self.seq.lock().await;
        *seq += 1;
        let created_at = Utc::now() + chrono::Duration::milliseconds(*seq);
        let row = OutboxEvent::from_identity_event(event, created_at).unwrap();
        self.rows.lock().await.push(row.clone());
        row
    }

    pub async fn mark_processed_calls(&self) -> usize {
        *self.mark_calls.lock().await
    }
}

#[async_trait]
impl OutboxRepository for MemoryOutboxRepository {
    async fn fetch_unprocessed(&self, limit: u32) -> RepositoryResult<Vec<OutboxEvent>> {
        let rows = self.rows.lock().await;
        let mut unprocessed: Vec<OutboxEvent> =
            rows.iter().filter(|r| !r.processed).cloned().collect();
        unprocessed.sort_by_key(|r| r.created_at);
        unprocessed.truncate(limit as usize);
        Ok(unprocessed)
    }

    async fn mark_processed(&self, id: Uuid, processed_at: Timestamp) -> RepositoryResult<()> {
        let mut rows = self.rows.lock().await;
        let row = rows
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(RepositoryError::NotFound)?;
        row.processed = true;
        row.processed_at = Some(processed_at);
        *self.mark_calls.lock().await += 1;
        Ok(())
    }

    async fn unprocessed_count(&self) -> RepositoryResult<i64> {
        let rows = self.rows.lock().await;
        Ok(rows.iter().filter(|r| !r.processed).count() as i64)
    }
}

/// 可配置失败次数的身份事件发布者。
pub struct FlakyIdentityPublisher {
    fail_first: Mutex<u32>,
    failing_subject: Option<UserId>,
    attempts: Mutex<u32>,
    published: Mutex<Vec<IdentityEvent>>,
}

impl FlakyIdentityPublisher {
    /// 前 `n` 次发布尝试失败，之后成功。
    pub fn failing_first(n: u32) -> Self {
        Self {
            fail_first: Mutex::new(n),
            failing_subject: None,
            attempts: Mutex::new(0),
            published: Mutex::new(Vec::new()),
        }
    }

    /// 对指定主体的事件持续失败。
    pub fn failing_subject(subject: UserId) -> Self {
        Self {
            fail_first: Mutex::new(0),
            failing_subject: Some(subject),
            attempts: Mutex::new(0),
            published: Mutex::new(Vec::new()),
        }
    }

    pub async fn published(&self) -> Vec<IdentityEvent> {
        self.published.lock().await.clone()
    }

    pub async fn attempts(&self) -> u32 {
        *self.attempts.lock().await
    }
}

#[async_trait]
impl IdentityEventPublisher for FlakyIdentityPublisher {
    async fn publish(&self, event: &IdentityEvent) -> Result<(), BrokerError> {
        *self.attempts.lock().await += 1;

        if self.failing_subject == Some(event.subject_id()) {
            return Err(BrokerError::unavailable("simulated broker outage"));
        }

        let mut remaining = self.fail_first.lock().await;
        if *remaining > 0 {
            *remaining -= 1;
            return Err(BrokerError::publish_failed("simulated publish failure"));
        }

        self.published.lock().await.push(event.clone());
        Ok(())
    }
}

/// 记录所有已发布实时事件的发布者。
pub struct RecordingChatPublisher {
    published: Mutex<Vec<ChatEvent>>,
    fail: Mutex<bool>,
}

impl RecordingChatPublisher {
    pub fn new() -> Self {
        Self {
            published: Mutex::new(Vec::new()),
            fail: Mutex::new(false),
        }
    }

    pub async fn published(&self) -> Vec<ChatEvent> {
        self.published.lock().await.clone()
    }

    pub async fn fail_next_operations(&self) {
        *self.fail.lock().await = true;
    }
}

#[async_trait]
impl ChatEventPublisher for RecordingChatPublisher {
    async fn publish(&self, event: &ChatEvent) -> Result<(), BrokerError> {
        if *self.fail.lock().await {
            return Err(BrokerError::unavailable("simulated broker outage"));
        }
        self.published.lock().await.push(event.clone());
        Ok(())
    }
}

/// 内存副本仓储，LWW 语义与 Pg 实现一致。
pub struct MemoryReplicaRepository {
    replicas: Mutex<HashMap<UserId, ReplicaProfile>>,
}

impl MemoryReplicaRepository {
    pub fn new() -> Self {
        Self {
            replicas: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl ReplicaRepository for MemoryReplicaRepository {
    async fn upsert(&self, replica: ReplicaProfile) -> RepositoryResult<bool> {
        let mut replicas = self.replicas.lock().await;
        match replicas.get_mut(&replica.subject_id) {
            Some(existing) => Ok(existing.absorb(&replica)),
            None => {
                replicas.insert(replica.subject_id, replica);
                Ok(true)
            }
        }
    }

    async fn delete(&self, subject_id: UserId) -> RepositoryResult<bool> {
        Ok(self.replicas.lock().await.remove(&subject_id).is_some())
    }

    async fn find(&self, subject_id: UserId) -> RepositoryResult<Option<ReplicaProfile>> {
        Ok(self.replicas.lock().await.get(&subject_id).cloned())
    }
}

#[derive(Default)]
struct ChatState {
    conversations: Vec<Conversation>,
    participants: Vec<Participant>,
    messages: Vec<Message>,
}

impl ChatState {
    fn message_order_key(&self, id: MessageId) -> Option<(Timestamp, Uuid)> {
        self.messages
            .iter()
            .find(|m| m.id == id)
            .map(|m| (m.created_at, m.id.0))
    }
}

/// 会话 + 消息的共享内存存储。
///
/// 两个仓储接口由同一份状态支撑，`advance_read_pointer` 才能按
/// 消息创建时间裁决前向性，与 Pg 实现的条件更新一致。
pub struct MemoryChatStore {
    state: Mutex<ChatState>,
}

impl MemoryChatStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ChatState::default()),
        }
    }
}

#[async_trait]
impl ConversationRepository for MemoryChatStore {
    async fn create(
        &self,
        conversation: &Conversation,
        participants: &[Participant],
    ) -> RepositoryResult<()> {
        let mut state = self.state.lock().await;
        for participant in participants {
            let duplicate = state.participants.iter().any(|p| {
                p.conversation_id == participant.conversation_id
                    && p.user_id == participant.user_id
            });
            if duplicate {
                return Err(RepositoryError::Conflict);
            }
        }
        state.conversations.push(conversation.clone());
        state.participants.extend_from_slice(participants);
        Ok(())
    }

    async fn find_by_id(&self, id: ConversationId) -> RepositoryResult<Option<Conversation>> {
        let state = self.state.lock().await;
        Ok(state.conversations.iter().find(|c| c.id == id).cloned())
    }

    async fn find_participant(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> RepositoryResult<Option<Participant>> {
        let state = self.state.lock().await;
        Ok(state
            .participants
            .iter()
            .find(|p| p.conversation_id == conversation_id && p.user_id == user_id)
            .cloned())
    }

    async fn list_participants(
        &self,
        conversation_id: ConversationId,
    ) -> RepositoryResult<Vec<Participant>> {
        let state = self.state.lock().await;
        Ok(state
            .participants
            .iter()
            .filter(|p| p.conversation_id == conversation_id)
            .cloned()
            .collect())
    }

    async fn list_for_user(&self, user_id: UserId) -> RepositoryResult<Vec<Conversation>> {
        let state = self.state.lock().await;
        let conversation_ids: Vec<ConversationId> = state
            .participants
            .iter()
            .filter(|p| p.user_id == user_id)
            .map(|p| p.conversation_id)
            .collect();
        Ok(state
            .conversations
            .iter()
            .filter(|c| conversation_ids.contains(&c.id))
            .cloned()
            .collect())
    }

    async fn co_participant_ids(&self, user_id: UserId) -> RepositoryResult<Vec<UserId>> {
        let state = self.state.lock().await;
        let own: Vec<ConversationId> = state
            .participants
            .iter()
            .filter(|p| p.user_id == user_id)
            .map(|p| p.conversation_id)
            .collect();
        let mut peers: Vec<UserId> = state
            .participants
            .iter()
            .filter(|p| own.contains(&p.conversation_id) && p.user_id != user_id)
            .map(|p| p.user_id)
            .collect();
        peers.sort_by_key(|id| id.0);
        peers.dedup();
        Ok(peers)
    }

    async fn advance_read_pointer(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
        message_id: MessageId,
    ) -> RepositoryResult<()> {
        let mut state = self.state.lock().await;
        let candidate = state
            .message_order_key(message_id)
            .ok_or(RepositoryError::NotFound)?;
        let current = state
            .participants
            .iter()
            .find(|p| p.conversation_id == conversation_id && p.user_id == user_id)
            .ok_or(RepositoryError::NotFound)?
            .last_read_message_id
            .and_then(|id| state.message_order_key(id));

        // 条件前向更新：候选不比当前指针新则无操作
        if let Some(current) = current {
            if candidate <= current {
                return Ok(());
            }
        }

        let participant = state
            .participants
            .iter_mut()
            .find(|p| p.conversation_id == conversation_id && p.user_id == user_id)
            .ok_or(RepositoryError::NotFound)?;
        participant.last_read_message_id = Some(message_id);
        Ok(())
    }
}

#[async_trait]
impl MessageRepository for MemoryChatStore {
    async fn create(&self, message: &Message) -> RepositoryResult<()> {
        self.state.lock().await.messages.push(message.clone());
        Ok(())
    }

    async fn update(&self, message: &Message) -> RepositoryResult<()> {
        let mut state = self.state.lock().await;
        let slot = state
            .messages
            .iter_mut()
            .find(|m| m.id == message.id)
            .ok_or(RepositoryError::NotFound)?;
        *slot = message.clone();
        Ok(())
    }

    async fn find_by_id(&self, id: MessageId) -> RepositoryResult<Option<Message>> {
        let state = self.state.lock().await;
        Ok(state.messages.iter().find(|m| m.id == id).cloned())
    }

    async fn latest_in_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> RepositoryResult<Option<Message>> {
        let state = self.state.lock().await;
        Ok(state
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id && !m.is_deleted())
            .max_by_key(|m| (m.created_at, m.id.0))
            .cloned())
    }

    async fn list_after_pointer(
        &self,
        conversation_id: ConversationId,
        reader: UserId,
        after: Option<MessageId>,
    ) -> RepositoryResult<Vec<Message>> {
        let state = self.state.lock().await;
        let cutoff = after.and_then(|id| state.message_order_key(id));

        let mut unread: Vec<Message> = state
            .messages
            .iter()
            .filter(|m| {
                m.conversation_id == conversation_id
                    && !m.is_deleted()
                    && m.sender_id != reader
                    && cutoff.map_or(true, |c| (m.created_at, m.id.0) > c)
            })
            .cloned()
            .collect();
        unread.sort_by_key(|m| (m.created_at, m.id.0));
        Ok(unread)
    }

    async fn count_after_pointer(
        &self,
        conversation_id: ConversationId,
        reader: UserId,
        after: Option<MessageId>,
    ) -> RepositoryResult<i64> {
        Ok(self
            .list_after_pointer(conversation_id, reader, after)
            .await?
            .len() as i64)
    }
}

/// 内存状态审计存储。
pub struct MemoryStatusEventRepository {
    events: Mutex<Vec<StatusEvent>>,
}

impl MemoryStatusEventRepository {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    pub async fn all(&self) -> Vec<StatusEvent> {
        self.events.lock().await.clone()
    }
}

#[async_trait]
impl StatusEventRepository for MemoryStatusEventRepository {
    async fn append(&self, event: &StatusEvent) -> RepositoryResult<()> {
        self.events.lock().await.push(event.clone());
        Ok(())
    }

    async fn append_batch(&self, events: &[StatusEvent]) -> RepositoryResult<()> {
        self.events.lock().await.extend_from_slice(events);
        Ok(())
    }

    async fn list_for_message(&self, message_id: MessageId) -> RepositoryResult<Vec<StatusEvent>> {
        let events = self.events.lock().await;
        Ok(events
            .iter()
            .filter(|e| e.message_id == message_id)
            .cloned()
            .collect())
    }
}

/// 仅供投影器测试的轻量会话仓储（无消息状态）。
pub struct MemoryConversationRepository {
    inner: MemoryChatStore,
}

impl MemoryConversationRepository {
    pub fn new() -> Self {
        Self {
            inner: MemoryChatStore::new(),
        }
    }
}

#[async_trait]
impl ConversationRepository for MemoryConversationRepository {
    async fn create(
        &self,
        conversation: &Conversation,
        participants: &[Participant],
    ) -> RepositoryResult<()> {
        ConversationRepository::create(&self.inner, conversation, participants).await
    }

    async fn find_by_id(&self, id: ConversationId) -> RepositoryResult<Option<Conversation>> {
        ConversationRepository::find_by_id(&self.inner, id).await
    }

    async fn find_participant(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> RepositoryResult<Option<Participant>> {
        self.inner.find_participant(conversation_id, user_id).await
    }

    async fn list_participants(
        &self,
        conversation_id: ConversationId,
    ) -> RepositoryResult<Vec<Participant>> {
        self.inner.list_participants(conversation_id).await
    }

    async fn list_for_user(&self, user_id: UserId) -> RepositoryResult<Vec<Conversation>> {
        self.inner.list_for_user(user_id).await
    }

    async fn co_participant_ids(&self, user_id: UserId) -> RepositoryResult<Vec<UserId>> {
        self.inner.co_participant_ids(user_id).await
    }

    async fn advance_read_pointer(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
        message_id: MessageId,
    ) -> RepositoryResult<()> {
        self.inner
            .advance_read_pointer(conversation_id, user_id, message_id)
            .await
    }
}

/// 内存会话列表缓存，支持注入故障。
pub struct MemoryConversationCache {
    entries: Mutex<HashMap<UserId, String>>,
    fail: Mutex<bool>,
}

impl MemoryConversationCache {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            fail: Mutex::new(false),
        }
    }

    pub async fn seed(&self, user_id: UserId, payload: &str) {
        self.entries
            .lock()
            .await
            .insert(user_id, payload.to_string());
    }

    pub async fn fail_next_operations(&self) {
        *self.fail.lock().await = true;
    }

    async fn check_failure(&self) -> Result<(), CacheError> {
        if *self.fail.lock().await {
            Err(CacheError::new("simulated cache outage"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ConversationCache for MemoryConversationCache {
    async fn get(&self, user_id: UserId) -> Result<Option<String>, CacheError> {
        self.check_failure().await?;
        Ok(self.entries.lock().await.get(&user_id).cloned())
    }

    async fn put(
        &self,
        user_id: UserId,
        payload: String,
        _ttl: Duration,
    ) -> Result<(), CacheError> {
        self.check_failure().await?;
        self.entries.lock().await.insert(user_id, payload);
        Ok(())
    }

    async fn invalidate(&self, user_id: UserId) -> Result<(), CacheError> {
        self.check_failure().await?;
        self.entries.lock().await.remove(&user_id);
        Ok(())
    }
}

struct IdentityState {
    users: HashMap<UserId, UserProfile>,
    outbox: Vec<OutboxEvent>,
    seq: i64,
}

/// 身份域内存存储：用户行与发件箱行"同事务"写入。
///
/// 同时实现 [`OutboxRepository`]，可与中继器串成完整管道。
pub struct MemoryIdentityStore {
    state: Mutex<IdentityState>,
}

impl MemoryIdentityStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(IdentityState {
                users: HashMap::new(),
                outbox: Vec::new(),
                seq: 0,
            }),
        }
    }

    pub async fn outbox_rows(&self) -> Vec<OutboxEvent> {
        self.state.lock().await.outbox.clone()
    }
}

#[async_trait]
impl IdentityUserStore for MemoryIdentityStore {
    async fn create(
        &self,
        profile: UserProfile,
        event: OutboxEvent,
    ) -> RepositoryResult<UserProfile> {
        let mut state = self.state.lock().await;
        if state.users.contains_key(&profile.id) {
            return Err(RepositoryError::Conflict);
        }
        state.users.insert(profile.id, profile.clone());
        state.outbox.push(event);
        Ok(profile)
    }

    async fn update(
        &self,
        profile: UserProfile,
        event: OutboxEvent,
    ) -> RepositoryResult<UserProfile> {
        let mut state = self.state.lock().await;
        if !state.users.contains_key(&profile.id) {
            return Err(RepositoryError::NotFound);
        }
        state.users.insert(profile.id, profile.clone());
        state.outbox.push(event);
        Ok(profile)
    }

    async fn delete(&self, user_id: UserId, event: OutboxEvent) -> RepositoryResult<()> {
        let mut state = self.state.lock().await;
        if state.users.remove(&user_id).is_none() {
            return Err(RepositoryError::NotFound);
        }
        state.outbox.push(event);
        Ok(())
    }

    async fn find_by_id(&self, user_id: UserId) -> RepositoryResult<Option<UserProfile>> {
        Ok(self.state.lock().await.users.get(&user_id).cloned())
    }
}

#[async_trait]
impl OutboxRepository for MemoryIdentityStore {
    async fn fetch_unprocessed(&self, limit: u32) -> RepositoryResult<Vec<OutboxEvent>> {
        let state = self.state.lock().await;
        let mut unprocessed: Vec<OutboxEvent> = state
            .outbox
            .iter()
            .filter(|r| !r.processed)
            .cloned()
            .collect();
        unprocessed.sort_by_key(|r| r.created_at);
        unprocessed.truncate(limit as usize);
        Ok(unprocessed)
    }

    async fn mark_processed(&self, id: Uuid, processed_at: Timestamp) -> RepositoryResult<()> {
        let mut state = self.state.lock().await;
        let row = state
            .outbox
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(RepositoryError::NotFound)?;
        row.processed = true;
        row.processed_at = Some(processed_at);
        Ok(())
    }

    async fn unprocessed_count(&self) -> RepositoryResult<i64> {
        let state = self.state.lock().await;
        Ok(state.outbox.iter().filter(|r| !r.processed).count() as i64)
    }
}

struct PresenceState {
    online: HashMap<UserId, Timestamp>,
    last_seen: HashMap<UserId, Timestamp>,
    typing: HashMap<(ConversationId, UserId), Timestamp>,
}

/// 基于可控时钟的内存在线/输入状态存储。
pub struct MemoryPresenceStore {
    state: Mutex<PresenceState>,
    clock: std::sync::Arc<FixedClock>,
}

impl MemoryPresenceStore {
    pub fn new(clock: std::sync::Arc<FixedClock>) -> Self {
        Self {
            state: Mutex::new(PresenceState {
                online: HashMap::new(),
                last_seen: HashMap::new(),
                typing: HashMap::new(),
            }),
            clock,
        }
    }
}

#[async_trait]
impl PresenceStore for MemoryPresenceStore {
    async fn set_online(&self, user_id: UserId, _socket_id: &str) -> Result<(), PresenceError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        state.online.insert(user_id, now);
        state.last_seen.insert(user_id, now);
        Ok(())
    }

    async fn set_offline(&self, user_id: UserId) -> Result<Option<Timestamp>, PresenceError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        state.online.remove(&user_id);
        state.last_seen.insert(user_id, now);
        Ok(Some(now))
    }

    async fn is_online(&self, user_id: UserId) -> Result<bool, PresenceError> {
        Ok(self.state.lock().await.online.contains_key(&user_id))
    }
}

#[async_trait]
impl TypingStore for MemoryPresenceStore {
    async fn mark_typing(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
        ttl: Duration,
    ) -> Result<(), PresenceError> {
        let expires_at = self.clock.now() + chrono::Duration::from_std(ttl).unwrap();
        self.state
            .lock()
            .await
            .typing
            .insert((conversation_id, user_id), expires_at);
        Ok(())
    }

    async fn clear_typing(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> Result<(), PresenceError> {
        self.state
            .lock()
            .await
            .typing
            .remove(&(conversation_id, user_id));
        Ok(())
    }

    async fn typing_users(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Vec<UserId>, PresenceError> {
        let now = self.clock.now();
        let state = self.state.lock().await;
        Ok(state
            .typing
            .iter()
            .filter(|((conv, _), expires_at)| *conv == conversation_id && **expires_at > now)
            .map(|((_, user), _)| *user)
            .collect())
    }
}
