//! WebSocket 会话注册表与事件扇出
//!
//! 每个连接注册为一个会话，显式加入会话房间后才接收该会话的事件。
//! 投递走 `room → sessions` 和 `user → sessions` 两个索引，
//! 不按事件扫描全部连接。
//! 扇出遵循事件自带的路由策略：
//! - 会话级事件发给房间内全部会话；回执类事件排除操作者本人的会话
//!   （含其其它设备，操作者从自己请求的响应获得确认）
//! - 新消息不排除任何人，发送者依赖自己的回显
//! - 会话创建事件对每个参与者单播（此时还没有共享房间）
//! - 无会话归属的事件（在线状态）广播给全部会话

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use domain::{ChatEvent, ConversationId, UserId};

struct Session {
    user_id: UserId,
    sender: mpsc::UnboundedSender<String>,
}

/// 注册表索引：`rooms` 服务房间广播，`users` 服务按用户的
/// 单播与排除查找，都不需要扫描全部连接。
#[derive(Default)]
struct RegistryState {
    sessions: HashMap<Uuid, Session>,
    users: HashMap<UserId, HashSet<Uuid>>,
    rooms: HashMap<ConversationId, HashSet<Uuid>>,
}

/// 会话注册表
#[derive(Default)]
pub struct SessionRegistry {
    state: RwLock<RegistryState>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册连接，返回会话 id。
    pub async fn register(
        &self,
        user_id: UserId,
        sender: mpsc::UnboundedSender<String>,
    ) -> Uuid {
        let session_id = Uuid::new_v4();
        let mut state = self.state.write().await;
        state.sessions.insert(session_id, Session { user_id, sender });
        state.users.entry(user_id).or_default().insert(session_id);
        info!(session_id = %session_id, user_id = %user_id, "session registered");
        session_id
    }

    /// 注销连接并从全部索引中移除。
    pub async fn unregister(&self, session_id: Uuid) {
        let mut state = self.state.write().await;
        if let Some(session) = state.sessions.remove(&session_id) {
            if let Some(sessions) = state.users.get_mut(&session.user_id) {
                sessions.remove(&session_id);
                if sessions.is_empty() {
                    state.users.remove(&session.user_id);
                }
            }
        }
        for members in state.rooms.values_mut() {
            members.remove(&session_id);
        }
        state.rooms.retain(|_, members| !members.is_empty());
        info!(session_id = %session_id, "session unregistered");
    }

    /// 加入房间。一个会话同时最多在一个房间里，再次加入即切换。
    pub async fn join_room(&self, session_id: Uuid, conversation_id: ConversationId) {
        let mut state = self.state.write().await;
        for members in state.rooms.values_mut() {
            members.remove(&session_id);
        }
        state.rooms.retain(|_, members| !members.is_empty());
        state
            .rooms
            .entry(conversation_id)
            .or_default()
            .insert(session_id);
        debug!(session_id = %session_id, conversation_id = %conversation_id, "joined room");
    }

    pub async fn leave_room(&self, session_id: Uuid, conversation_id: ConversationId) {
        let mut state = self.state.write().await;
        if let Some(members) = state.rooms.get_mut(&conversation_id) {
            members.remove(&session_id);
            if members.is_empty() {
                state.rooms.remove(&conversation_id);
            }
        }
        debug!(session_id = %session_id, conversation_id = %conversation_id, "left room");
    }

    pub async fn session_count(&self) -> usize {
        self.state.read().await.sessions.len()
    }

    /// 按路由策略把事件投递到相关会话。
    pub async fn dispatch(&self, event: &ChatEvent) {
        let payload = match serde_json::to_string(event) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(error = %err, "failed to serialize event for fan-out");
                return;
            }
        };

        let state = self.state.read().await;

        match event {
            // 参与者还没有共享房间，经用户索引对每个参与者的全部会话单播
            ChatEvent::ConversationCreated {
                participant_ids, ..
            } => {
                for participant in participant_ids {
                    let Some(session_ids) = state.users.get(participant) else {
                        continue;
                    };
                    for session_id in session_ids {
                        if let Some(session) = state.sessions.get(session_id) {
                            Self::deliver(*session_id, session, &payload);
                        }
                    }
                }
            }
            _ => match event.conversation_id() {
                Some(conversation_id) => {
                    let Some(members) = state.rooms.get(&conversation_id) else {
                        return;
                    };
                    // 回执排除操作者的全部会话（多设备）
                    let excluded = event
                        .excluded_actor()
                        .and_then(|actor| state.users.get(&actor));
                    for session_id in members {
                        if excluded.is_some_and(|set| set.contains(session_id)) {
                            continue;
                        }
                        if let Some(session) = state.sessions.get(session_id) {
                            Self::deliver(*session_id, session, &payload);
                        }
                    }
                }
                // 全局事件（在线状态变更）
                None => {
                    for (session_id, session) in &state.sessions {
                        Self::deliver(*session_id, session, &payload);
                    }
                }
            },
        }
    }

    fn deliver(session_id: Uuid, session: &Session, payload: &str) {
        if session.sender.send(payload.to_string()).is_err() {
            debug!(session_id = %session_id, "session channel closed, skipping delivery");
        }
    }
}

/// 消费订阅通道并扇出，直到通道关闭。
pub async fn run_event_pump(
    registry: Arc<SessionRegistry>,
    mut receiver: mpsc::UnboundedReceiver<ChatEvent>,
) {
    while let Some(event) = receiver.recv().await {
        registry.dispatch(&event).await;
    }
    info!("event pump stopped: subscription channel closed");
}
