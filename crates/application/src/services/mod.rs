//! 用例服务
//!
//! 每个服务围绕一个聚合编排仓储、缓存与实时发布。实时发布是
//! 尽力而为：代理瞬态故障只记录日志，不向调用方传播，权威状态
//! 始终已落库。

use std::sync::Arc;

use tracing::warn;

use domain::{ChatEvent, UserId};

use crate::broker::ChatEventPublisher;
use crate::cache::ConversationCache;

mod conversation_service;
mod message_service;
mod presence_service;
mod profile_service;
mod status_service;

pub use conversation_service::ConversationService;
pub use message_service::MessageService;
pub use presence_service::PresenceService;
pub use profile_service::{ProfileService, ProfileUpdate};
pub use status_service::StatusService;

/// 发布实时事件，失败只记录。
pub(crate) async fn publish_best_effort(publisher: &Arc<dyn ChatEventPublisher>, event: &ChatEvent) {
    if let Err(err) = publisher.publish(event).await {
        warn!(
            event_type = event.event_type(),
            error = %err,
            "realtime publish failed, clients will catch up on reconnect"
        );
    }
}

/// 失效一组用户的会话列表缓存，失败只记录。
pub(crate) async fn invalidate_lists(cache: &Arc<dyn ConversationCache>, user_ids: &[UserId]) {
    for user_id in user_ids {
        if let Err(err) = cache.invalidate(*user_id).await {
            warn!(user_id = %user_id, error = %err, "cache invalidation failed");
        }
    }
}
