//! 事务性发件箱行
//!
//! 与触发它的业务变更写在同一事务中：事务回滚则事件不存在，
//! 绝不产生孤儿事件。未处理行按 `created_at` 全序中继。

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::events::IdentityEvent;
use crate::value_objects::{Timestamp, UserId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxEvent {
    pub id: Uuid,
    pub subject_id: UserId,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub processed: bool,
    pub created_at: Timestamp,
    pub processed_at: Option<Timestamp>,
}

impl OutboxEvent {
    /// 由身份事件构造待写入的发件箱行。
    pub fn from_identity_event(
        event: &IdentityEvent,
        created_at: Timestamp,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            id: Uuid::new_v4(),
            subject_id: event.subject_id(),
            event_type: event.event_type().to_string(),
            payload: serde_json::to_value(event)?,
            processed: false,
            created_at,
            processed_at: None,
        })
    }

    /// 反序列化负载为身份事件。
    pub fn identity_event(&self) -> Result<IdentityEvent, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn outbox_row_round_trips_its_payload() {
        let event = IdentityEvent::UserCreated {
            user_id: UserId::new(),
            username: "bob".to_string(),
            display_name: None,
            avatar_url: None,
            timestamp: Utc::now(),
        };

        let row = OutboxEvent::from_identity_event(&event, Utc::now()).unwrap();
        assert!(!row.processed);
        assert_eq!(row.subject_id, event.subject_id());
        assert_eq!(row.event_type, "USER_CREATED");
        assert_eq!(row.identity_event().unwrap(), event);
    }
}
