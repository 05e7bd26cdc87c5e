//! WebSocket 协议帧
//!
//! 客户端帧与服务端控制帧共用 `type` 标签空间；服务端推送的
//! 业务事件直接序列化 [`domain::ChatEvent`]，其帧名与
//! [`domain::ChatEvent::event_type`] 一致。

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 客户端发来的帧
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// 加入会话房间，开始接收该会话的实时事件
    JoinConversation { conversation_id: Uuid },
    /// 离开会话房间
    LeaveConversation { conversation_id: Uuid },
    /// 开始输入
    TypingStart { conversation_id: Uuid },
    /// 停止输入
    TypingStop { conversation_id: Uuid },
    /// 标记单条消息已送达
    MarkDelivered {
        message_id: Uuid,
        device_id: Option<String>,
    },
    /// 标记单条消息已读
    MarkRead {
        message_id: Uuid,
        device_id: Option<String>,
    },
    /// 会话级全部已读
    MarkConversationRead {
        conversation_id: Uuid,
        device_id: Option<String>,
    },
    /// 心跳
    Ping,
}

/// 服务端控制帧（业务事件帧见 [`domain::ChatEvent`]）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlFrame {
    Pong,
    Error { code: String, message: String },
}

impl ControlFrame {
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        ControlFrame::Error {
            code: code.into(),
            message: message.into(),
        }
    }
}
