//! WebSocket 网关
//!
//! 升级时用 `?token=` 查询参数认证；连接期间客户端帧委托给
//! 应用层服务，服务端推送由会话注册表扇出（见 [`crate::registry`]）。

use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use application::ApplicationError;
use domain::{ConversationId, MessageId, UserId};

use crate::error::ApiError;
use crate::protocol::{ClientFrame, ControlFrame};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub(crate) struct WsQuery {
    token: String,
}

pub(crate) async fn websocket_upgrade(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    // 升级前认证，握手失败返回 401 而不是半开连接
    let user_id = state.jwt_service.verify_token(&query.token)?;
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, user_id)))
}

async fn handle_socket(socket: WebSocket, state: AppState, user_id: UserId) {
    let (sender, mut receiver) = mpsc::unbounded_channel::<String>();
    let session_id = state.registry.register(user_id, sender.clone()).await;

    if let Err(err) = state
        .presence_service
        .connected(user_id, &session_id.to_string())
        .await
    {
        warn!(user_id = %user_id, error = %err, "failed to record presence on connect");
    }

    let (mut ws_sender, mut incoming) = socket.split();

    let send_task = tokio::spawn(async move {
        while let Some(payload) = receiver.recv().await {
            if ws_sender.send(WsMessage::Text(payload.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(message)) = incoming.next().await {
        match message {
            WsMessage::Text(text) => {
                let frame = match serde_json::from_str::<ClientFrame>(&text) {
                    Ok(frame) => frame,
                    Err(err) => {
                        debug!(user_id = %user_id, error = %err, "unparseable client frame");
                        send_control(
                            &sender,
                            &ControlFrame::error("BAD_FRAME", err.to_string()),
                        );
                        continue;
                    }
                };
                handle_frame(&state, session_id, user_id, frame, &sender).await;
            }
            WsMessage::Close(_) => break,
            // Ping/Pong 由协议栈处理，二进制帧不在协议内
            _ => {}
        }
    }

    send_task.abort();
    state.registry.unregister(session_id).await;
    if let Err(err) = state.presence_service.disconnected(user_id).await {
        warn!(user_id = %user_id, error = %err, "failed to record presence on disconnect");
    }
    info!(user_id = %user_id, session_id = %session_id, "websocket closed");
}

async fn handle_frame(
    state: &AppState,
    session_id: Uuid,
    user_id: UserId,
    frame: ClientFrame,
    sender: &mpsc::UnboundedSender<String>,
) {
    let outcome: Result<(), ApplicationError> = match frame {
        ClientFrame::JoinConversation { conversation_id } => {
            let conversation_id = ConversationId::from(conversation_id);
            // 参与者校验通过才进房间，未授权的加入只收到错误帧
            match state
                .conversation_service
                .participants(conversation_id, user_id)
                .await
            {
                Ok(_) => {
                    state.registry.join_room(session_id, conversation_id).await;
                    Ok(())
                }
                Err(err) => Err(err),
            }
        }
        ClientFrame::LeaveConversation { conversation_id } => {
            state
                .registry
                .leave_room(session_id, ConversationId::from(conversation_id))
                .await;
            Ok(())
        }
        ClientFrame::TypingStart { conversation_id } => {
            state
                .presence_service
                .typing_started(ConversationId::from(conversation_id), user_id)
                .await
        }
        ClientFrame::TypingStop { conversation_id } => {
            state
                .presence_service
                .typing_stopped(ConversationId::from(conversation_id), user_id)
                .await
        }
        ClientFrame::MarkDelivered {
            message_id,
            device_id,
        } => state
            .status_service
            .mark_delivered(MessageId::from(message_id), user_id, device_id)
            .await
            .map(|_| ()),
        ClientFrame::MarkRead {
            message_id,
            device_id,
        } => state
            .status_service
            .mark_read(MessageId::from(message_id), user_id, device_id)
            .await
            .map(|_| ()),
        ClientFrame::MarkConversationRead {
            conversation_id,
            device_id,
        } => state
            .status_service
            .mark_conversation_read(ConversationId::from(conversation_id), user_id, device_id)
            .await
            .map(|_| ()),
        ClientFrame::Ping => {
            send_control(sender, &ControlFrame::Pong);
            Ok(())
        }
    };

    if let Err(err) = outcome {
        let api_err = ApiError::from(err);
        send_control(
            sender,
            &ControlFrame::error(api_err.code(), api_err.message()),
        );
    }
}

fn send_control(sender: &mpsc::UnboundedSender<String>, frame: &ControlFrame) {
    match serde_json::to_string(frame) {
        Ok(payload) => {
            let _ = sender.send(payload);
        }
        Err(err) => warn!(error = %err, "failed to serialize control frame"),
    }
}
