use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::{get, patch, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use uuid::Uuid;

use application::ProfileUpdate;
use domain::{
    Conversation, ConversationId, Message, MessageId, Participant, StatusEvent, UserId,
    UserProfile,
};

use crate::{error::ApiError, state::AppState, websocket};

#[derive(Debug, Deserialize)]
struct CreateUserPayload {
    username: String,
    display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UpdateUserPayload {
    username: Option<String>,
    display_name: Option<String>,
    avatar_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenPayload {
    user_id: Uuid,
}

#[derive(Debug, Serialize)]
struct TokenResponse {
    token: String,
}

/// 创建会话的负载，`kind` 区分单聊和群聊。
#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum CreateConversationPayload {
    Direct { peer_id: Uuid },
    Group { name: String, member_ids: Vec<Uuid> },
}

#[derive(Debug, Deserialize)]
struct SendMessagePayload {
    content: String,
}

#[derive(Debug, Deserialize)]
struct EditMessagePayload {
    content: String,
}

#[derive(Debug, Default, Deserialize)]
struct StatusPayload {
    device_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct StatusAck {
    applied: bool,
}

#[derive(Debug, Serialize)]
struct UnreadResponse {
    unread_count: i64,
}

#[derive(Debug, Serialize)]
struct ConversationReadResponse {
    message_ids: Vec<MessageId>,
}

#[derive(Debug, Serialize)]
struct PresenceResponse {
    user_id: UserId,
    is_online: bool,
}

#[derive(Debug, Serialize)]
struct TypingResponse {
    user_ids: Vec<UserId>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .nest("/api/v1", api_routes())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/token", post(issue_token))
        .route("/users", post(create_user))
        .route(
            "/users/{user_id}",
            get(get_user).patch(update_user).delete(delete_user),
        )
        .route("/users/{user_id}/presence", get(get_presence))
        .route("/conversations", post(create_conversation).get(list_conversations))
        .route(
            "/conversations/{conversation_id}/participants",
            get(list_participants),
        )
        .route(
            "/conversations/{conversation_id}/messages",
            post(send_message),
        )
        .route("/conversations/{conversation_id}/unread", get(unread_count))
        .route(
            "/conversations/{conversation_id}/read",
            post(mark_conversation_read),
        )
        .route("/conversations/{conversation_id}/typing", get(typing_users))
        .route(
            "/messages/{message_id}",
            patch(edit_message).delete(delete_message),
        )
        .route("/messages/{message_id}/delivered", post(mark_delivered))
        .route("/messages/{message_id}/read", post(mark_read))
        .route(
            "/messages/{message_id}/status-history",
            get(status_history),
        )
        .route("/ws", get(websocket::websocket_upgrade))
}

async fn health() -> StatusCode {
    StatusCode::OK
}

/// 为已存在的用户签发访问令牌。没有口令存储，身份由调用方担保，
/// 适用于内网部署和端到端测试。
async fn issue_token(
    State(state): State<AppState>,
    Json(payload): Json<TokenPayload>,
) -> Result<Json<TokenResponse>, ApiError> {
    let user_id = UserId::from(payload.user_id);
    state.profile_service.get_user(user_id).await?;
    let token = state.jwt_service.generate_token(user_id)?;
    Ok(Json(TokenResponse { token }))
}

async fn create_user(
    State(state): State<AppState>,
    Json(payload): Json<CreateUserPayload>,
) -> Result<(StatusCode, Json<UserProfile>), ApiError> {
    let profile = state
        .profile_service
        .create_user(payload.username, payload.display_name)
        .await?;
    Ok((StatusCode::CREATED, Json(profile)))
}

async fn get_user(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<UserProfile>, ApiError> {
    state.jwt_service.extract_user_from_headers(&headers)?;
    let profile = state.profile_service.get_user(UserId::from(user_id)).await?;
    Ok(Json(profile))
}

async fn update_user(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    headers: HeaderMap,
    Json(payload): Json<UpdateUserPayload>,
) -> Result<Json<UserProfile>, ApiError> {
    let actor = state.jwt_service.extract_user_from_headers(&headers)?;
    let user_id = UserId::from(user_id);
    if actor != user_id {
        return Err(ApiError::new(
            StatusCode::FORBIDDEN,
            "FORBIDDEN",
            "users can only modify their own profile",
        ));
    }

    let profile = state
        .profile_service
        .update_user(
            user_id,
            ProfileUpdate {
                username: payload.username,
                display_name: payload.display_name,
                avatar_url: payload.avatar_url,
            },
        )
        .await?;
    Ok(Json(profile))
}

async fn delete_user(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let actor = state.jwt_service.extract_user_from_headers(&headers)?;
    let user_id = UserId::from(user_id);
    if actor != user_id {
        return Err(ApiError::new(
            StatusCode::FORBIDDEN,
            "FORBIDDEN",
            "users can only delete their own profile",
        ));
    }

    state.profile_service.delete_user(user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_presence(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<PresenceResponse>, ApiError> {
    state.jwt_service.extract_user_from_headers(&headers)?;
    let user_id = UserId::from(user_id);
    let is_online = state.presence_service.is_online(user_id).await?;
    Ok(Json(PresenceResponse { user_id, is_online }))
}

async fn create_conversation(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateConversationPayload>,
) -> Result<(StatusCode, Json<Conversation>), ApiError> {
    let actor = state.jwt_service.extract_user_from_headers(&headers)?;

    let conversation = match payload {
        CreateConversationPayload::Direct { peer_id } => {
            state
                .conversation_service
                .create_direct(actor, UserId::from(peer_id))
                .await?
        }
        CreateConversationPayload::Group { name, member_ids } => {
            let member_ids = member_ids.into_iter().map(UserId::from).collect();
            state
                .conversation_service
                .create_group(actor, name, member_ids)
                .await?
        }
    };
    Ok((StatusCode::CREATED, Json(conversation)))
}

async fn list_conversations(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<Conversation>>, ApiError> {
    let actor = state.jwt_service.extract_user_from_headers(&headers)?;
    let list = state.conversation_service.list_for_user(actor).await?;
    Ok(Json(list))
}

async fn list_participants(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<Vec<Participant>>, ApiError> {
    let actor = state.jwt_service.extract_user_from_headers(&headers)?;
    let participants = state
        .conversation_service
        .participants(ConversationId::from(conversation_id), actor)
        .await?;
    Ok(Json(participants))
}

async fn send_message(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    headers: HeaderMap,
    Json(payload): Json<SendMessagePayload>,
) -> Result<(StatusCode, Json<Message>), ApiError> {
    let actor = state.jwt_service.extract_user_from_headers(&headers)?;
    let message = state
        .message_service
        .send_message(ConversationId::from(conversation_id), actor, payload.content)
        .await?;
    Ok((StatusCode::CREATED, Json(message)))
}

async fn unread_count(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<UnreadResponse>, ApiError> {
    let actor = state.jwt_service.extract_user_from_headers(&headers)?;
    let unread_count = state
        .status_service
        .unread_count(ConversationId::from(conversation_id), actor)
        .await?;
    Ok(Json(UnreadResponse { unread_count }))
}

async fn mark_conversation_read(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    headers: HeaderMap,
    Json(payload): Json<StatusPayload>,
) -> Result<Json<ConversationReadResponse>, ApiError> {
    let actor = state.jwt_service.extract_user_from_headers(&headers)?;
    let message_ids = state
        .status_service
        .mark_conversation_read(
            ConversationId::from(conversation_id),
            actor,
            payload.device_id,
        )
        .await?;
    Ok(Json(ConversationReadResponse { message_ids }))
}

async fn typing_users(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<TypingResponse>, ApiError> {
    let actor = state.jwt_service.extract_user_from_headers(&headers)?;
    let conversation_id = ConversationId::from(conversation_id);
    state
        .conversation_service
        .participants(conversation_id, actor)
        .await?;
    let user_ids = state.presence_service.typing_users(conversation_id).await?;
    Ok(Json(TypingResponse { user_ids }))
}

async fn edit_message(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    headers: HeaderMap,
    Json(payload): Json<EditMessagePayload>,
) -> Result<Json<Message>, ApiError> {
    let actor = state.jwt_service.extract_user_from_headers(&headers)?;
    let message = state
        .message_service
        .edit_message(MessageId::from(message_id), actor, payload.content)
        .await?;
    Ok(Json(message))
}

async fn delete_message(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let actor = state.jwt_service.extract_user_from_headers(&headers)?;
    state
        .message_service
        .delete_message(MessageId::from(message_id), actor)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn mark_delivered(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    headers: HeaderMap,
    Json(payload): Json<StatusPayload>,
) -> Result<Json<StatusAck>, ApiError> {
    let actor = state.jwt_service.extract_user_from_headers(&headers)?;
    let outcome = state
        .status_service
        .mark_delivered(MessageId::from(message_id), actor, payload.device_id)
        .await?;
    Ok(Json(StatusAck {
        applied: outcome.is_applied(),
    }))
}

async fn mark_read(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    headers: HeaderMap,
    Json(payload): Json<StatusPayload>,
) -> Result<Json<StatusAck>, ApiError> {
    let actor = state.jwt_service.extract_user_from_headers(&headers)?;
    let outcome = state
        .status_service
        .mark_read(MessageId::from(message_id), actor, payload.device_id)
        .await?;
    Ok(Json(StatusAck {
        applied: outcome.is_applied(),
    }))
}

async fn status_history(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<Vec<StatusEvent>>, ApiError> {
    let actor = state.jwt_service.extract_user_from_headers(&headers)?;
    let events = state
        .status_service
        .status_history(MessageId::from(message_id), actor)
        .await?;
    Ok(Json(events))
}
