use application::ApplicationError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorBody {
                code,
                message: message.into(),
            },
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> &'static str {
        self.body.code
    }

    pub fn message(&self) -> &str {
        &self.body.message
    }
}

impl From<ApplicationError> for ApiError {
    fn from(error: ApplicationError) -> Self {
        use domain::DomainError;

        match error {
            ApplicationError::Domain(domain_err) => match domain_err {
                DomainError::InvalidArgument { field, reason } => ApiError::new(
                    StatusCode::BAD_REQUEST,
                    "INVALID_ARGUMENT",
                    format!("{}: {}", field, reason),
                ),
                DomainError::OwnMessageStatus { .. } => ApiError::new(
                    StatusCode::FORBIDDEN,
                    "OWN_MESSAGE_STATUS",
                    "sender cannot acknowledge own message",
                ),
                DomainError::InvalidStatusTarget { current, target } => ApiError::new(
                    StatusCode::BAD_REQUEST,
                    "INVALID_STATUS_TARGET",
                    format!("cannot move message from {} to {}", current, target),
                ),
                DomainError::NotParticipant { .. } => ApiError::new(
                    StatusCode::FORBIDDEN,
                    "NOT_PARTICIPANT",
                    "user is not a participant of the conversation",
                ),
                DomainError::DuplicateParticipant { .. } => ApiError::new(
                    StatusCode::CONFLICT,
                    "DUPLICATE_PARTICIPANT",
                    "user already participates in the conversation",
                ),
                DomainError::ConversationNotFound(_) => ApiError::new(
                    StatusCode::NOT_FOUND,
                    "CONVERSATION_NOT_FOUND",
                    "conversation not found",
                ),
                DomainError::MessageNotFound(_) => ApiError::new(
                    StatusCode::NOT_FOUND,
                    "MESSAGE_NOT_FOUND",
                    "message not found",
                ),
                DomainError::UserNotFound(_) => {
                    ApiError::new(StatusCode::NOT_FOUND, "USER_NOT_FOUND", "user not found")
                }
                DomainError::MessageDeleted(_) => ApiError::new(
                    StatusCode::GONE,
                    "MESSAGE_DELETED",
                    "message has been deleted",
                ),
            },
            ApplicationError::Repository(repo_err) => match repo_err {
                domain::RepositoryError::NotFound => ApiError::new(
                    StatusCode::NOT_FOUND,
                    "NOT_FOUND",
                    "requested resource not found",
                ),
                domain::RepositoryError::Conflict => {
                    ApiError::new(StatusCode::CONFLICT, "CONFLICT", "resource already exists")
                }
                domain::RepositoryError::Storage { message } => ApiError::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "DATABASE_ERROR",
                    format!("database error: {}", message),
                ),
            },
            ApplicationError::Broker(err) => ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "BROKER_ERROR",
                format!("broker error: {}", err),
            ),
            ApplicationError::Presence(err) => ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "PRESENCE_ERROR",
                format!("presence error: {}", err),
            ),
            ApplicationError::Serialization(message) => ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "SERIALIZATION_ERROR",
                message,
            ),
            ApplicationError::Infrastructure(message) => ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "INFRASTRUCTURE_ERROR",
                message,
            ),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}
