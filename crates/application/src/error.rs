use domain::{DomainError, RepositoryError};
use thiserror::Error;

use crate::broker::BrokerError;
use crate::presence::PresenceError;

#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error("domain error: {0}")]
    Domain(#[from] DomainError),
    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),
    #[error("presence error: {0}")]
    Presence(#[from] PresenceError),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("infrastructure error: {0}")]
    Infrastructure(String),
}

impl ApplicationError {
    pub fn infrastructure(message: impl Into<String>) -> Self {
        ApplicationError::Infrastructure(message.into())
    }
}

impl From<serde_json::Error> for ApplicationError {
    fn from(value: serde_json::Error) -> Self {
        ApplicationError::Serialization(value.to_string())
    }
}
