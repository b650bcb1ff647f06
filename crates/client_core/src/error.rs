use std::time::Duration;

use shared::{domain::MessageId, error::ApiError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("no handshake confirmation within {0:?}")]
    HandshakeTimeout(Duration),
    #[error("handshake rejected: {0}")]
    Rejected(String),
    #[error("push channel is not connected")]
    NotConnected,
    #[error("connection driver has shut down")]
    DriverClosed,
    #[error("transport failure: {0}")]
    Transport(#[from] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("credential rejected by backend")]
    Unauthorized,
    #[error("backend returned {status}: {message}")]
    Status {
        status: u16,
        message: String,
        body: Option<ApiError>,
    },
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid request url: {0}")]
    Url(#[from] url::ParseError),
    #[error("unexpected response body: {0}")]
    Decode(#[from] serde_json::Error),
}

impl GatewayError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("no conversation is open")]
    NoConversationOpen,
    #[error("message is empty")]
    EmptyMessage,
    #[error("message {0} is not in the open conversation")]
    UnknownMessage(MessageId),
    #[error("message {0} cannot be deleted")]
    NotDeletable(MessageId),
    #[error("push channel is not connected")]
    Offline,
    #[error("conversation store has shut down")]
    Closed,
}
