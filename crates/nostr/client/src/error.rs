//! Client error types

use thiserror::Error;

/// Client error type
///
/// `Clone` so a single failed connect or batch can be handed to every caller
/// waiting on it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// Transport failed to open or closed unexpectedly
    #[error("Connection error: {0}")]
    Connection(String),

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Not connected
    #[error("Not connected to relay")]
    NotConnected,

    /// Timeout error
    #[error("Timeout error: {0}")]
    Timeout(String),

    /// Frame did not match any recognized shape
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Publishing was attempted without a usable signer
    #[error("Signing unavailable: {0}")]
    Capability(String),

    /// Relay answered `OK` with `accepted = false`
    #[error("Relay rejected event {event_id}: {message}")]
    PublishRejected { event_id: String, message: String },

    /// Invalid request
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Configuration error
    #[error("Config error: {0}")]
    Config(String),

    /// External metadata source failed
    #[error("Metadata source error: {0}")]
    Source(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ClientError {
    /// Whether retrying the same operation later can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClientError::Connection(_)
                | ClientError::NotConnected
                | ClientError::Timeout(_)
                | ClientError::Source(_)
        )
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::Serialization(err.to_string())
    }
}

impl From<url::ParseError> for ClientError {
    fn from(err: url::ParseError) -> Self {
        ClientError::InvalidUrl(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        ClientError::Connection(err.to_string())
    }
}

impl From<crate::message::MessageError> for ClientError {
    fn from(err: crate::message::MessageError) -> Self {
        ClientError::Protocol(err.to_string())
    }
}

/// Client result type
pub type Result<T> = std::result::Result<T, ClientError>;
