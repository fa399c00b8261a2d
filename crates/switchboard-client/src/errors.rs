//! Client error types.

use switchboard_core::{CorrelationId, ErrorReason, KeyError};
use thiserror::Error;

/// Errors surfaced to client callers.
#[derive(Debug, Error)]
pub enum ClientError {
    /// No response arrived within the configured bound.
    #[error("call `{key}` timed out after {timeout_ms}ms")]
    Timeout {
        /// Operation key of the call.
        key: String,
        /// Bound that elapsed.
        timeout_ms: u64,
    },
    /// The connection was torn down with the call outstanding.
    #[error("connection closed")]
    ConnectionClosed,
    /// A call with this correlation id is already pending.
    #[error("correlation id {0} is already pending")]
    DuplicateCorrelation(CorrelationId),
    /// The server answered with an error response.
    #[error("{reason}: {message}")]
    Remote {
        /// Error code.
        reason: ErrorReason,
        /// Server-sanitized message.
        message: String,
    },
    /// The key string is malformed.
    #[error(transparent)]
    InvalidKey(#[from] KeyError),
    /// A sync was requested with an `api` key.
    #[error("`{0}` is not a sync key")]
    NotSyncKey(String),
    /// WebSocket transport failure.
    #[error("transport error: {0}")]
    Transport(String),
    /// A frame could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(error: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Transport(error.to_string())
    }
}

/// Convenience result type for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
