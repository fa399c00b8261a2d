//! Wire frames exchanged over a connection.
//!
//! Every frame is a JSON object tagged by `type`. Field names are camelCase.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::ErrorReason;
use crate::session::Location;

/// Correlation id of a call, unique per live connection.
pub type CorrelationId = u64;

/// Frames a client sends.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientFrame {
    /// Request/response invocation.
    Call {
        /// Client-chosen correlation id.
        id: CorrelationId,
        /// Operation key, or a built-in name.
        key: String,
        /// Arbitrary argument.
        #[serde(default)]
        payload: Value,
    },
    /// Fire-and-broadcast invocation.
    Sync {
        /// Sync operation key.
        key: String,
        /// Room to relay the result to.
        room: String,
        /// Arbitrary argument.
        #[serde(default)]
        payload: Value,
        /// Skip every connection sharing the sender's session.
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        ignore_self: bool,
    },
    /// Enter a room.
    JoinRoom {
        /// Room name.
        room: String,
    },
    /// Leave a room.
    LeaveRoom {
        /// Room name.
        room: String,
    },
    /// Report a navigation.
    UpdateLocation {
        /// New location.
        location: Location,
    },
}

/// Call outcome status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    /// Handler ran and returned a value.
    Success,
    /// Rejected before the handler, or the handler failed.
    Error,
}

/// Reply to a [`ClientFrame::Call`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    /// Correlation id copied from the call.
    pub id: CorrelationId,
    /// Outcome.
    pub status: CallStatus,
    /// Handler result on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    /// Failure code on error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<ErrorReason>,
    /// Sanitized failure message on error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Response {
    /// Successful response.
    #[must_use]
    pub fn success(id: CorrelationId, payload: Value) -> Self {
        Self {
            id,
            status: CallStatus::Success,
            payload: Some(payload),
            reason: None,
            message: None,
        }
    }

    /// Error response.
    #[must_use]
    pub fn error(id: CorrelationId, reason: ErrorReason, message: impl Into<String>) -> Self {
        Self {
            id,
            status: CallStatus::Error,
            payload: None,
            reason: Some(reason),
            message: Some(message.into()),
        }
    }

    /// Whether this is a success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == CallStatus::Success
    }
}

/// Frames the server sends.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerFrame {
    /// First frame on every connection.
    Welcome {
        /// Server-assigned connection id.
        connection_id: String,
    },
    /// Reply to a call.
    Response(Response),
    /// A sync result relayed to a room member.
    SyncEvent {
        /// Sync operation key.
        key: String,
        /// Room it was relayed to.
        room: String,
        /// Server handler result.
        payload: Value,
    },
    /// A sync request from this connection was refused or failed.
    SyncRejected {
        /// Sync operation key.
        key: String,
        /// Target room.
        room: String,
        /// Failure code.
        reason: ErrorReason,
        /// Sanitized message.
        message: String,
    },
    /// Join acknowledged.
    RoomJoined {
        /// Room name.
        room: String,
    },
    /// Leave acknowledged.
    RoomLeft {
        /// Room name.
        room: String,
    },
    /// Custom event a handler pushed to a room.
    RoomEvent {
        /// Room it was pushed to.
        room: String,
        /// Handler-chosen event name.
        event: String,
        /// Event data, possibly carrying the recipient's session.
        payload: Value,
    },
    /// A room peer lost its connection and may still come back.
    UserAfk {
        /// Shared room.
        room: String,
        /// The peer's session `id`.
        user_id: Value,
        /// Unix epoch milliseconds at which the peer is given up on.
        end_time: u64,
    },
    /// A room peer reconnected before its grace period ran out.
    UserBack {
        /// Shared room.
        room: String,
        /// The peer's session `id`.
        user_id: Value,
    },
    /// A frame could not be processed and had no correlation id to answer.
    Error {
        /// Failure code.
        reason: ErrorReason,
        /// Sanitized message.
        message: String,
    },
}

impl ServerFrame {
    /// Wire `type` tag.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Welcome { .. } => "welcome",
            Self::Response(_) => "response",
            Self::SyncEvent { .. } => "syncEvent",
            Self::SyncRejected { .. } => "syncRejected",
            Self::RoomJoined { .. } => "roomJoined",
            Self::RoomLeft { .. } => "roomLeft",
            Self::RoomEvent { .. } => "roomEvent",
            Self::UserAfk { .. } => "userAfk",
            Self::UserBack { .. } => "userBack",
            Self::Error { .. } => "error",
        }
    }

    /// Room the frame concerns, if any.
    #[must_use]
    pub fn room(&self) -> Option<&str> {
        match self {
            Self::SyncEvent { room, .. }
            | Self::SyncRejected { room, .. }
            | Self::RoomJoined { room }
            | Self::RoomLeft { room }
            | Self::RoomEvent { room, .. }
            | Self::UserAfk { room, .. }
            | Self::UserBack { room, .. } => Some(room),
            Self::Welcome { .. } | Self::Response(_) | Self::Error { .. } => None,
        }
    }
}
