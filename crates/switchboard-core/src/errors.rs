//! Error codes that cross the wire.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Structured failure code carried by error responses.
///
/// `Timeout` and `ConnectionClosed` never appear here: they are raised
/// locally by the client.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorReason {
    /// No operation with that key.
    NotFound,
    /// The operation requires login and the caller has no identity.
    Unauthenticated,
    /// An auth rule failed.
    Forbidden,
    /// The handler failed or panicked.
    HandlerFault,
    /// The inbound frame could not be decoded.
    InvalidFrame,
}

impl ErrorReason {
    /// Stable code string, also used as a metrics label.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "NotFound",
            Self::Unauthenticated => "Unauthenticated",
            Self::Forbidden => "Forbidden",
            Self::HandlerFault => "HandlerFault",
            Self::InvalidFrame => "InvalidFrame",
        }
    }

    /// Message sent when nothing more specific may be disclosed.
    #[must_use]
    pub fn public_message(self) -> &'static str {
        match self {
            Self::NotFound => "operation not found",
            Self::Unauthenticated => "not logged in",
            Self::Forbidden => "not allowed",
            Self::HandlerFault => "internal error",
            Self::InvalidFrame => "invalid message",
        }
    }
}

impl fmt::Display for ErrorReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_as_pascal_case_code() {
        assert_eq!(serde_json::to_string(&ErrorReason::Unauthenticated).unwrap(), "\"Unauthenticated\"");
        let back: ErrorReason = serde_json::from_str("\"HandlerFault\"").unwrap();
        assert_eq!(back, ErrorReason::HandlerFault);
    }

    #[test]
    fn as_str_matches_serde() {
        for reason in [
            ErrorReason::NotFound,
            ErrorReason::Unauthenticated,
            ErrorReason::Forbidden,
            ErrorReason::HandlerFault,
            ErrorReason::InvalidFrame,
        ] {
            let json = serde_json::to_string(&reason).unwrap();
            assert_eq!(json, format!("\"{}\"", reason.as_str()));
        }
    }
}
