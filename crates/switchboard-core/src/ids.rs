//! Newtype identifiers.
//!
//! Connections and session tokens are both plain strings on the wire. Keeping
//! them as distinct types stops a token from being used where a connection id
//! is expected (rooms are keyed by connection, the store by token).

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Generate a fresh time-ordered id (UUID v7).
            #[must_use]
            pub fn generate() -> Self {
                Self(Uuid::now_v7().to_string())
            }

            /// Borrow the inner string.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::ops::Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }
    };
}

string_id! {
    /// Identifier of one live transport connection.
    ConnectionId
}

string_id! {
    /// Opaque token naming a session record in the store.
    SessionToken
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_v7_and_distinct() {
        let a = ConnectionId::generate();
        let b = ConnectionId::generate();
        assert_ne!(a, b);
        let parsed = Uuid::parse_str(a.as_str()).unwrap();
        assert_eq!(parsed.get_version(), Some(uuid::Version::SortRand));
    }

    #[test]
    fn serializes_as_bare_string() {
        let token = SessionToken::from("tok-1");
        assert_eq!(serde_json::to_string(&token).unwrap(), "\"tok-1\"");
        let back: SessionToken = serde_json::from_str("\"tok-1\"").unwrap();
        assert_eq!(back, token);
    }

    #[test]
    fn display_and_deref() {
        let id = ConnectionId::from("conn-7");
        assert_eq!(id.to_string(), "conn-7");
        assert!(id.starts_with("conn"));
    }
}
