//! Operation keys: `<kind>/<directory-path>/<name>`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The two callable operation families.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    /// Request/response, server-side only.
    Api,
    /// Client pre-filter plus server handler, result broadcast to a room.
    Sync,
}

impl OperationKind {
    /// Key prefix for this kind.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Api => "api",
            Self::Sync => "sync",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reasons a string is not a valid [`OperationKey`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyError {
    /// Nothing to parse.
    #[error("operation key is empty")]
    Empty,
    /// First segment is neither `api` nor `sync`.
    #[error("unknown operation kind `{0}`")]
    UnknownKind(String),
    /// Only the kind was given.
    #[error("operation key `{0}` has no name segment")]
    MissingName(String),
    /// `a//b` or a trailing separator.
    #[error("operation key `{0}` contains an empty segment")]
    EmptySegment(String),
}

/// Globally unique address of a callable operation.
///
/// Backslashes are normalized to `/` on construction, so keys produced from
/// Windows paths compare equal to their POSIX counterparts.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OperationKey {
    raw: String,
    kind: OperationKind,
}

impl OperationKey {
    /// Build a key from its parts. `path` may be empty for root-level handlers.
    pub fn new(kind: OperationKind, path: &str, name: &str) -> Result<Self, KeyError> {
        let path = path.replace('\\', "/");
        let path = path.trim_matches('/');
        let raw = if path.is_empty() {
            format!("{kind}/{name}")
        } else {
            format!("{kind}/{path}/{name}")
        };
        raw.parse()
    }

    /// Operation family.
    #[must_use]
    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    /// Last segment.
    #[must_use]
    pub fn name(&self) -> &str {
        self.raw.rsplit('/').next().unwrap_or_default()
    }

    /// Segments between kind and name, joined by `/`. Empty for root handlers.
    #[must_use]
    pub fn path(&self) -> &str {
        let rest = &self.raw[self.kind.as_str().len() + 1..];
        rest.rfind('/').map_or("", |idx| &rest[..idx])
    }

    /// Full key string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl FromStr for OperationKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.replace('\\', "/");
        if raw.is_empty() {
            return Err(KeyError::Empty);
        }
        let mut segments = raw.split('/');
        let kind = match segments.next() {
            Some("api") => OperationKind::Api,
            Some("sync") => OperationKind::Sync,
            Some(other) => return Err(KeyError::UnknownKind(other.to_owned())),
            None => return Err(KeyError::Empty),
        };
        let rest: Vec<&str> = segments.collect();
        if rest.is_empty() {
            return Err(KeyError::MissingName(raw));
        }
        if rest.iter().any(|segment| segment.is_empty()) {
            return Err(KeyError::EmptySegment(raw));
        }
        Ok(Self { raw, kind })
    }
}

impl TryFrom<String> for OperationKey {
    type Error = KeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<OperationKey> for String {
    fn from(key: OperationKey) -> Self {
        key.raw
    }
}

impl fmt::Display for OperationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
