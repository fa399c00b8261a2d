//! Session records.
//!
//! A [`Session`] is an opaque JSON object owned by the store. The runtime only
//! interprets two fields: the identity (`id`) and the navigation `location`.
//! Everything else belongs to the application and is read by auth rules and
//! handlers.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Field holding the identity token checked by `login: true` policies.
pub const IDENTITY_FIELD: &str = "id";
/// Field holding the caller's current [`Location`].
pub const LOCATION_FIELD: &str = "location";
/// Field holding the last room code the caller joined.
pub const ROOM_CODE_FIELD: &str = "code";

/// Where a client currently is.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    /// Current path, e.g. `/test`.
    pub path_name: String,
    /// Query parameters of the current path.
    #[serde(default)]
    pub search_params: BTreeMap<String, String>,
    /// Path the client was on before this one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_location: Option<String>,
}

impl Location {
    /// A location at `path_name` with no query and no history.
    #[must_use]
    pub fn at(path_name: impl Into<String>) -> Self {
        Self {
            path_name: path_name.into(),
            ..Self::default()
        }
    }

    /// Follow a navigation: `next` becomes current, our path becomes its
    /// `previous_location`.
    #[must_use]
    pub fn advance(&self, mut next: Location) -> Location {
        next.previous_location = Some(self.path_name.clone());
        next
    }
}

/// Opaque session record.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Session(Map<String, Value>);

impl Session {
    /// An empty (anonymous) session.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an existing JSON object.
    #[must_use]
    pub fn from_map(map: Map<String, Value>) -> Self {
        Self(map)
    }

    /// Wrap a JSON value; anything but an object yields `None`.
    #[must_use]
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    /// Read a field.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Set a field, returning the previous value.
    pub fn insert(&mut self, field: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(field.into(), value)
    }

    /// Builder-style [`insert`](Self::insert).
    #[must_use]
    pub fn with(mut self, field: impl Into<String>, value: Value) -> Self {
        let _ = self.insert(field, value);
        self
    }

    /// The identity token, if it is a non-empty string or a number.
    #[must_use]
    pub fn identity(&self) -> Option<&Value> {
        self.get(IDENTITY_FIELD).filter(|value| match value {
            Value::String(s) => !s.is_empty(),
            Value::Number(_) => true,
            _ => false,
        })
    }

    /// Whether a login-gated operation may proceed.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.identity().is_some()
    }

    /// Parsed `location`, if present and well-formed.
    #[must_use]
    pub fn location(&self) -> Option<Location> {
        self.get(LOCATION_FIELD)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    /// Replace `location`, recording the old path as `previous_location`.
    pub fn navigate(&mut self, next: Location) {
        let next = match self.location() {
            Some(current) => current.advance(next),
            None => next,
        };
        if let Ok(value) = serde_json::to_value(next) {
            let _ = self.insert(LOCATION_FIELD, value);
        }
    }

    /// Borrow the underlying object.
    #[must_use]
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Convert to a JSON value.
    #[must_use]
    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    /// Whether the record has no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
