//! Store gateway: the persistence boundary handlers and the server talk to.
//!
//! Only session access is specified here. Domain persistence is reached through
//! the function namespace, not this trait.

use async_trait::async_trait;
use dashmap::DashMap;

use crate::ids::SessionToken;
use crate::session::Session;

/// Errors from a store backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Backend-specific failure.
    #[error("store backend error: {0}")]
    Backend(String),
    /// A stored record could not be (de)serialized.
    #[error("session codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Session persistence.
///
/// Writes are whole-record replacements. Callers doing read-modify-write must
/// not assume atomicity unless the implementation documents it.
#[async_trait]
pub trait StoreGateway: Send + Sync {
    /// Load a session, `None` if the token is unknown.
    async fn get_session(&self, token: &SessionToken) -> Result<Option<Session>, StoreError>;

    /// Create or replace a session.
    async fn save_session(&self, token: &SessionToken, session: &Session) -> Result<(), StoreError>;

    /// Remove a session, returning whether it existed.
    async fn delete_session(&self, token: &SessionToken) -> Result<bool, StoreError>;
}

/// Process-local store backed by a concurrent map.
#[derive(Debug, Default)]
pub struct MemoryStore {
    sessions: DashMap<SessionToken, Session>,
}

impl MemoryStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no sessions are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[async_trait]
impl StoreGateway for MemoryStore {
    async fn get_session(&self, token: &SessionToken) -> Result<Option<Session>, StoreError> {
        Ok(self.sessions.get(token).map(|entry| entry.value().clone()))
    }

    async fn save_session(&self, token: &SessionToken, session: &Session) -> Result<(), StoreError> {
        let _ = self.sessions.insert(token.clone(), session.clone());
        Ok(())
    }

    async fn delete_session(&self, token: &SessionToken) -> Result<bool, StoreError> {
        Ok(self.sessions.remove(token).is_some())
    }
}
