//! Handler-initiated room events.
//!
//! The registry only defines the seam; the server supplies the
//! [`RoomBroadcaster`] that actually reaches connections.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use switchboard_core::{Session, SessionToken};

type SessionPredicate = Arc<dyn Fn(&Session) -> bool + Send + Sync>;

/// A custom event addressed to every member of a room.
#[derive(Clone)]
pub struct RoomEvent {
    /// Target room.
    pub room: String,
    /// Event name the client dispatches on.
    pub event: String,
    /// Event data.
    pub payload: Value,
    /// Skip every connection holding this token.
    pub skip_token: Option<SessionToken>,
    /// Add each recipient's own session to the payload under `session`.
    pub attach_session: bool,
    filter: Option<SessionPredicate>,
}

impl RoomEvent {
    /// Event for every member of `room`.
    pub fn new(room: impl Into<String>, event: impl Into<String>, payload: Value) -> Self {
        Self {
            room: room.into(),
            event: event.into(),
            payload,
            skip_token: None,
            attach_session: false,
            filter: None,
        }
    }

    /// Leave out connections holding `token`.
    #[must_use]
    pub fn skipping(mut self, token: Option<SessionToken>) -> Self {
        self.skip_token = token;
        self
    }

    /// Carry each recipient's session.
    #[must_use]
    pub fn with_session(mut self) -> Self {
        self.attach_session = true;
        self
    }

    /// Deliver only to recipients whose session passes `predicate`.
    #[must_use]
    pub fn only(mut self, predicate: impl Fn(&Session) -> bool + Send + Sync + 'static) -> Self {
        self.filter = Some(Arc::new(predicate));
        self
    }

    /// Whether recipients without a session token are left out.
    ///
    /// Skipping by token or attaching sessions only makes sense for
    /// connections that presented one.
    #[must_use]
    pub fn requires_token(&self) -> bool {
        self.attach_session || self.skip_token.is_some()
    }

    /// Whether each recipient's session must be loaded.
    #[must_use]
    pub fn needs_session(&self) -> bool {
        self.attach_session || self.filter.is_some()
    }

    /// Apply the session filter. Always `true` without one.
    #[must_use]
    pub fn admits(&self, session: &Session) -> bool {
        self.filter.as_ref().is_none_or(|predicate| predicate(session))
    }

    /// Payload as delivered to a recipient holding `session`.
    ///
    /// Object payloads gain a `session` field; anything else is wrapped as
    /// `{"data": .., "session": ..}`.
    #[must_use]
    pub fn payload_for(&self, session: Option<&Session>) -> Value {
        let Some(session) = session.filter(|_| self.attach_session) else {
            return self.payload.clone();
        };
        let session = session.clone().into_value();
        match &self.payload {
            Value::Object(map) => {
                let mut map = map.clone();
                let _ = map.insert("session".into(), session);
                Value::Object(map)
            }
            other => serde_json::json!({"data": other, "session": session}),
        }
    }
}

impl std::fmt::Debug for RoomEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomEvent")
            .field("room", &self.room)
            .field("event", &self.event)
            .field("skip_token", &self.skip_token.is_some())
            .field("attach_session", &self.attach_session)
            .field("filtered", &self.filter.is_some())
            .finish_non_exhaustive()
    }
}

/// Pushes [`RoomEvent`]s to connected room members.
#[async_trait]
pub trait RoomBroadcaster: Send + Sync {
    /// Deliver `event`. Returns the number of connections it was queued to.
    async fn broadcast(&self, event: RoomEvent) -> usize;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn plain_event_needs_nothing() {
        let event = RoomEvent::new("r1", "gameOver", json!({"winner": 2}));
        assert!(!event.requires_token());
        assert!(!event.needs_session());
        assert!(event.admits(&Session::new()));
        assert_eq!(event.payload_for(Some(&Session::new().with("id", json!(1)))), json!({"winner": 2}));
    }

    #[test]
    fn session_is_merged_into_objects() {
        let event = RoomEvent::new("r1", "scores", json!({"round": 3})).with_session();
        let session = Session::new().with("id", json!(9));
        assert!(event.requires_token());
        assert_eq!(event.payload_for(Some(&session)), json!({"round": 3, "session": {"id": 9}}));
    }

    #[test]
    fn scalar_payload_is_wrapped() {
        let event = RoomEvent::new("r1", "tick", json!(5)).with_session();
        let session = Session::new().with("id", json!("u"));
        assert_eq!(event.payload_for(Some(&session)), json!({"data": 5, "session": {"id": "u"}}));
    }

    #[test]
    fn filter_sees_recipient_session() {
        let event = RoomEvent::new("r1", "reveal", Value::Null)
            .only(|s| s.get("team").is_some_and(|t| t == "red"));
        assert!(event.needs_session());
        assert!(!event.requires_token());
        assert!(event.admits(&Session::new().with("team", json!("red"))));
        assert!(!event.admits(&Session::new().with("team", json!("blue"))));
    }

    #[test]
    fn skipping_requires_token() {
        let event = RoomEvent::new("r1", "moved", Value::Null).skipping(Some(SessionToken::from("tok")));
        assert!(event.requires_token());
        assert!(!event.needs_session());
    }
}
