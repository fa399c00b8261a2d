//! Handler-initiated room events, delivered over the room registry.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use metrics::counter;
use switchboard_core::{ServerFrame, Session, SessionToken, StoreGateway};
use switchboard_registry::{RoomBroadcaster, RoomEvent};
use tracing::{debug, warn};

use crate::metrics::ROOM_EVENTS_TOTAL;
use crate::rooms::RoomManager;

/// [`RoomBroadcaster`] handed to every handler through its `CallContext`.
pub struct RoomEventBroadcaster {
    rooms: Arc<RoomManager>,
    store: Arc<dyn StoreGateway>,
}

impl RoomEventBroadcaster {
    /// Broadcaster over `rooms`, loading recipient sessions from `store`.
    pub fn new(rooms: Arc<RoomManager>, store: Arc<dyn StoreGateway>) -> Self {
        Self { rooms, store }
    }

    async fn session_of(&self, token: &SessionToken) -> Session {
        match self.store.get_session(token).await {
            Ok(session) => session.unwrap_or_default(),
            Err(error) => {
                warn!(%error, "failed to load recipient session");
                Session::new()
            }
        }
    }
}

#[async_trait]
impl RoomBroadcaster for RoomEventBroadcaster {
    async fn broadcast(&self, event: RoomEvent) -> usize {
        if !event.needs_session() && !event.requires_token() {
            let frame = ServerFrame::RoomEvent {
                room: event.room.clone(),
                event: event.event.clone(),
                payload: event.payload.clone(),
            };
            let report = self.rooms.broadcast(&event.room, &frame, |_| true);
            counter!(ROOM_EVENTS_TOTAL).increment(report.delivered as u64);
            return report.delivered;
        }

        let mut sessions: HashMap<SessionToken, Session> = HashMap::new();
        let mut delivered = 0;
        for member in self.rooms.members(&event.room) {
            let token = member.token();
            if event.requires_token() && token.is_none() {
                continue;
            }
            if token.is_some() && token == event.skip_token.as_ref() {
                continue;
            }

            let session = match token.filter(|_| event.needs_session()) {
                Some(token) => {
                    if !sessions.contains_key(token) {
                        let loaded = self.session_of(token).await;
                        let _ = sessions.insert(token.clone(), loaded);
                    }
                    sessions.get(token)
                }
                None => None,
            };
            if !event.admits(session.unwrap_or(&Session::new())) {
                continue;
            }

            let frame = ServerFrame::RoomEvent {
                room: event.room.clone(),
                event: event.event.clone(),
                payload: event.payload_for(session),
            };
            let json = match serde_json::to_string(&frame) {
                Ok(json) => Arc::new(json),
                Err(error) => {
                    warn!(room = %event.room, %error, "failed to serialize room event");
                    return delivered;
                }
            };
            if self.rooms.deliver(&member, json) {
                delivered += 1;
            }
        }
        counter!(ROOM_EVENTS_TOTAL).increment(delivered as u64);
        debug!(room = %event.room, event = %event.event, delivered, "room event");
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::connection::tests::connection;
    use serde_json::{Value, json};
    use switchboard_core::MemoryStore;
    use tokio::sync::mpsc;

    struct Room {
        events: RoomEventBroadcaster,
        rx: Vec<mpsc::Receiver<Arc<String>>>,
    }

    /// `a` and `b` are logged in, `anon` has no token; all three are in `r1`.
    async fn room() -> Room {
        let store = Arc::new(MemoryStore::new());
        store
            .save_session(&SessionToken::from("tok-a"), &Session::new().with("id", json!(1)).with("team", json!("red")))
            .await
            .unwrap();
        store
            .save_session(&SessionToken::from("tok-b"), &Session::new().with("id", json!(2)).with("team", json!("blue")))
            .await
            .unwrap();

        let rooms = Arc::new(RoomManager::default());
        let mut rx = Vec::new();
        for (id, token) in [("a", Some("tok-a")), ("b", Some("tok-b")), ("anon", None)] {
            let (conn, conn_rx) = connection(id, token, 8);
            rooms.register(conn.clone());
            assert!(rooms.join(&conn.id, "r1"));
            rx.push(conn_rx);
        }
        Room {
            events: RoomEventBroadcaster::new(rooms, store),
            rx,
        }
    }

    fn next(rx: &mut mpsc::Receiver<Arc<String>>) -> Option<Value> {
        rx.try_recv().ok().map(|msg| serde_json::from_str(&msg).unwrap())
    }

    #[tokio::test]
    async fn plain_event_reaches_everyone() {
        let Room { events, mut rx } = room().await;
        let delivered = events.broadcast(RoomEvent::new("r1", "gameOver", json!({"winner": 2}))).await;
        assert_eq!(delivered, 3);
        for member in &mut rx {
            let frame = next(member).unwrap();
            assert_eq!(frame["type"], "roomEvent");
            assert_eq!(frame["event"], "gameOver");
            assert_eq!(frame["payload"], json!({"winner": 2}));
        }
    }

    #[tokio::test]
    async fn skipping_leaves_out_sender_and_anonymous() {
        let Room { events, mut rx } = room().await;
        let event = RoomEvent::new("r1", "moved", json!({})).skipping(Some(SessionToken::from("tok-a")));
        assert_eq!(events.broadcast(event).await, 1);
        assert!(next(&mut rx[0]).is_none());
        assert!(next(&mut rx[1]).is_some());
        assert!(next(&mut rx[2]).is_none());
    }

    #[tokio::test]
    async fn each_recipient_gets_its_own_session() {
        let Room { events, mut rx } = room().await;
        assert_eq!(events.broadcast(RoomEvent::new("r1", "scores", json!({"round": 1})).with_session()).await, 2);
        assert_eq!(next(&mut rx[0]).unwrap()["payload"]["session"]["id"], 1);
        assert_eq!(next(&mut rx[1]).unwrap()["payload"]["session"]["id"], 2);
        assert!(next(&mut rx[2]).is_none());
    }

    #[tokio::test]
    async fn session_filter_selects_recipients() {
        let Room { events, mut rx } = room().await;
        let event = RoomEvent::new("r1", "reveal", Value::Null).only(|s| s.get("team").is_some_and(|t| t == "blue"));
        assert_eq!(events.broadcast(event).await, 1);
        assert!(next(&mut rx[0]).is_none());
        assert_eq!(next(&mut rx[1]).unwrap()["payload"], Value::Null);
        assert!(next(&mut rx[2]).is_none());
    }

    #[tokio::test]
    async fn unknown_room_reaches_nobody() {
        let Room { events, .. } = room().await;
        assert_eq!(events.broadcast(RoomEvent::new("empty", "e", Value::Null).with_session()).await, 0);
    }
}
