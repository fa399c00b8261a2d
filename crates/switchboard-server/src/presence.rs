//! Room presence: `userAfk` when a member's last connection drops,
//! `userBack` if the same session reconnects before its grace period ends.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use metrics::counter;
use parking_lot::Mutex;
use serde_json::Value;
use switchboard_core::{ServerFrame, SessionToken, StoreGateway};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::metrics::PRESENCE_EVENTS_TOTAL;
use crate::rooms::RoomManager;

/// A session whose last connection dropped and that may still return.
struct Away {
    generation: u64,
    user_id: Value,
    rooms: Vec<String>,
    expiry: CancellationToken,
}

/// Tracks sessions inside their reconnect grace period.
pub struct PresenceTracker {
    rooms: Arc<RoomManager>,
    store: Arc<dyn StoreGateway>,
    grace: Duration,
    away: Arc<Mutex<HashMap<SessionToken, Away>>>,
    generations: AtomicU64,
}

impl PresenceTracker {
    /// Tracker announcing to members of `rooms`, identifying users through `store`.
    pub fn new(rooms: Arc<RoomManager>, store: Arc<dyn StoreGateway>, grace: Duration) -> Self {
        Self {
            rooms,
            store,
            grace,
            away: Arc::new(Mutex::new(HashMap::new())),
            generations: AtomicU64::new(0),
        }
    }

    /// Reconnect window.
    #[must_use]
    pub fn grace(&self) -> Duration {
        self.grace
    }

    /// Whether `token` is inside its grace period.
    #[must_use]
    pub fn is_away(&self, token: &SessionToken) -> bool {
        self.away.lock().contains_key(token)
    }

    /// A connection holding `token` dropped after leaving `left`.
    ///
    /// Peers in those rooms get `userAfk` unless another connection of the
    /// same session is still live or the session has no `id`. Returns the
    /// number of notices queued.
    pub async fn dropped(&self, token: &SessionToken, left: Vec<String>) -> usize {
        if left.is_empty() || self.rooms.has_token(token) {
            return 0;
        }
        let session = match self.store.get_session(token).await {
            Ok(session) => session.unwrap_or_default(),
            Err(error) => {
                warn!(%error, "failed to load session for presence");
                return 0;
            }
        };
        let Some(user_id) = session.identity().cloned() else {
            return 0;
        };

        let end_time = epoch_millis().saturating_add(u64::try_from(self.grace.as_millis()).unwrap_or(u64::MAX));
        let frames: Vec<ServerFrame> = left
            .iter()
            .map(|room| ServerFrame::UserAfk {
                room: room.clone(),
                user_id: user_id.clone(),
                end_time,
            })
            .collect();
        self.mark_away(token, user_id, left);

        let mut notified = 0;
        for frame in &frames {
            if let Some(room) = frame.room() {
                notified += self.rooms.broadcast(room, frame, |_| true).delivered;
            }
        }
        counter!(PRESENCE_EVENTS_TOTAL, "event" => "userAfk").increment(notified as u64);
        debug!(notified, grace_ms = self.grace.as_millis(), "session went away");
        notified
    }

    /// Record `token` as away before peers hear about it, so a reconnect
    /// racing the notice still counts as a return.
    fn mark_away(&self, token: &SessionToken, user_id: Value, rooms: Vec<String>) {
        let generation = self.generations.fetch_add(1, Ordering::Relaxed);
        let expiry = CancellationToken::new();
        let previous = self.away.lock().insert(
            token.clone(),
            Away {
                generation,
                user_id,
                rooms,
                expiry: expiry.clone(),
            },
        );
        if let Some(previous) = previous {
            previous.expiry.cancel();
        }

        let away = self.away.clone();
        let token = token.clone();
        let grace = self.grace;
        let _expiry_task = tokio::spawn(async move {
            tokio::select! {
                () = tokio::time::sleep(grace) => {
                    let mut away = away.lock();
                    if away.get(&token).is_some_and(|entry| entry.generation == generation) {
                        let _ = away.remove(&token);
                        info!(grace_ms = grace.as_millis(), "session did not return within grace period");
                    }
                }
                () = expiry.cancelled() => {}
            }
        });
    }

    /// A connection holding `token` opened.
    ///
    /// If the session was inside its grace period, peers still in the rooms
    /// it left get `userBack`. Connections of the same session are skipped.
    /// Returns the number of notices queued.
    pub fn returned(&self, token: &SessionToken) -> usize {
        let Some(entry) = self.away.lock().remove(token) else {
            return 0;
        };
        entry.expiry.cancel();

        let mut notified = 0;
        for room in &entry.rooms {
            let frame = ServerFrame::UserBack {
                room: room.clone(),
                user_id: entry.user_id.clone(),
            };
            notified += self
                .rooms
                .broadcast(room, &frame, |conn| conn.token() != Some(token))
                .delivered;
        }
        counter!(PRESENCE_EVENTS_TOTAL, "event" => "userBack").increment(notified as u64);
        info!(notified, "session came back");
        notified
    }
}

fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}
