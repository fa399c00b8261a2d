//! Room membership and fan-out.
//!
//! One lock guards both the live-connection set and every room, so a join can
//! never interleave with the teardown of the same connection: after
//! [`RoomManager::disconnect`] returns, the connection is in no room and no
//! broadcast can reach it.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use metrics::counter;
use parking_lot::RwLock;
use switchboard_core::{ConnectionId, ServerFrame, SessionToken};
use tracing::{debug, warn};

use crate::metrics::WS_BROADCAST_DROPS_TOTAL;
use crate::websocket::connection::ClientConnection;

#[derive(Default)]
struct Index {
    connections: HashMap<ConnectionId, Arc<ClientConnection>>,
    rooms: HashMap<String, HashSet<ConnectionId>>,
    memberships: HashMap<ConnectionId, HashSet<String>>,
}

/// Counts from one [`RoomManager::broadcast`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Frames queued.
    pub delivered: usize,
    /// Members the predicate rejected.
    pub skipped: usize,
    /// Members whose queue was full.
    pub dropped: usize,
}

/// Tracks live connections and the rooms they joined.
pub struct RoomManager {
    index: RwLock<Index>,
    slow_client_drop_limit: u64,
}

impl RoomManager {
    /// Manager that closes connections after `slow_client_drop_limit` drops.
    #[must_use]
    pub fn new(slow_client_drop_limit: u64) -> Self {
        Self {
            index: RwLock::new(Index::default()),
            slow_client_drop_limit,
        }
    }

    /// Track a new live connection.
    pub fn register(&self, connection: Arc<ClientConnection>) {
        let mut index = self.index.write();
        let _ = index.connections.insert(connection.id.clone(), connection);
    }

    /// Add `connection` to `room`. `false` if unknown, closing, or already a member.
    pub fn join(&self, connection: &ConnectionId, room: &str) -> bool {
        let mut index = self.index.write();
        let Some(conn) = index.connections.get(connection) else {
            return false;
        };
        if conn.is_closed() {
            return false;
        }
        let added = index
            .rooms
            .entry(room.to_owned())
            .or_default()
            .insert(connection.clone());
        if added {
            let _ = index
                .memberships
                .entry(connection.clone())
                .or_default()
                .insert(room.to_owned());
            debug!(conn_id = %connection, room, "joined room");
        }
        added
    }

    /// Remove `connection` from `room`. `false` if it was not a member.
    pub fn leave(&self, connection: &ConnectionId, room: &str) -> bool {
        let mut index = self.index.write();
        let removed = remove_member(&mut index.rooms, room, connection);
        if removed {
            if let Some(rooms) = index.memberships.get_mut(connection) {
                let _ = rooms.remove(room);
                if rooms.is_empty() {
                    let _ = index.memberships.remove(connection);
                }
            }
            debug!(conn_id = %connection, room, "left room");
        }
        removed
    }

    /// Leave every room but stay connected. Returns the rooms left, sorted.
    pub fn leave_all(&self, connection: &ConnectionId) -> Vec<String> {
        let mut index = self.index.write();
        strip_memberships(&mut index, connection)
    }

    /// Forget a connection entirely. Returns the rooms it was in, sorted.
    pub fn disconnect(&self, connection: &ConnectionId) -> Vec<String> {
        let mut index = self.index.write();
        let _ = index.connections.remove(connection);
        strip_memberships(&mut index, connection)
    }

    /// Current members of `room`.
    #[must_use]
    pub fn members(&self, room: &str) -> Vec<Arc<ClientConnection>> {
        let index = self.index.read();
        index
            .rooms
            .get(room)
            .map(|ids| ids.iter().filter_map(|id| index.connections.get(id).cloned()).collect())
            .unwrap_or_default()
    }

    /// Rooms `connection` belongs to, sorted.
    #[must_use]
    pub fn rooms_of(&self, connection: &ConnectionId) -> Vec<String> {
        let index = self.index.read();
        let mut rooms: Vec<String> = index
            .memberships
            .get(connection)
            .map(|r| r.iter().cloned().collect())
            .unwrap_or_default();
        rooms.sort();
        rooms
    }

    /// Whether `connection` is in `room`.
    #[must_use]
    pub fn is_member(&self, connection: &ConnectionId, room: &str) -> bool {
        self.index
            .read()
            .rooms
            .get(room)
            .is_some_and(|ids| ids.contains(connection))
    }

    /// Live connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.index.read().connections.len()
    }

    /// Non-empty rooms.
    #[must_use]
    pub fn room_count(&self) -> usize {
        self.index.read().rooms.len()
    }

    /// Queue `frame` to every member of `room` that passes `predicate`.
    ///
    /// The read lock is held for the whole fan-out, so membership cannot
    /// change mid-broadcast. Members whose queue keeps overflowing are closed.
    pub fn broadcast(
        &self,
        room: &str,
        frame: &ServerFrame,
        predicate: impl Fn(&ClientConnection) -> bool,
    ) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        let json = match serde_json::to_string(frame) {
            Ok(json) => Arc::new(json),
            Err(error) => {
                warn!(room, %error, "failed to serialize broadcast frame");
                return report;
            }
        };

        let index = self.index.read();
        let Some(ids) = index.rooms.get(room) else {
            return report;
        };
        for conn in ids.iter().filter_map(|id| index.connections.get(id)) {
            if !predicate(conn) {
                report.skipped += 1;
                continue;
            }
            if self.deliver(conn, json.clone()) {
                report.delivered += 1;
            } else {
                report.dropped += 1;
            }
        }
        debug!(room, ?report, "broadcast");
        report
    }

    /// Queue one serialized frame to one member, counting the drop and
    /// closing the member if its queue keeps overflowing.
    pub fn deliver(&self, conn: &ClientConnection, json: Arc<String>) -> bool {
        if conn.send(json) {
            return true;
        }
        counter!(WS_BROADCAST_DROPS_TOTAL).increment(1);
        if conn.drop_count() > self.slow_client_drop_limit {
            warn!(conn_id = %conn.id, drops = conn.drop_count(), "closing slow client");
            conn.close();
        }
        false
    }

    /// Whether a live connection holds `token`.
    #[must_use]
    pub fn has_token(&self, token: &SessionToken) -> bool {
        self.index
            .read()
            .connections
            .values()
            .any(|conn| !conn.is_closed() && conn.token() == Some(token))
    }
}

impl Default for RoomManager {
    fn default() -> Self {
        Self::new(100)
    }
}

fn remove_member(rooms: &mut HashMap<String, HashSet<ConnectionId>>, room: &str, connection: &ConnectionId) -> bool {
    let Some(members) = rooms.get_mut(room) else {
        return false;
    };
    let removed = members.remove(connection);
    if members.is_empty() {
        let _ = rooms.remove(room);
    }
    removed
}

fn strip_memberships(index: &mut Index, connection: &ConnectionId) -> Vec<String> {
    let mut left: Vec<String> = index
        .memberships
        .remove(connection)
        .map(|rooms| rooms.into_iter().collect())
        .unwrap_or_default();
    for room in &left {
        let _ = remove_member(&mut index.rooms, room, connection);
    }
    left.sort();
    left
}
