//! Per-connection state shared between the session loop and room broadcasts.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use switchboard_core::{ConnectionId, ServerFrame, SessionToken};
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::warn;

/// A live WebSocket client.
///
/// Outbound frames go through a bounded queue drained by the session's writer
/// task; [`send`](Self::send) never blocks. Closing is one-way: once
/// [`close`](Self::close) is called the connection never accepts room joins
/// again and its session loop exits.
pub struct ClientConnection {
    /// Server-assigned id.
    pub id: ConnectionId,
    token: Option<SessionToken>,
    tx: mpsc::Sender<Arc<String>>,
    /// When the upgrade completed.
    pub connected_at: Instant,
    is_alive: AtomicBool,
    last_seen: Mutex<Instant>,
    dropped_messages: AtomicU64,
    closed: CancellationToken,
}

impl ClientConnection {
    /// Wrap an outbound queue.
    pub fn new(id: ConnectionId, token: Option<SessionToken>, tx: mpsc::Sender<Arc<String>>) -> Self {
        let now = Instant::now();
        Self {
            id,
            token,
            tx,
            connected_at: now,
            is_alive: AtomicBool::new(true),
            last_seen: Mutex::new(now),
            dropped_messages: AtomicU64::new(0),
            closed: CancellationToken::new(),
        }
    }

    /// Session token presented at upgrade.
    #[must_use]
    pub fn token(&self) -> Option<&SessionToken> {
        self.token.as_ref()
    }

    /// Queue a serialized frame. `false` if the queue is full or gone.
    pub fn send(&self, message: Arc<String>) -> bool {
        if self.is_closed() {
            return false;
        }
        if self.tx.try_send(message).is_ok() {
            true
        } else {
            let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Serialize and queue a frame.
    pub fn send_frame(&self, frame: &ServerFrame) -> bool {
        match serde_json::to_string(frame) {
            Ok(json) => self.send(Arc::new(json)),
            Err(error) => {
                warn!(conn_id = %self.id, %error, "failed to serialize frame");
                false
            }
        }
    }

    /// Frames dropped so far.
    #[must_use]
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Record inbound activity (any frame, including pong).
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        *self.last_seen.lock() = Instant::now();
    }

    /// Read and reset the activity flag.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Time since the last inbound activity.
    #[must_use]
    pub fn last_seen_elapsed(&self) -> Duration {
        self.last_seen.lock().elapsed()
    }

    /// Begin teardown.
    pub fn close(&self) {
        self.closed.cancel();
    }

    /// Whether teardown has begun.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves once [`close`](Self::close) has been called.
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.closed.cancelled()
    }
}

impl std::fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConnection")
            .field("id", &self.id)
            .field("authenticated", &self.token.is_some())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
