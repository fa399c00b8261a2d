//! Outstanding-call bookkeeping.
//!
//! Every call gets a connection-local correlation id and a one-shot slot.
//! A slot is removed exactly once: by its response, by its timeout, or by
//! connection teardown. Whatever removes it decides the outcome; later
//! arrivals for the same id find nothing and are dropped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use switchboard_core::{CorrelationId, Response};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::errors::{ClientError, Result};

/// Resolution delivered to a waiting caller.
pub type CallResult = Result<Response>;

/// One call awaiting its response.
#[derive(Debug)]
pub struct PendingCall {
    /// Key that was called.
    pub key: String,
    /// When the call was registered.
    pub created_at: Instant,
    tx: oneshot::Sender<CallResult>,
}

#[derive(Debug, Default)]
struct State {
    calls: HashMap<CorrelationId, PendingCall>,
    closed: bool,
}

/// Correlation map for one connection.
#[derive(Debug)]
pub struct PendingCalls {
    next_id: AtomicU64,
    state: Mutex<State>,
}

impl Default for PendingCalls {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingCalls {
    /// Empty map; ids start at 1.
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            state: Mutex::new(State::default()),
        }
    }

    /// Allocate a fresh correlation id.
    pub fn next_id(&self) -> CorrelationId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Track call `id`. Fails if `id` is already pending or the map is closed.
    pub fn register(&self, id: CorrelationId, key: &str) -> Result<oneshot::Receiver<CallResult>> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(ClientError::ConnectionClosed);
        }
        if state.calls.contains_key(&id) {
            warn!(correlation_id = id, key, "correlation id already pending");
            return Err(ClientError::DuplicateCorrelation(id));
        }
        let (tx, rx) = oneshot::channel();
        let call = PendingCall {
            key: key.to_owned(),
            created_at: Instant::now(),
            tx,
        };
        let _ = state.calls.insert(id, call);
        Ok(rx)
    }

    /// Hand `response` to the call it answers. `false` if no such call is pending.
    pub fn resolve(&self, response: Response) -> bool {
        let id = response.id;
        let Some(call) = self.state.lock().calls.remove(&id) else {
            debug!(correlation_id = id, "dropping response for unknown or settled call");
            return false;
        };
        debug!(correlation_id = id, key = call.key, elapsed = ?call.created_at.elapsed(), "call resolved");
        let _ = call.tx.send(Ok(response));
        true
    }

    /// Give up on `id` after its timeout. `false` if it was already settled.
    pub fn expire(&self, id: CorrelationId, timeout: Duration) -> bool {
        let Some(call) = self.state.lock().calls.remove(&id) else {
            return false;
        };
        let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        warn!(correlation_id = id, key = call.key, timeout_ms, "call timed out");
        let _ = call.tx.send(Err(ClientError::Timeout {
            key: call.key.clone(),
            timeout_ms,
        }));
        true
    }

    /// Drop `id` without resolving it (the frame never left).
    pub fn cancel(&self, id: CorrelationId) {
        let _ = self.state.lock().calls.remove(&id);
    }

    /// Reject every pending call with `ConnectionClosed` and refuse new ones.
    ///
    /// Returns how many calls were rejected.
    pub fn close(&self) -> usize {
        let calls: Vec<PendingCall> = {
            let mut state = self.state.lock();
            state.closed = true;
            state.calls.drain().map(|(_, call)| call).collect()
        };
        let count = calls.len();
        for call in calls {
            let _ = call.tx.send(Err(ClientError::ConnectionClosed));
        }
        if count > 0 {
            debug!(count, "rejected pending calls on close");
        }
        count
    }

    /// Whether [`close`](Self::close) has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Calls awaiting a response.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().calls.len()
    }

    /// Whether nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
