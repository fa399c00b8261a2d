//! Handler traits and their execution contexts.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use switchboard_core::{AuthPolicy, OperationKey, Session, SessionToken, StoreGateway};

use crate::broadcast::{RoomBroadcaster, RoomEvent};
use crate::functions::FunctionNamespace;

/// Failure returned by a handler.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// Expected refusal; the message is shown to the caller as is.
    #[error("{0}")]
    Rejected(String),
    /// Unexpected failure; logged server-side, never shown to the caller.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl HandlerError {
    /// Shorthand for [`HandlerError::Rejected`].
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected(message.into())
    }
}

/// Everything a handler invocation can see.
#[derive(Clone)]
pub struct CallContext {
    /// Key being served.
    pub key: OperationKey,
    /// Caller-supplied argument.
    pub payload: Value,
    /// Snapshot of the caller's session. Persist changes through `store`.
    pub session: Session,
    /// Caller's session token, if any.
    pub token: Option<SessionToken>,
    /// Room of a sync call.
    pub room: Option<String>,
    /// Shared helpers.
    pub functions: Arc<FunctionNamespace>,
    /// Persistence gateway.
    pub store: Arc<dyn StoreGateway>,
    /// Pushes custom events to room members.
    pub broadcaster: Arc<dyn RoomBroadcaster>,
}

impl CallContext {
    /// Push `event` to its room. Returns how many connections it reached.
    pub async fn broadcast(&self, event: RoomEvent) -> usize {
        self.broadcaster.broadcast(event).await
    }

    /// Push `event` to everyone in its room except the caller's session.
    pub async fn broadcast_to_others(&self, event: RoomEvent) -> usize {
        self.broadcaster.broadcast(event.skipping(self.token.clone())).await
    }
}

impl std::fmt::Debug for CallContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallContext")
            .field("key", &self.key)
            .field("room", &self.room)
            .field("functions", &self.functions)
            .finish_non_exhaustive()
    }
}

/// Server-side handler of an `api` operation or of a sync pair.
#[async_trait]
pub trait OperationHandler: Send + Sync {
    /// Policy checked before [`main`](Self::main). Defaults to no requirements.
    fn auth(&self) -> AuthPolicy {
        AuthPolicy::default()
    }

    /// Run the operation.
    ///
    /// Returning `null` is treated as a fault. An object with
    /// `"status": "error"` is a handler-chosen error whose `message` reaches
    /// the caller.
    async fn main(&self, ctx: CallContext) -> Result<Value, HandlerError>;
}

/// Input to a sync client pre-filter.
#[derive(Debug, Clone, Copy)]
pub struct FilterContext<'a> {
    /// Sync key about to be sent.
    pub key: &'a OperationKey,
    /// Payload about to be sent.
    pub payload: &'a Value,
    /// Target room.
    pub room: &'a str,
    /// The client's view of its own session.
    pub session: &'a Session,
}

/// Client-side pre-check of a sync operation.
///
/// Returning `None` or a falsy value suppresses the call. This only saves a
/// round trip; the server re-authorizes every sync call.
pub trait SyncFilter: Send + Sync {
    /// Decide whether to transmit.
    fn verdict(&self, ctx: &FilterContext<'_>) -> Option<Value>;
}

impl<F> SyncFilter for F
where
    F: Fn(&FilterContext<'_>) -> Option<Value> + Send + Sync,
{
    fn verdict(&self, ctx: &FilterContext<'_>) -> Option<Value> {
        self(ctx)
    }
}
