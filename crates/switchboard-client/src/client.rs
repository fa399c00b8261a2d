//! The client stub: one connection, many interleaved calls.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use serde_json::Value;
use switchboard_core::auth::is_truthy;
use switchboard_core::{ClientFrame, CorrelationId, Location, OperationKey, OperationKind, Response, ServerFrame, Session};
use switchboard_registry::{FilterContext, RouteTable};
use switchboard_settings::ClientSettings;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::{ClientError, Result};
use crate::location::LocationMiddleware;
use crate::pending::PendingCalls;

/// Client tuning.
#[derive(Clone, Debug)]
pub struct ClientOptions {
    /// Bound after which an unanswered call rejects with `Timeout`.
    pub call_timeout: Duration,
    /// Depth of the inbound event queue handed to the application.
    pub event_buffer: usize,
    /// Depth of the outbound frame queue.
    pub outbound_buffer: usize,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(10),
            event_buffer: 256,
            outbound_buffer: 256,
        }
    }
}

impl ClientOptions {
    /// Options from the `client` settings group.
    #[must_use]
    pub fn from_settings(settings: &ClientSettings) -> Self {
        Self {
            call_timeout: Duration::from_millis(settings.call_timeout_ms),
            ..Self::default()
        }
    }
}

/// Inbound frames that are not call responses.
pub type Events = mpsc::Receiver<ServerFrame>;

/// Client side of one switchboard connection.
///
/// Calls may be issued concurrently from many tasks; responses are matched by
/// correlation id. Dropping or closing the client rejects every outstanding
/// call with [`ClientError::ConnectionClosed`].
pub struct Client {
    outbound: mpsc::Sender<String>,
    pending: Arc<PendingCalls>,
    table: Arc<RouteTable>,
    session: RwLock<Session>,
    connection_id: Arc<RwLock<Option<String>>>,
    options: ClientOptions,
    closed: CancellationToken,
    reader: JoinHandle<()>,
}

impl Client {
    /// Open a WebSocket connection.
    ///
    /// Pass a prepared request to attach a session cookie or bearer token.
    pub async fn connect<R>(request: R, table: Arc<RouteTable>, options: ClientOptions) -> Result<(Self, Events)>
    where
        R: IntoClientRequest + Unpin,
    {
        let (ws, _) = connect_async(request).await?;
        let (mut ws_tx, mut ws_rx) = ws.split();
        let (out_tx, mut out_rx) = mpsc::channel::<String>(options.outbound_buffer);
        let (in_tx, in_rx) = mpsc::channel::<String>(options.event_buffer);
        let closed = CancellationToken::new();

        let pump_closed = closed.clone();
        let _pump = tokio::spawn(async move {
            loop {
                tokio::select! {
                    out = out_rx.recv() => {
                        let Some(text) = out else { break };
                        if ws_tx.send(Message::text(text)).await.is_err() {
                            break;
                        }
                    }
                    msg = ws_rx.next() => match msg {
                        Some(Ok(Message::Text(text))) => {
                            if in_tx.send(text.to_string()).await.is_err() {
                                break;
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Err(error)) => {
                            warn!(%error, "websocket read failed");
                            break;
                        }
                        Some(Ok(_)) => {}
                    },
                    () = pump_closed.cancelled() => break,
                }
            }
            let _ = ws_tx.send(Message::Close(None)).await;
            pump_closed.cancel();
        });

        info!("connected");
        Ok(Self::spawn(out_tx, in_rx, table, options, closed))
    }

    /// Run over an existing frame transport: `outbound` carries encoded client
    /// frames, `inbound` delivers encoded server frames. The connection ends
    /// when `inbound` closes.
    #[must_use]
    pub fn from_channels(
        outbound: mpsc::Sender<String>,
        inbound: mpsc::Receiver<String>,
        table: Arc<RouteTable>,
        options: ClientOptions,
    ) -> (Self, Events) {
        Self::spawn(outbound, inbound, table, options, CancellationToken::new())
    }

    fn spawn(
        outbound: mpsc::Sender<String>,
        inbound: mpsc::Receiver<String>,
        table: Arc<RouteTable>,
        options: ClientOptions,
        closed: CancellationToken,
    ) -> (Self, Events) {
        let (events_tx, events_rx) = mpsc::channel(options.event_buffer);
        let pending = Arc::new(PendingCalls::new());
        let connection_id = Arc::new(RwLock::new(None));
        let reader = tokio::spawn(read_loop(
            inbound,
            pending.clone(),
            events_tx,
            connection_id.clone(),
            closed.clone(),
        ));
        let client = Self {
            outbound,
            pending,
            table,
            session: RwLock::new(Session::new()),
            connection_id,
            options,
            closed,
            reader,
        };
        (client, events_rx)
    }

    /// Invoke an `api` operation and return its value.
    ///
    /// An error response becomes [`ClientError::Remote`].
    pub async fn call(&self, key: &str, payload: Value) -> Result<Value> {
        let response = self.request(key, payload).await?;
        if response.is_success() {
            return Ok(response.payload.unwrap_or(Value::Null));
        }
        let reason = response.reason.unwrap_or(switchboard_core::ErrorReason::HandlerFault);
        Err(ClientError::Remote {
            reason,
            message: response.message.unwrap_or_else(|| reason.public_message().to_owned()),
        })
    }

    /// Invoke an `api` operation and return the raw response.
    pub async fn request(&self, key: &str, payload: Value) -> Result<Response> {
        let id = self.pending.next_id();
        self.request_with_id(id, key, payload).await
    }

    pub(crate) async fn request_with_id(&self, id: CorrelationId, key: &str, payload: Value) -> Result<Response> {
        let mut rx = self.pending.register(id, key)?;
        let frame = ClientFrame::Call {
            id,
            key: key.to_owned(),
            payload,
        };
        if let Err(error) = self.send(&frame).await {
            self.pending.cancel(id);
            return Err(error);
        }

        match tokio::time::timeout(self.options.call_timeout, &mut rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ClientError::ConnectionClosed),
            Err(_) if self.pending.expire(id, self.options.call_timeout) => Err(ClientError::Timeout {
                key: key.to_owned(),
                timeout_ms: u64::try_from(self.options.call_timeout.as_millis()).unwrap_or(u64::MAX),
            }),
            // Settled concurrently with the timeout; the slot already holds the outcome.
            Err(_) => rx.await.unwrap_or(Err(ClientError::ConnectionClosed)),
        }
    }

    /// Announce a sync event to `room`. Returns whether a frame was sent.
    pub async fn sync(&self, key: &str, room: &str, payload: Value) -> Result<bool> {
        self.sync_with(key, room, payload, false).await
    }

    /// [`sync`](Self::sync), optionally excluding every connection of this session.
    ///
    /// The registered client filter runs first against the local session
    /// view; a missing or falsy verdict suppresses the frame. The server
    /// re-authorizes independently.
    pub async fn sync_with(&self, key: &str, room: &str, payload: Value, ignore_self: bool) -> Result<bool> {
        let op: OperationKey = key.parse()?;
        if op.kind() != OperationKind::Sync {
            return Err(ClientError::NotSyncKey(key.to_owned()));
        }
        if let Some(filter) = self.table.sync_filter(op.as_str()) {
            let session = self.session();
            let ctx = FilterContext {
                key: &op,
                payload: &payload,
                room,
                session: &session,
            };
            if !is_truthy(filter.verdict(&ctx).as_ref()) {
                debug!(key, room, "sync suppressed by client filter");
                return Ok(false);
            }
        }
        self.send(&ClientFrame::Sync {
            key: key.to_owned(),
            room: room.to_owned(),
            payload,
            ignore_self,
        })
        .await?;
        Ok(true)
    }

    /// Enter `room`. The acknowledgement arrives as an event.
    pub async fn join_room(&self, room: &str) -> Result<()> {
        self.send(&ClientFrame::JoinRoom { room: room.to_owned() }).await
    }

    /// Leave `room`. The acknowledgement arrives as an event.
    pub async fn leave_room(&self, room: &str) -> Result<()> {
        self.send(&ClientFrame::LeaveRoom { room: room.to_owned() }).await
    }

    /// Record a navigation locally and report it to the server.
    pub async fn update_location(&self, location: Location) -> Result<()> {
        self.session.write().navigate(location.clone());
        self.send(&ClientFrame::UpdateLocation { location }).await
    }

    /// Navigate through `middleware`: the guarded outcome is recorded and
    /// reported; a [`Stay`](crate::Navigation::Stay) sends nothing.
    pub async fn navigate(&self, middleware: &LocationMiddleware, to: Location) -> Result<Location> {
        let session = self.session();
        let from = session.location().unwrap_or_default();
        let mut landed = middleware.resolve(&from, to, &session);
        if landed == from {
            return Ok(landed);
        }
        landed.previous_location = None;
        self.update_location(landed).await?;
        Ok(self.session().location().unwrap_or_default())
    }

    /// Fetch the session from the server and adopt it as the local view.
    pub async fn refresh_session(&self) -> Result<Session> {
        let value = self.call("session", Value::Null).await?;
        let session = Session::from_value(value).unwrap_or_default();
        self.set_session(session.clone());
        Ok(session)
    }

    /// Local session view used by sync filters.
    #[must_use]
    pub fn session(&self) -> Session {
        self.session.read().clone()
    }

    /// Replace the local session view.
    pub fn set_session(&self, session: Session) {
        *self.session.write() = session;
    }

    /// Server-assigned id, once `welcome` has arrived.
    #[must_use]
    pub fn connection_id(&self) -> Option<String> {
        self.connection_id.read().clone()
    }

    /// Calls awaiting a response.
    #[must_use]
    pub fn pending_calls(&self) -> usize {
        self.pending.len()
    }

    /// Whether the connection has ended.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves once the connection has ended.
    pub async fn closed(&self) {
        self.closed.cancelled().await;
    }

    /// End the connection. Outstanding calls reject with `ConnectionClosed`.
    pub fn close(&self) {
        self.closed.cancel();
        let _ = self.pending.close();
    }

    async fn send(&self, frame: &ClientFrame) -> Result<()> {
        if self.is_closed() {
            return Err(ClientError::ConnectionClosed);
        }
        let text = serde_json::to_string(frame)?;
        self.outbound
            .send(text)
            .await
            .map_err(|_| ClientError::ConnectionClosed)
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.close();
        self.reader.abort();
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("connection_id", &self.connection_id())
            .field("pending", &self.pending.len())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

async fn read_loop(
    mut inbound: mpsc::Receiver<String>,
    pending: Arc<PendingCalls>,
    events: mpsc::Sender<ServerFrame>,
    connection_id: Arc<RwLock<Option<String>>>,
    closed: CancellationToken,
) {
    loop {
        let text = tokio::select! {
            text = inbound.recv() => text,
            () = closed.cancelled() => None,
        };
        let Some(text) = text else { break };
        match serde_json::from_str::<ServerFrame>(&text) {
            Ok(ServerFrame::Response(response)) => {
                let _ = pending.resolve(response);
            }
            Ok(frame) => {
                if let ServerFrame::Welcome { connection_id: id } = &frame {
                    *connection_id.write() = Some(id.clone());
                }
                if let Err(error) = events.try_send(frame) {
                    let (TrySendError::Full(frame) | TrySendError::Closed(frame)) = &error;
                    warn!(
                        frame_type = frame.kind(),
                        room = frame.room().unwrap_or("-"),
                        closed = matches!(error, TrySendError::Closed(_)),
                        "event queue unavailable, discarding event"
                    );
                }
            }
            Err(error) => warn!(%error, "undecodable server frame"),
        }
    }
    closed.cancel();
    let rejected = pending.close();
    info!(rejected, "connection closed");
}
