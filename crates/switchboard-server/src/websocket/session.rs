//! WebSocket session lifecycle: one connected client from upgrade through
//! teardown.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use switchboard_core::{ConnectionId, ServerFrame, SessionToken};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, instrument, warn};

use super::connection::ClientConnection;
use super::handler::handle_frame;
use crate::config::ServerConfig;
use crate::dispatch::Dispatcher;
use crate::metrics::{WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL};

/// Run a session for an upgraded socket.
///
/// 1. Registers the connection and queues `welcome`
/// 2. Forwards queued frames and sends periodic pings
/// 3. Hands inbound frames to a worker that runs them in arrival order
/// 4. Tears down on close, liveness timeout, slow-client close or shutdown
///
/// The reader never waits on a handler, so teardown runs as soon as the
/// transport dies even while a call is still executing. Teardown always goes
/// through [`ClientConnection::close`] followed by
/// [`RoomManager::disconnect`](crate::rooms::RoomManager::disconnect); a
/// handler still running afterwards finishes but its reply is discarded.
#[instrument(skip_all, fields(conn_id = %id))]
pub async fn run_ws_session(
    ws: WebSocket,
    id: ConnectionId,
    token: Option<SessionToken>,
    dispatcher: Arc<Dispatcher>,
    config: ServerConfig,
    shutdown: CancellationToken,
) {
    let (mut ws_tx, mut ws_rx) = ws.split();
    let (send_tx, mut send_rx) = mpsc::channel::<Arc<String>>(config.send_queue);
    let conn = Arc::new(ClientConnection::new(id.clone(), token, send_tx));
    let rooms = dispatcher.rooms().clone();

    let started = Instant::now();
    info!(authenticated = conn.token().is_some(), "client connected");
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);

    rooms.register(conn.clone());
    let _ = conn.send_frame(&ServerFrame::Welcome {
        connection_id: id.to_string(),
    });
    if let (Some(presence), Some(token)) = (dispatcher.presence(), conn.token()) {
        let _ = presence.returned(token);
    }

    let outbound_conn = conn.clone();
    let outbound_shutdown = shutdown.clone();
    let ping_every = config.ping_interval;
    let pong_timeout = config.pong_timeout;
    let outbound = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(ping_every);
        let _ = ping_interval.tick().await;

        loop {
            tokio::select! {
                msg = send_rx.recv() => {
                    let Some(text) = msg else { break };
                    if ws_tx.send(Message::Text(text.as_str().into())).await.is_err() {
                        break;
                    }
                }
                _ = ping_interval.tick() => {
                    if !outbound_conn.check_alive() && outbound_conn.last_seen_elapsed() > pong_timeout {
                        warn!(timeout = ?pong_timeout, "client unresponsive, disconnecting");
                        break;
                    }
                    if ws_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
                () = outbound_conn.closed() => break,
                () = outbound_shutdown.cancelled() => break,
            }
        }
        let _ = ws_tx.send(Message::Close(None)).await;
        outbound_conn.close();
    });

    let (frame_tx, frame_rx) = mpsc::channel::<String>(config.send_queue);
    let _worker = tokio::spawn(run_frames(frame_rx, conn.clone(), dispatcher.clone()).in_current_span());

    loop {
        let msg = tokio::select! {
            msg = ws_rx.next() => msg,
            () = conn.closed() => break,
            () = shutdown.cancelled() => break,
        };
        let Some(Ok(msg)) = msg else { break };
        let text = match msg {
            Message::Text(ref t) => t.to_string(),
            Message::Binary(ref data) => {
                if let Ok(s) = std::str::from_utf8(data) {
                    s.to_owned()
                } else {
                    debug!(len = data.len(), "ignoring non-UTF8 binary frame");
                    continue;
                }
            }
            Message::Close(_) => {
                info!("client sent close frame");
                break;
            }
            Message::Ping(_) | Message::Pong(_) => {
                conn.mark_alive();
                continue;
            }
        };

        conn.mark_alive();
        if frame_tx.try_send(text).is_err() {
            warn!(capacity = config.send_queue, "inbound backlog full, disconnecting");
            break;
        }
    }

    conn.close();
    drop(frame_tx);
    let left = rooms.disconnect(&conn.id);
    let _ = outbound.await;
    info!(rooms = left.len(), dropped = conn.drop_count(), "client disconnected");
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(started.elapsed().as_secs_f64());

    if shutdown.is_cancelled() {
        return;
    }
    if let (Some(presence), Some(token)) = (dispatcher.presence(), conn.token()) {
        let _ = presence.dropped(token, left).await;
    }
}

/// Run a connection's frames one at a time, in arrival order.
///
/// Exits once the reader drops its sender or the connection closes. A frame
/// already executing is left to finish.
async fn run_frames(mut frames: mpsc::Receiver<String>, conn: Arc<ClientConnection>, dispatcher: Arc<Dispatcher>) {
    while let Some(text) = frames.recv().await {
        if conn.is_closed() {
            break;
        }
        if let Some(reply) = handle_frame(&text, &conn, &dispatcher).await {
            if !conn.send_frame(&reply) {
                debug!("failed to enqueue reply (queue full or closed)");
            }
        }
    }
}
