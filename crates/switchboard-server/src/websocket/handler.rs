//! Per-frame handling: decode a client frame, act on it, produce a reply.

use serde_json::{Value, json};
use switchboard_core::session::ROOM_CODE_FIELD;
use switchboard_core::{ClientFrame, ErrorReason, Location, OperationKind, Response, ServerFrame, Session};
use tracing::{debug, instrument, warn};

use super::connection::ClientConnection;
use crate::dispatch::{Caller, Dispatcher};

/// Call key returning the caller's session record.
pub const BUILTIN_SESSION: &str = "session";
/// Call key ending the caller's session.
pub const BUILTIN_LOGOUT: &str = "logout";

/// Handle one inbound text frame. Returns the reply for the sender, if any.
///
/// Sync results reach the sender through its room membership, not as a
/// reply; only a failed sync produces a direct [`ServerFrame::SyncRejected`].
#[instrument(skip_all, fields(conn_id = %conn.id, frame))]
pub async fn handle_frame(text: &str, conn: &ClientConnection, dispatcher: &Dispatcher) -> Option<ServerFrame> {
    let frame: ClientFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(error) => {
            warn!(%error, "invalid frame received");
            return Some(invalid_frame_reply(text));
        }
    };
    let _ = tracing::Span::current().record("frame", frame_name(&frame));
    conn.mark_alive();

    let caller = Caller {
        connection: Some(conn.id.clone()),
        token: conn.token().cloned(),
        session: dispatcher.load_session(conn.token()).await,
    };

    match frame {
        ClientFrame::Call { id, key, payload } => Some(ServerFrame::Response(call(dispatcher, conn, caller, id, &key, payload).await)),
        ClientFrame::Sync {
            key,
            room,
            payload,
            ignore_self,
        } => match dispatcher.sync(&caller, &key, &room, payload, ignore_self).await {
            Ok(_) => None,
            Err(failure) => Some(ServerFrame::SyncRejected {
                key,
                room,
                reason: failure.reason,
                message: failure.message,
            }),
        },
        ClientFrame::JoinRoom { room } => Some(join_room(dispatcher, conn, caller, room).await),
        ClientFrame::LeaveRoom { room } => {
            let _ = dispatcher.rooms().leave(&conn.id, &room);
            Some(ServerFrame::RoomLeft { room })
        }
        ClientFrame::UpdateLocation { location } => {
            update_location(dispatcher, caller, location).await;
            None
        }
    }
}

async fn call(
    dispatcher: &Dispatcher,
    conn: &ClientConnection,
    caller: Caller,
    id: u64,
    key: &str,
    payload: Value,
) -> Response {
    debug!(key, correlation_id = id, "call");
    match key {
        BUILTIN_SESSION => Response::success(id, caller.session.into_value()),
        BUILTIN_LOGOUT => {
            if let Some(token) = &caller.token {
                if let Err(error) = dispatcher.store().delete_session(token).await {
                    warn!(%error, "failed to delete session on logout");
                    return Response::error(id, ErrorReason::HandlerFault, ErrorReason::HandlerFault.public_message());
                }
            }
            let left = dispatcher.rooms().leave_all(&conn.id);
            debug!(rooms = left.len(), "logged out");
            Response::success(id, json!(true))
        }
        _ => dispatcher
            .dispatch(OperationKind::Api, key, payload, &caller, None)
            .await
            .into_response(id),
    }
}

async fn join_room(dispatcher: &Dispatcher, conn: &ClientConnection, caller: Caller, room: String) -> ServerFrame {
    if room.is_empty() {
        return ServerFrame::Error {
            reason: ErrorReason::InvalidFrame,
            message: "room name must not be empty".into(),
        };
    }
    if !dispatcher.rooms().join(&conn.id, &room) {
        debug!(room, "join was a no-op");
    }
    if let Some(token) = &caller.token {
        if !caller.session.is_empty() {
            let session = caller.session.with(ROOM_CODE_FIELD, json!(room));
            if let Err(error) = dispatcher.store().save_session(token, &session).await {
                warn!(%error, room, "failed to persist room code");
            }
        }
    }
    ServerFrame::RoomJoined { room }
}

async fn update_location(dispatcher: &Dispatcher, caller: Caller, location: Location) {
    let Some(token) = &caller.token else {
        return;
    };
    if caller.session.is_empty() {
        return;
    }
    let mut session: Session = caller.session;
    session.navigate(location);
    if let Err(error) = dispatcher.store().save_session(token, &session).await {
        warn!(%error, "failed to persist location");
    }
}

fn invalid_frame_reply(text: &str) -> ServerFrame {
    let id = serde_json::from_str::<Value>(text)
        .ok()
        .and_then(|v| v.get("id").and_then(Value::as_u64));
    let reason = ErrorReason::InvalidFrame;
    match id {
        Some(id) => ServerFrame::Response(Response::error(id, reason, reason.public_message())),
        None => ServerFrame::Error {
            reason,
            message: reason.public_message().into(),
        },
    }
}

fn frame_name(frame: &ClientFrame) -> &'static str {
    match frame {
        ClientFrame::Call { .. } => "call",
        ClientFrame::Sync { .. } => "sync",
        ClientFrame::JoinRoom { .. } => "joinRoom",
        ClientFrame::LeaveRoom { .. } => "leaveRoom",
        ClientFrame::UpdateLocation { .. } => "updateLocation",
    }
}
