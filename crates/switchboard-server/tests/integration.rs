//! End-to-end tests against a real listener and WebSocket clients.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use switchboard_core::{AuthPolicy, MemoryStore, Rule, Session, SessionToken, StoreGateway};
use switchboard_registry::{CallContext, HandlerError, OperationHandler, RoomEvent, RouteTable};
use switchboard_server::{DispatchConfig, Dispatcher, RoomManager, ServerConfig, SwitchboardServer};

const TIMEOUT: Duration = Duration::from_secs(5);

type WsStream = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

// ── Handlers ──

struct UpdateUser;

#[async_trait]
impl OperationHandler for UpdateUser {
    fn auth(&self) -> AuthPolicy {
        AuthPolicy::login_required()
    }

    async fn main(&self, _ctx: CallContext) -> Result<Value, HandlerError> {
        Ok(json!({"status": "success"}))
    }
}

struct UpdateCounter;

#[async_trait]
impl OperationHandler for UpdateCounter {
    fn auth(&self) -> AuthPolicy {
        AuthPolicy::login_required().with_rule(Rule::truthy("player"))
    }

    async fn main(&self, _ctx: CallContext) -> Result<Value, HandlerError> {
        Ok(json!({"status": "success", "increase": true}))
    }
}

/// Never finishes within a test run.
struct Stall;

#[async_trait]
impl OperationHandler for Stall {
    async fn main(&self, _ctx: CallContext) -> Result<Value, HandlerError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(json!({"status": "success"}))
    }
}

/// Pushes `payload.message` to `payload.room`, skipping the caller.
struct Announce;

#[async_trait]
impl OperationHandler for Announce {
    fn auth(&self) -> AuthPolicy {
        AuthPolicy::login_required()
    }

    async fn main(&self, ctx: CallContext) -> Result<Value, HandlerError> {
        let room = ctx.payload["room"].as_str().unwrap_or_default().to_owned();
        let event = RoomEvent::new(room, "announcement", json!({"message": ctx.payload["message"]}));
        let delivered = ctx.broadcast_to_others(event).await;
        Ok(json!({"status": "success", "delivered": delivered}))
    }
}

// ── Harness ──

async fn boot_server() -> (String, Arc<SwitchboardServer>) {
    boot_with(DispatchConfig::default()).await
}

async fn boot_with(config: DispatchConfig) -> (String, Arc<SwitchboardServer>) {
    let mut builder = RouteTable::builder();
    builder.api("api/settings/updateUser", UpdateUser).unwrap();
    builder.api("api/slow/wait", Stall).unwrap();
    builder.api("api/game/announce", Announce).unwrap();
    builder.sync_server("sync/test/updateCounter", UpdateCounter).unwrap();

    let store = Arc::new(MemoryStore::new());
    for (token, player) in [("tok-a", true), ("tok-b", false), ("tok-c", true)] {
        let session = Session::new().with("id", json!(token)).with("player", json!(player));
        store.save_session(&SessionToken::from(token), &session).await.unwrap();
    }

    let dispatcher = Dispatcher::new(
        builder.build().unwrap(),
        store,
        Arc::new(RoomManager::default()),
        config,
    );
    let server = Arc::new(SwitchboardServer::new(ServerConfig::default(), Arc::new(dispatcher)));
    let (addr, _handle) = server.listen().await.unwrap();
    (format!("ws://{addr}/ws"), server)
}

async fn connect(url: &str, token: Option<&str>) -> WsStream {
    let mut request = url.into_client_request().unwrap();
    if let Some(token) = token {
        let _ = request
            .headers_mut()
            .insert("Cookie", format!("session={token}").parse().unwrap());
    }
    let (mut ws, _) = connect_async(request).await.unwrap();
    let welcome = recv(&mut ws).await;
    assert_eq!(welcome["type"], "welcome");
    assert!(welcome["connectionId"].as_str().is_some_and(|id| !id.is_empty()));
    ws
}

async fn send(ws: &mut WsStream, frame: Value) {
    ws.send(Message::text(frame.to_string())).await.unwrap();
}

async fn recv(ws: &mut WsStream) -> Value {
    loop {
        let msg = timeout(TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for frame")
            .expect("stream ended")
            .expect("websocket error");
        match msg {
            Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
            Message::Ping(_) | Message::Pong(_) => {}
            other => panic!("unexpected message: {other:?}"),
        }
    }
}

async fn join(ws: &mut WsStream, room: &str) {
    send(ws, json!({"type": "joinRoom", "room": room})).await;
    let ack = recv(ws).await;
    assert_eq!(ack, json!({"type": "roomJoined", "room": room}));
}

// ── Tests ──

#[tokio::test]
async fn anonymous_call_to_login_route_is_unauthenticated() {
    let (url, _server) = boot_server().await;
    let mut ws = connect(&url, None).await;

    send(&mut ws, json!({"type": "call", "id": 1, "key": "api/settings/updateUser", "payload": {}})).await;
    let reply = recv(&mut ws).await;
    assert_eq!(reply["type"], "response");
    assert_eq!(reply["id"], 1);
    assert_eq!(reply["status"], "error");
    assert_eq!(reply["reason"], "Unauthenticated");
}

#[tokio::test]
async fn logged_in_call_succeeds() {
    let (url, _server) = boot_server().await;
    let mut ws = connect(&url, Some("tok-a")).await;

    send(&mut ws, json!({"type": "call", "id": 7, "key": "api/settings/updateUser"})).await;
    let reply = recv(&mut ws).await;
    assert_eq!(reply["id"], 7);
    assert_eq!(reply["status"], "success");
    assert_eq!(reply["payload"], json!({"status": "success"}));
}

#[tokio::test]
async fn sync_reaches_only_members_passing_policy() {
    let (url, _server) = boot_server().await;
    let mut a = connect(&url, Some("tok-a")).await;
    let mut b = connect(&url, Some("tok-b")).await;
    let mut c = connect(&url, Some("tok-c")).await;
    for ws in [&mut a, &mut b, &mut c] {
        join(ws, "r1").await;
    }

    send(&mut a, json!({"type": "sync", "key": "sync/test/updateCounter", "room": "r1", "payload": {}})).await;

    for ws in [&mut a, &mut c] {
        let event = recv(ws).await;
        assert_eq!(event["type"], "syncEvent");
        assert_eq!(event["room"], "r1");
        assert_eq!(event["payload"], json!({"status": "success", "increase": true}));
    }

    // B's next frame must be the reply to this call, not the sync event.
    send(&mut b, json!({"type": "call", "id": 2, "key": "session"})).await;
    let reply = recv(&mut b).await;
    assert_eq!(reply["type"], "response");
    assert_eq!(reply["payload"]["player"], false);
}

#[tokio::test]
async fn rejected_sync_is_reported_to_sender() {
    let (url, _server) = boot_server().await;
    let mut b = connect(&url, Some("tok-b")).await;
    join(&mut b, "r1").await;

    send(&mut b, json!({"type": "sync", "key": "sync/test/updateCounter", "room": "r1"})).await;
    let reply = recv(&mut b).await;
    assert_eq!(reply["type"], "syncRejected");
    assert_eq!(reply["reason"], "Forbidden");
    assert_eq!(reply["message"], "not allowed");
}

#[tokio::test]
async fn disconnect_leaves_every_room() {
    let (url, server) = boot_server().await;
    let mut ws = connect(&url, Some("tok-a")).await;
    join(&mut ws, "r1").await;
    join(&mut ws, "r2").await;
    let rooms = server.dispatcher().rooms().clone();
    assert_eq!(rooms.room_count(), 2);

    ws.close(None).await.unwrap();
    drop(ws);

    timeout(TIMEOUT, async {
        while rooms.connection_count() > 0 || rooms.room_count() > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("connection was not cleaned up");
}

#[tokio::test]
async fn foreign_origin_is_refused() {
    let (url, _server) = boot_server().await;
    let mut request = url.as_str().into_client_request().unwrap();
    let _ = request
        .headers_mut()
        .insert("Origin", "https://evil.example.net".parse().unwrap());
    match connect_async(request).await {
        Err(WsError::Http(response)) => assert_eq!(response.status().as_u16(), 403),
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("upgrade should have been refused"),
    }
}

#[tokio::test]
async fn malformed_frame_does_not_kill_connection() {
    let (url, _server) = boot_server().await;
    let mut ws = connect(&url, None).await;

    ws.send(Message::text("{not json")).await.unwrap();
    let reply = recv(&mut ws).await;
    assert_eq!(reply["type"], "error");
    assert_eq!(reply["reason"], "InvalidFrame");

    send(&mut ws, json!({"type": "call", "id": 3, "key": "session"})).await;
    let reply = recv(&mut ws).await;
    assert_eq!(reply["payload"], json!({}));
}

#[tokio::test]
async fn hung_handler_does_not_delay_room_cleanup() {
    let (url, server) = boot_server().await;
    let mut ws = connect(&url, Some("tok-a")).await;
    join(&mut ws, "r1").await;
    let rooms = server.dispatcher().rooms().clone();

    send(&mut ws, json!({"type": "call", "id": 1, "key": "api/slow/wait"})).await;
    ws.close(None).await.unwrap();
    drop(ws);

    timeout(Duration::from_secs(2), async {
        while rooms.connection_count() > 0 || rooms.room_count() > 0 || !rooms.members("r1").is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("connection stayed in its rooms while a handler was running");
}

#[tokio::test]
async fn frames_behind_a_call_keep_their_order() {
    let (url, _server) = boot_server().await;
    let mut ws = connect(&url, Some("tok-a")).await;

    send(&mut ws, json!({"type": "call", "id": 1, "key": "api/settings/updateUser"})).await;
    send(&mut ws, json!({"type": "joinRoom", "room": "r1"})).await;
    send(&mut ws, json!({"type": "call", "id": 2, "key": "session"})).await;

    assert_eq!(recv(&mut ws).await["id"], 1);
    assert_eq!(recv(&mut ws).await, json!({"type": "roomJoined", "room": "r1"}));
    assert_eq!(recv(&mut ws).await["id"], 2);
}

#[tokio::test]
async fn handler_event_reaches_other_members() {
    let (url, _server) = boot_server().await;
    let mut a = connect(&url, Some("tok-a")).await;
    let mut c = connect(&url, Some("tok-c")).await;
    for ws in [&mut a, &mut c] {
        join(ws, "r1").await;
    }

    send(
        &mut a,
        json!({"type": "call", "id": 4, "key": "api/game/announce", "payload": {"room": "r1", "message": "round over"}}),
    )
    .await;

    let event = recv(&mut c).await;
    assert_eq!(event["type"], "roomEvent");
    assert_eq!(event["room"], "r1");
    assert_eq!(event["event"], "announcement");
    assert_eq!(event["payload"], json!({"message": "round over"}));

    // The caller is skipped, so its next frame is the reply.
    let reply = recv(&mut a).await;
    assert_eq!(reply["id"], 4);
    assert_eq!(reply["payload"]["delivered"], 1);
}

#[tokio::test]
async fn presence_notices_follow_drop_and_return() {
    let config = DispatchConfig {
        presence_grace: Some(Duration::from_secs(60)),
        ..DispatchConfig::default()
    };
    let (url, server) = boot_with(config).await;
    let mut a = connect(&url, Some("tok-a")).await;
    let mut c = connect(&url, Some("tok-c")).await;
    for ws in [&mut a, &mut c] {
        join(ws, "r1").await;
    }

    a.close(None).await.unwrap();
    drop(a);
    let afk = recv(&mut c).await;
    assert_eq!(afk["type"], "userAfk");
    assert_eq!(afk["room"], "r1");
    assert_eq!(afk["userId"], "tok-a");
    assert!(afk["endTime"].as_u64().is_some());

    let _a = connect(&url, Some("tok-a")).await;
    let back = recv(&mut c).await;
    assert_eq!(back, json!({"type": "userBack", "room": "r1", "userId": "tok-a"}));
    let presence = server.dispatcher().presence().unwrap();
    assert!(!presence.is_away(&SessionToken::from("tok-a")));
}

#[tokio::test]
async fn presence_is_silent_when_disabled() {
    let (url, server) = boot_server().await;
    let mut a = connect(&url, Some("tok-a")).await;
    let mut c = connect(&url, Some("tok-c")).await;
    for ws in [&mut a, &mut c] {
        join(ws, "r1").await;
    }
    assert!(server.dispatcher().presence().is_none());

    a.close(None).await.unwrap();
    drop(a);
    let rooms = server.dispatcher().rooms().clone();
    timeout(TIMEOUT, async {
        while rooms.members("r1").len() > 1 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    // Nothing was queued ahead of this reply.
    send(&mut c, json!({"type": "call", "id": 5, "key": "session"})).await;
    assert_eq!(recv(&mut c).await["id"], 5);
}
