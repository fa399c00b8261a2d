//! Call dispatch and sync relay.

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use metrics::{counter, histogram};
use parking_lot::RwLock;
use serde_json::Value;
use switchboard_core::{
    AuthPolicy, ConnectionId, CorrelationId, Denial, ErrorReason, OperationKind, Response, ServerFrame, Session, SessionToken,
    StoreGateway, evaluate,
};
use switchboard_registry::{CallContext, HandlerError, RouteTable};
use tracing::{debug, error, info, trace, warn};

use crate::config::DispatchConfig;
use crate::metrics::{
    CALL_DURATION_SECONDS, CALL_ERRORS_TOTAL, CALLS_TOTAL, SYNC_DELIVERIES_TOTAL, SYNC_SKIPPED_TOTAL,
};
use crate::presence::PresenceTracker;
use crate::room_events::RoomEventBroadcaster;
use crate::rooms::RoomManager;

/// Lifecycle of one call.
///
/// ```text
/// Received -> Authorizing -> Executing -> Delivered
///     |            |             \-----> Faulted
///     \------------+--> Rejected
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallState {
    /// Frame decoded, key not yet resolved.
    Received,
    /// Route found, policy being evaluated.
    Authorizing,
    /// Handler running.
    Executing,
    /// Unknown key or policy denied. The handler never ran.
    Rejected,
    /// Handler produced a usable result.
    Delivered,
    /// Handler failed, panicked or returned an error result.
    Faulted,
}

impl CallState {
    /// Whether `next` is a legal successor.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Received, Self::Authorizing | Self::Rejected)
                | (Self::Authorizing, Self::Executing | Self::Rejected)
                | (Self::Executing, Self::Delivered | Self::Faulted)
        )
    }

    /// Whether the call is finished.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Rejected | Self::Delivered | Self::Faulted)
    }
}

/// A structured failure, already sanitized for the caller.
#[derive(Clone, Debug, PartialEq)]
pub struct Failure {
    /// Error code.
    pub reason: ErrorReason,
    /// Message safe to show the caller.
    pub message: String,
}

impl Failure {
    fn new(reason: ErrorReason, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
        }
    }

    fn public(reason: ErrorReason) -> Self {
        Self::new(reason, reason.public_message())
    }
}

/// Result of [`Dispatcher::dispatch`].
#[derive(Clone, Debug)]
pub struct Outcome {
    /// Terminal state reached.
    pub state: CallState,
    /// Handler value or failure.
    pub result: Result<Value, Failure>,
    /// Policy of the resolved route, if the key resolved.
    pub policy: Option<AuthPolicy>,
}

impl Outcome {
    /// Wire response for correlation id `id`.
    #[must_use]
    pub fn into_response(self, id: CorrelationId) -> Response {
        match self.result {
            Ok(payload) => Response::success(id, payload),
            Err(failure) => Response::error(id, failure.reason, failure.message),
        }
    }
}

/// Who is calling.
#[derive(Clone, Debug, Default)]
pub struct Caller {
    /// Connection the call arrived on.
    pub connection: Option<ConnectionId>,
    /// Session token presented at upgrade.
    pub token: Option<SessionToken>,
    /// Session snapshot loaded for this call.
    pub session: Session,
}

/// Counts from one sync relay.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Members that were sent the event.
    pub delivered: usize,
    /// Members excluded by the recipient check or `ignoreSelf`.
    pub skipped: usize,
    /// Members whose queue was full.
    pub dropped: usize,
}

struct CallTracker<'a> {
    key: &'a str,
    state: CallState,
}

impl<'a> CallTracker<'a> {
    fn new(key: &'a str) -> Self {
        Self {
            key,
            state: CallState::Received,
        }
    }

    fn advance(&mut self, next: CallState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal call transition {:?} -> {next:?}",
            self.state
        );
        trace!(key = self.key, from = ?self.state, to = ?next, "call state");
        self.state = next;
    }
}

/// Serves calls against a swappable [`RouteTable`].
pub struct Dispatcher {
    table: RwLock<Arc<RouteTable>>,
    store: Arc<dyn StoreGateway>,
    rooms: Arc<RoomManager>,
    broadcaster: Arc<RoomEventBroadcaster>,
    presence: Option<Arc<PresenceTracker>>,
    config: DispatchConfig,
}

impl Dispatcher {
    /// Dispatcher over `table`.
    pub fn new(
        table: RouteTable,
        store: Arc<dyn StoreGateway>,
        rooms: Arc<RoomManager>,
        config: DispatchConfig,
    ) -> Self {
        let broadcaster = Arc::new(RoomEventBroadcaster::new(rooms.clone(), store.clone()));
        let presence = config
            .presence_grace
            .map(|grace| Arc::new(PresenceTracker::new(rooms.clone(), store.clone(), grace)));
        Self {
            table: RwLock::new(Arc::new(table)),
            store,
            rooms,
            broadcaster,
            presence,
            config,
        }
    }

    /// Current table. Callers keep the snapshot they got.
    #[must_use]
    pub fn table(&self) -> Arc<RouteTable> {
        self.table.read().clone()
    }

    /// Replace the whole table. In-flight calls finish on the old one.
    pub fn reload(&self, table: RouteTable) {
        let operations = table.len();
        *self.table.write() = Arc::new(table);
        info!(operations, "route table reloaded");
    }

    /// Persistence gateway.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn StoreGateway> {
        &self.store
    }

    /// Room registry.
    #[must_use]
    pub fn rooms(&self) -> &Arc<RoomManager> {
        &self.rooms
    }

    /// Presence notices, when enabled.
    #[must_use]
    pub fn presence(&self) -> Option<&Arc<PresenceTracker>> {
        self.presence.as_ref()
    }

    /// Behaviour switches.
    #[must_use]
    pub fn config(&self) -> DispatchConfig {
        self.config
    }

    /// Load the session behind `token`. Missing or unreadable sessions are empty.
    pub async fn load_session(&self, token: Option<&SessionToken>) -> Session {
        let Some(token) = token else {
            return Session::new();
        };
        match self.store.get_session(token).await {
            Ok(session) => session.unwrap_or_default(),
            Err(error) => {
                warn!(%error, "failed to load session, treating as anonymous");
                Session::new()
            }
        }
    }

    /// Resolve, authorize and run one call.
    pub async fn dispatch(
        &self,
        kind: OperationKind,
        key: &str,
        payload: Value,
        caller: &Caller,
        room: Option<&str>,
    ) -> Outcome {
        let start = Instant::now();
        let table = self.table();
        let mut call = CallTracker::new(key);

        let Some(route) = table.resolve(kind, key) else {
            counter!(CALLS_TOTAL, "key" => "unknown", "kind" => kind.as_str()).increment(1);
            debug!(key, kind = kind.as_str(), "operation not found");
            call.advance(CallState::Rejected);
            return self.finish(&call, kind, start, None, Err(Failure::public(ErrorReason::NotFound)));
        };
        counter!(CALLS_TOTAL, "key" => key.to_owned(), "kind" => kind.as_str()).increment(1);
        let policy = route.auth.clone();

        call.advance(CallState::Authorizing);
        let verdict = evaluate(&policy, &caller.session);
        if !verdict.allowed {
            let denial = verdict.reason.unwrap_or(Denial::Unauthenticated);
            debug!(key, conn_id = ?caller.connection, %denial, "call denied");
            call.advance(CallState::Rejected);
            let failure = self.denial_failure(denial);
            return self.finish(&call, kind, start, Some(policy), Err(failure));
        }

        call.advance(CallState::Executing);
        let ctx = CallContext {
            key: route.key.clone(),
            payload,
            session: caller.session.clone(),
            token: caller.token.clone(),
            room: room.map(str::to_owned),
            functions: table.functions().clone(),
            store: self.store.clone(),
            broadcaster: self.broadcaster.clone(),
        };
        let handler = route.handler.clone();
        let raw = AssertUnwindSafe(handler.main(ctx)).catch_unwind().await;
        let result = normalize(key, raw);
        call.advance(if result.is_ok() {
            CallState::Delivered
        } else {
            CallState::Faulted
        });
        self.finish(&call, kind, start, Some(policy), result)
    }

    /// Run a sync call and relay its result to `room`.
    ///
    /// A failure goes back to the caller only; nothing is broadcast.
    pub async fn sync(
        &self,
        caller: &Caller,
        key: &str,
        room: &str,
        payload: Value,
        ignore_self: bool,
    ) -> Result<SyncReport, Failure> {
        let outcome = self.dispatch(OperationKind::Sync, key, payload, caller, Some(room)).await;
        let payload = outcome.result?;
        let allowed = self
            .eligible_recipients(room, outcome.policy.as_ref(), caller, ignore_self)
            .await;

        let frame = ServerFrame::SyncEvent {
            key: key.to_owned(),
            room: room.to_owned(),
            payload,
        };
        let broadcast = self.rooms.broadcast(room, &frame, |conn| allowed.contains(&conn.id));
        let report = SyncReport {
            delivered: broadcast.delivered,
            skipped: broadcast.skipped,
            dropped: broadcast.dropped,
        };
        counter!(SYNC_DELIVERIES_TOTAL).increment(report.delivered as u64);
        counter!(SYNC_SKIPPED_TOTAL).increment(report.skipped as u64);
        debug!(key, room, ?report, "sync relayed");
        Ok(report)
    }

    async fn eligible_recipients(
        &self,
        room: &str,
        policy: Option<&AuthPolicy>,
        caller: &Caller,
        ignore_self: bool,
    ) -> HashSet<ConnectionId> {
        let recheck = policy.filter(|p| self.config.recheck_sync_recipients && (p.login || !p.additional.is_empty()));
        let mut verdicts: HashMap<Option<SessionToken>, bool> = HashMap::new();
        let mut allowed = HashSet::new();

        for member in self.rooms.members(room) {
            if ignore_self && is_same_caller(caller, &member.id, member.token()) {
                continue;
            }
            let Some(policy) = recheck else {
                let _ = allowed.insert(member.id.clone());
                continue;
            };
            let token = member.token().cloned();
            let passes = match verdicts.get(&token) {
                Some(passes) => *passes,
                None => {
                    let passes = match self.recipient_session(token.as_ref()).await {
                        Some(session) => evaluate(policy, &session).allowed,
                        None => false,
                    };
                    let _ = verdicts.insert(token, passes);
                    passes
                }
            };
            if passes {
                let _ = allowed.insert(member.id.clone());
            } else {
                trace!(conn_id = %member.id, room, "recipient fails sync policy");
            }
        }
        allowed
    }

    async fn recipient_session(&self, token: Option<&SessionToken>) -> Option<Session> {
        let Some(token) = token else {
            return Some(Session::new());
        };
        match self.store.get_session(token).await {
            Ok(session) => Some(session.unwrap_or_default()),
            Err(error) => {
                warn!(%error, "failed to load recipient session, skipping recipient");
                None
            }
        }
    }

    fn denial_failure(&self, denial: Denial) -> Failure {
        match denial {
            Denial::Unauthenticated => Failure::public(ErrorReason::Unauthenticated),
            Denial::Rule { message, .. } if self.config.expose_auth_reasons => {
                Failure::new(ErrorReason::Forbidden, message)
            }
            Denial::Rule { .. } => Failure::public(ErrorReason::Forbidden),
        }
    }

    fn finish(
        &self,
        call: &CallTracker<'_>,
        kind: OperationKind,
        start: Instant,
        policy: Option<AuthPolicy>,
        result: Result<Value, Failure>,
    ) -> Outcome {
        histogram!(CALL_DURATION_SECONDS, "kind" => kind.as_str()).record(start.elapsed().as_secs_f64());
        if let Err(failure) = &result {
            let key = if failure.reason == ErrorReason::NotFound {
                "unknown".to_owned()
            } else {
                call.key.to_owned()
            };
            counter!(CALL_ERRORS_TOTAL, "key" => key, "reason" => failure.reason.as_str()).increment(1);
        }
        debug_assert!(call.state.is_terminal());
        Outcome {
            state: call.state,
            result,
            policy,
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("table", &self.table())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn is_same_caller(caller: &Caller, member: &ConnectionId, member_token: Option<&SessionToken>) -> bool {
    match (&caller.token, member_token) {
        (Some(mine), Some(theirs)) => mine == theirs,
        _ => caller.connection.as_ref() == Some(member),
    }
}

fn normalize(key: &str, raw: Result<Result<Value, HandlerError>, Box<dyn Any + Send>>) -> Result<Value, Failure> {
    match raw {
        Err(panic) => {
            error!(key, panic = panic_message(&*panic), "handler panicked");
            Err(Failure::public(ErrorReason::HandlerFault))
        }
        Ok(Err(HandlerError::Rejected(message))) => Err(Failure::new(ErrorReason::HandlerFault, message)),
        Ok(Err(HandlerError::Internal(error))) => {
            error!(key, error = format!("{error:#}"), "handler failed");
            Err(Failure::public(ErrorReason::HandlerFault))
        }
        Ok(Ok(Value::Null)) => Err(Failure::new(ErrorReason::HandlerFault, "operation returned nothing")),
        Ok(Ok(value)) if value.get("status").and_then(Value::as_str) == Some("error") => {
            let message = value
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or(ErrorReason::HandlerFault.public_message());
            Err(Failure::new(ErrorReason::HandlerFault, message))
        }
        Ok(Ok(value)) => Ok(value),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::connection::tests::connection;
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};
    use switchboard_core::{CallStatus, MemoryStore, Rule};
    use switchboard_registry::OperationHandler;

    struct Fixed(Value);

    #[async_trait]
    impl OperationHandler for Fixed {
        async fn main(&self, _ctx: CallContext) -> Result<Value, HandlerError> {
            Ok(self.0.clone())
        }
    }

    struct Guarded {
        policy: AuthPolicy,
        ran: Arc<AtomicBool>,
    }

    #[async_trait]
    impl OperationHandler for Guarded {
        fn auth(&self) -> AuthPolicy {
            self.policy.clone()
        }

        async fn main(&self, _ctx: CallContext) -> Result<Value, HandlerError> {
            self.ran.store(true, Ordering::SeqCst);
            Ok(json!({"status": "success", "increase": true}))
        }
    }

    struct Failing(fn() -> HandlerError);

    #[async_trait]
    impl OperationHandler for Failing {
        async fn main(&self, _ctx: CallContext) -> Result<Value, HandlerError> {
            Err((self.0)())
        }
    }

    struct Panics;

    #[async_trait]
    impl OperationHandler for Panics {
        async fn main(&self, _ctx: CallContext) -> Result<Value, HandlerError> {
            panic!("handler exploded")
        }
    }

    struct EchoRoom;

    #[async_trait]
    impl OperationHandler for EchoRoom {
        async fn main(&self, ctx: CallContext) -> Result<Value, HandlerError> {
            Ok(json!({"room": ctx.room, "payload": ctx.payload}))
        }
    }

    fn admin_policy() -> AuthPolicy {
        AuthPolicy::login_required().with_rule(Rule::equals("role", json!("admin")))
    }

    fn dispatcher_with(table: RouteTable, config: DispatchConfig) -> (Dispatcher, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let dispatcher = Dispatcher::new(table, store.clone(), Arc::new(RoomManager::default()), config);
        (dispatcher, store)
    }

    async fn run(d: &Dispatcher, key: &str) -> Outcome {
        d.dispatch(OperationKind::Api, key, Value::Null, &Caller::default(), None).await
    }

    fn caller(session: Value) -> Caller {
        Caller {
            connection: Some(ConnectionId::from("caller")),
            token: None,
            session: Session::from_value(session).unwrap(),
        }
    }

    // ── dispatch ──

    #[test]
    fn state_machine_edges() {
        use CallState::*;
        assert!(Received.can_transition_to(Authorizing));
        assert!(Received.can_transition_to(Rejected));
        assert!(Authorizing.can_transition_to(Executing));
        assert!(Authorizing.can_transition_to(Rejected));
        assert!(Executing.can_transition_to(Delivered));
        assert!(Executing.can_transition_to(Faulted));
        assert!(!Received.can_transition_to(Executing));
        assert!(!Executing.can_transition_to(Rejected));
        assert!(!Delivered.can_transition_to(Faulted));
        for state in [Rejected, Delivered, Faulted] {
            assert!(state.is_terminal());
        }
        for state in [Received, Authorizing, Executing] {
            assert!(!state.is_terminal());
        }
    }

    #[tokio::test]
    async fn unknown_key_is_not_found() {
        let (d, _) = dispatcher_with(RouteTable::default(), DispatchConfig::default());
        let out = d
            .dispatch(OperationKind::Api, "api/missing/op", Value::Null, &Caller::default(), None)
            .await;
        assert_eq!(out.state, CallState::Rejected);
        assert_matches!(out.result, Err(Failure { reason: ErrorReason::NotFound, .. }));
        assert!(out.policy.is_none());
    }

    #[tokio::test]
    async fn login_required_without_identity_never_runs_handler() {
        let ran = Arc::new(AtomicBool::new(false));
        let mut b = RouteTable::builder();
        b.api(
            "api/settings/updateUser",
            Guarded {
                policy: AuthPolicy::login_required(),
                ran: ran.clone(),
            },
        )
        .unwrap();
        let (d, _) = dispatcher_with(b.build().unwrap(), DispatchConfig::default());

        let out = d
            .dispatch(OperationKind::Api, "api/settings/updateUser", json!({}), &caller(json!({})), None)
            .await;
        assert_eq!(out.state, CallState::Rejected);
        let response = out.into_response(1);
        assert_eq!(response.status, CallStatus::Error);
        assert_eq!(response.reason, Some(ErrorReason::Unauthenticated));
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn rule_failure_is_forbidden_and_hidden_by_default() {
        let ran = Arc::new(AtomicBool::new(false));
        let mut b = RouteTable::builder();
        b.api(
            "api/admin/purge",
            Guarded {
                policy: admin_policy(),
                ran: ran.clone(),
            },
        )
        .unwrap();
        let table = b.build().unwrap();
        let who = caller(json!({"id": 7, "role": "user"}));

        let (hidden, _) = dispatcher_with(table.clone(), DispatchConfig::default());
        let out = hidden.dispatch(OperationKind::Api, "api/admin/purge", Value::Null, &who, None).await;
        assert_eq!(out.result, Err(Failure::public(ErrorReason::Forbidden)));

        let exposing = DispatchConfig {
            expose_auth_reasons: true,
            ..DispatchConfig::default()
        };
        let (exposed, _) = dispatcher_with(table, exposing);
        let out = exposed.dispatch(OperationKind::Api, "api/admin/purge", Value::Null, &who, None).await;
        assert_matches!(out.result, Err(Failure { reason: ErrorReason::Forbidden, message }) if message.contains("role"));
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn authorized_call_is_delivered() {
        let ran = Arc::new(AtomicBool::new(false));
        let mut b = RouteTable::builder();
        b.api(
            "api/admin/purge",
            Guarded {
                policy: admin_policy(),
                ran: ran.clone(),
            },
        )
        .unwrap();
        let (d, _) = dispatcher_with(b.build().unwrap(), DispatchConfig::default());
        let out = d
            .dispatch(OperationKind::Api, "api/admin/purge", Value::Null, &caller(json!({"id": 1, "role": "admin"})), None)
            .await;
        assert_eq!(out.state, CallState::Delivered);
        assert_eq!(out.result, Ok(json!({"status": "success", "increase": true})));
        assert!(ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn kinds_do_not_cross_resolve() {
        let mut b = RouteTable::builder();
        b.api("api/a/x", Fixed(json!(1))).unwrap();
        let (d, _) = dispatcher_with(b.build().unwrap(), DispatchConfig::default());
        let out = d.dispatch(OperationKind::Sync, "api/a/x", Value::Null, &Caller::default(), None).await;
        assert_matches!(out.result, Err(Failure { reason: ErrorReason::NotFound, .. }));
    }

    #[tokio::test]
    async fn handler_results_are_normalized() {
        let mut b = RouteTable::builder();
        b.api("api/t/null", Fixed(Value::Null)).unwrap();
        b.api("api/t/chosen", Fixed(json!({"status": "error", "message": "name taken"}))).unwrap();
        b.api("api/t/rejected", Failing(|| HandlerError::rejected("quota exceeded"))).unwrap();
        b.api("api/t/internal", Failing(|| anyhow::anyhow!("db password is hunter2").into())).unwrap();
        b.api("api/t/panic", Panics).unwrap();
        let (d, _) = dispatcher_with(b.build().unwrap(), DispatchConfig::default());

        let out = run(&d, "api/t/null").await;
        assert_eq!(out.state, CallState::Faulted);
        assert_eq!(out.result, Err(Failure::new(ErrorReason::HandlerFault, "operation returned nothing")));

        let out = run(&d, "api/t/chosen").await;
        assert_eq!(out.result, Err(Failure::new(ErrorReason::HandlerFault, "name taken")));

        let out = run(&d, "api/t/rejected").await;
        assert_eq!(out.result, Err(Failure::new(ErrorReason::HandlerFault, "quota exceeded")));

        let out = run(&d, "api/t/internal").await;
        assert_eq!(out.result, Err(Failure::public(ErrorReason::HandlerFault)));

        let out = run(&d, "api/t/panic").await;
        assert_eq!(out.state, CallState::Faulted);
        assert_eq!(out.result, Err(Failure::public(ErrorReason::HandlerFault)));
    }

    #[tokio::test]
    async fn sync_handler_sees_room() {
        let mut b = RouteTable::builder();
        b.sync_server("sync/t/echo", EchoRoom).unwrap();
        let (d, _) = dispatcher_with(b.build().unwrap(), DispatchConfig::default());
        let out = d
            .dispatch(OperationKind::Sync, "sync/t/echo", json!(5), &Caller::default(), Some("lobby"))
            .await;
        assert_eq!(out.result, Ok(json!({"room": "lobby", "payload": 5})));
    }

    #[tokio::test]
    async fn reload_swaps_table() {
        let (d, _) = dispatcher_with(RouteTable::default(), DispatchConfig::default());
        let before = d.table();
        let mut b = RouteTable::builder();
        b.api("api/a/x", Fixed(json!("new"))).unwrap();
        d.reload(b.build().unwrap());

        assert!(before.is_empty());
        let out = d.dispatch(OperationKind::Api, "api/a/x", Value::Null, &Caller::default(), None).await;
        assert_eq!(out.result, Ok(json!("new")));
    }

    #[tokio::test]
    async fn load_session_defaults_to_empty() {
        let (d, store) = dispatcher_with(RouteTable::default(), DispatchConfig::default());
        assert!(d.load_session(None).await.is_empty());
        let token = SessionToken::from("t1");
        assert!(d.load_session(Some(&token)).await.is_empty());
        store
            .save_session(&token, &Session::new().with("id", json!(1)))
            .await
            .unwrap();
        assert!(d.load_session(Some(&token)).await.is_authenticated());
    }

    // ── sync relay ──

    async fn room_of_three(
        config: DispatchConfig,
    ) -> (Dispatcher, Vec<tokio::sync::mpsc::Receiver<Arc<String>>>, Arc<AtomicBool>) {
        let ran = Arc::new(AtomicBool::new(false));
        let mut b = RouteTable::builder();
        b.sync_server(
            "sync/test/updateCounter",
            Guarded {
                policy: admin_policy(),
                ran: ran.clone(),
            },
        )
        .unwrap();
        let (d, store) = dispatcher_with(b.build().unwrap(), config);

        let mut receivers = Vec::new();
        for (name, role) in [("a", "admin"), ("b", "user"), ("c", "admin")] {
            let token = SessionToken::from(format!("tok-{name}"));
            store
                .save_session(&token, &Session::new().with("id", json!(name)).with("role", json!(role)))
                .await
                .unwrap();
            let (conn, rx) = connection(name, Some(token.as_str()), 8);
            d.rooms().register(conn.clone());
            assert!(d.rooms().join(&conn.id, "r1"));
            receivers.push(rx);
        }
        (d, receivers, ran)
    }

    fn admin_caller(name: &str) -> Caller {
        Caller {
            connection: Some(ConnectionId::from(name)),
            token: Some(SessionToken::from(format!("tok-{name}"))),
            session: Session::new().with("id", json!(name)).with("role", json!("admin")),
        }
    }

    #[tokio::test]
    async fn sync_skips_recipients_failing_policy() {
        let (d, mut rx, ran) = room_of_three(DispatchConfig::default()).await;
        let report = d
            .sync(&admin_caller("a"), "sync/test/updateCounter", "r1", json!({}), false)
            .await
            .unwrap();
        assert!(ran.load(Ordering::SeqCst));
        assert_eq!(report.delivered, 2);
        assert_eq!(report.skipped, 1);

        let event: Value = serde_json::from_str(&rx[0].try_recv().unwrap()).unwrap();
        assert_eq!(event["type"], "syncEvent");
        assert_eq!(event["payload"]["increase"], true);
        assert!(rx[1].try_recv().is_err());
        assert!(rx[2].try_recv().is_ok());
    }

    #[tokio::test]
    async fn recheck_can_be_disabled() {
        let config = DispatchConfig {
            recheck_sync_recipients: false,
            ..DispatchConfig::default()
        };
        let (d, mut rx, _) = room_of_three(config).await;
        let report = d
            .sync(&admin_caller("a"), "sync/test/updateCounter", "r1", json!({}), false)
            .await
            .unwrap();
        assert_eq!(report.delivered, 3);
        assert!(rx[1].try_recv().is_ok());
    }

    #[tokio::test]
    async fn ignore_self_excludes_sender_session() {
        let (d, mut rx, _) = room_of_three(DispatchConfig::default()).await;
        let report = d
            .sync(&admin_caller("a"), "sync/test/updateCounter", "r1", json!({}), true)
            .await
            .unwrap();
        assert_eq!(report.delivered, 1);
        assert!(rx[0].try_recv().is_err());
        assert!(rx[2].try_recv().is_ok());
    }

    #[tokio::test]
    async fn rejected_sync_broadcasts_nothing() {
        let (d, mut rx, ran) = room_of_three(DispatchConfig::default()).await;
        let anonymous = Caller {
            connection: Some(ConnectionId::from("a")),
            ..Caller::default()
        };
        let failure = d
            .sync(&anonymous, "sync/test/updateCounter", "r1", json!({}), false)
            .await
            .unwrap_err();
        assert_eq!(failure.reason, ErrorReason::Unauthenticated);
        assert!(!ran.load(Ordering::SeqCst));
        for receiver in &mut rx {
            assert!(receiver.try_recv().is_err());
        }
    }
}
