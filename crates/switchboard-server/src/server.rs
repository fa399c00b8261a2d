//! `SwitchboardServer`: axum HTTP + WebSocket server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use switchboard_core::{ConnectionId, StoreGateway};
use switchboard_registry::RouteTable;
use switchboard_settings::Settings;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::config::{DispatchConfig, ServerConfig};
use crate::dispatch::Dispatcher;
use crate::handshake::{OriginPolicy, extract_token};
use crate::health::{self, HealthResponse};
use crate::rooms::RoomManager;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::session::run_ws_session;

/// Shared state accessible from axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Call dispatcher (owns the room registry).
    pub dispatcher: Arc<Dispatcher>,
    /// Listener and connection settings.
    pub config: Arc<ServerConfig>,
    /// Upgrade origin policy.
    pub origin: Arc<OriginPolicy>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle, when a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
}

/// The switchboard server.
pub struct SwitchboardServer {
    config: ServerConfig,
    dispatcher: Arc<Dispatcher>,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
    metrics: Option<PrometheusHandle>,
}

impl SwitchboardServer {
    /// Create a server around an existing dispatcher.
    pub fn new(config: ServerConfig, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            config,
            dispatcher,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
            metrics: None,
        }
    }

    /// Wire a server from settings, a route table and a store.
    pub fn from_settings(settings: &Settings, table: RouteTable, store: Arc<dyn StoreGateway>) -> Self {
        let config = ServerConfig::from_settings(settings);
        let rooms = Arc::new(RoomManager::new(config.slow_client_drop_limit));
        let dispatcher = Dispatcher::new(table, store, rooms, DispatchConfig::from_settings(settings));
        Self::new(config, Arc::new(dispatcher))
    }

    /// Serve `/metrics` from `handle`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Build the axum router.
    pub fn router(&self) -> Router {
        let state = AppState {
            dispatcher: self.dispatcher.clone(),
            config: Arc::new(self.config.clone()),
            origin: Arc::new(OriginPolicy::from_config(&self.config)),
            shutdown: self.shutdown.clone(),
            start_time: self.start_time,
            metrics: self.metrics.clone(),
        };

        Router::new()
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .route("/ws", get(ws_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Bind and serve in the background until shutdown is signalled.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let listener = TcpListener::bind((self.config.host.as_str(), self.config.port)).await?;
        let addr = listener.local_addr()?;
        let router = self.router();
        let token = self.shutdown.token();

        let handle = tokio::spawn(async move {
            let served = axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(error) = served {
                error!(%error, "server terminated with error");
            }
        });
        info!(%addr, "switchboard server listening");
        Ok((addr, handle))
    }

    /// Call dispatcher.
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let rooms = state.dispatcher.rooms();
    Json(health::health_check(
        state.start_time,
        rooms.connection_count(),
        rooms.room_count(),
        state.shutdown.is_shutting_down(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => handle.render().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

#[derive(Debug, Default, Deserialize)]
struct WsQuery {
    token: Option<String>,
}

/// GET /ws
async fn ws_handler(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    if state.shutdown.is_shutting_down() {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    let live = state.dispatcher.rooms().connection_count();
    if live >= state.config.max_connections {
        warn!(live, max = state.config.max_connections, "refusing upgrade, connection limit reached");
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    if !state.origin.allows(&headers) {
        warn!(origin = ?headers.get(axum::http::header::ORIGIN), "refusing upgrade from disallowed origin");
        return StatusCode::FORBIDDEN.into_response();
    }

    let token = extract_token(&headers, query.token.as_deref(), &state.config);
    let id = ConnectionId::generate();
    let dispatcher = state.dispatcher.clone();
    let config = (*state.config).clone();
    let shutdown = state.shutdown.token();
    ws.max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| run_ws_session(socket, id, token, dispatcher, config, shutdown))
}
