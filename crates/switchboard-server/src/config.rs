//! Runtime configuration derived from [`Settings`].

use std::time::Duration;

use switchboard_settings::{Settings, TokenSource};

/// Listener, connection and handshake configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Host to bind.
    pub host: String,
    /// Port to bind; 0 picks an ephemeral port.
    pub port: u16,
    /// Upgrades beyond this many live connections get 503.
    pub max_connections: usize,
    /// Largest accepted inbound frame in bytes.
    pub max_message_size: usize,
    /// Per-connection outbound queue depth.
    pub send_queue: usize,
    /// Interval between server pings.
    pub ping_interval: Duration,
    /// Silence after which a connection is torn down.
    pub pong_timeout: Duration,
    /// Dropped outbound frames tolerated before teardown.
    pub slow_client_drop_limit: u64,
    /// Extra origins allowed to open a WebSocket.
    pub allowed_origins: Vec<String>,
    /// Cookie carrying the session token.
    pub session_cookie: String,
    /// Where to read the session token from.
    pub token_source: TokenSource,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            max_connections: 512,
            max_message_size: 5 * 1024 * 1024,
            send_queue: 1024,
            ping_interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(60),
            slow_client_drop_limit: 100,
            allowed_origins: Vec::new(),
            session_cookie: "session".into(),
            token_source: TokenSource::Cookie,
        }
    }
}

impl ServerConfig {
    /// Project the server-relevant parts of `settings`.
    #[must_use]
    pub fn from_settings(settings: &Settings) -> Self {
        let server = &settings.server;
        Self {
            host: server.host.clone(),
            port: server.port,
            max_connections: server.max_connections,
            max_message_size: server.max_message_size,
            send_queue: server.send_queue,
            ping_interval: Duration::from_secs(server.ping_interval_secs),
            pong_timeout: Duration::from_secs(server.pong_timeout_secs),
            slow_client_drop_limit: settings.dispatch.slow_client_drop_limit,
            allowed_origins: server.allowed_origins.clone(),
            session_cookie: server.session_cookie.clone(),
            token_source: server.token_source,
        }
    }
}

/// Dispatcher behaviour switches.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DispatchConfig {
    /// Re-evaluate a sync route's policy against each recipient's session.
    pub recheck_sync_recipients: bool,
    /// Send rule failure text to the caller instead of a generic message.
    pub expose_auth_reasons: bool,
    /// Reconnect grace period for room presence notices. `None` disables them.
    pub presence_grace: Option<Duration>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            recheck_sync_recipients: true,
            expose_auth_reasons: false,
            presence_grace: None,
        }
    }
}

impl DispatchConfig {
    /// Project the dispatch settings.
    #[must_use]
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            recheck_sync_recipients: settings.dispatch.recheck_sync_recipients,
            expose_auth_reasons: settings.dispatch.expose_auth_reasons,
            presence_grace: settings
                .dispatch
                .presence_events
                .then(|| Duration::from_millis(settings.dispatch.presence_grace_ms)),
        }
    }
}
