//! Settings schema.
//!
//! Every group uses `#[serde(default)]`, so a settings file only needs the
//! keys it changes.

use serde::{Deserialize, Serialize};

/// Root settings object.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// Network listener and connection limits.
    pub server: ServerSettings,
    /// Dispatcher behaviour.
    pub dispatch: DispatchSettings,
    /// Client stub defaults.
    pub client: ClientSettings,
    /// Registry build step inputs and outputs.
    pub registry: RegistrySettings,
    /// Log output.
    pub logging: LoggingSettings,
}

/// Where the WebSocket upgrade reads the session token from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenSource {
    /// Cookie named by `sessionCookie`.
    #[default]
    Cookie,
    /// `Authorization: Bearer <token>` header.
    Bearer,
}

/// Server network and runtime settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Listen port; 0 picks an ephemeral port.
    pub port: u16,
    /// Upgrades beyond this many live connections are refused.
    pub max_connections: usize,
    /// Largest accepted inbound frame in bytes.
    pub max_message_size: usize,
    /// Per-connection outbound queue depth.
    pub send_queue: usize,
    /// Seconds between server pings.
    pub ping_interval_secs: u64,
    /// Seconds of silence before a connection is torn down.
    pub pong_timeout_secs: u64,
    /// Extra origins allowed to open a WebSocket.
    pub allowed_origins: Vec<String>,
    /// Cookie carrying the session token.
    pub session_cookie: String,
    /// Where to read the session token from.
    pub token_source: TokenSource,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            max_connections: 512,
            max_message_size: 5 * 1024 * 1024,
            send_queue: 1024,
            ping_interval_secs: 30,
            pong_timeout_secs: 60,
            allowed_origins: Vec::new(),
            session_cookie: "session".to_string(),
            token_source: TokenSource::Cookie,
        }
    }
}

/// Dispatcher behaviour.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DispatchSettings {
    /// Re-evaluate a sync operation's auth policy against each recipient.
    pub recheck_sync_recipients: bool,
    /// Forward rule failure text to clients instead of a generic message.
    pub expose_auth_reasons: bool,
    /// Dropped outbound frames tolerated before a connection is closed.
    pub slow_client_drop_limit: u64,
    /// Tell room peers `userAfk` when a member drops and `userBack` when it
    /// returns within the grace period.
    pub presence_events: bool,
    /// Milliseconds a dropped member may take to come back.
    pub presence_grace_ms: u64,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            recheck_sync_recipients: true,
            expose_auth_reasons: false,
            slow_client_drop_limit: 100,
            presence_events: false,
            presence_grace_ms: 60_000,
        }
    }
}

/// Client stub defaults.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientSettings {
    /// Milliseconds before an unanswered call rejects with a timeout.
    pub call_timeout_ms: u64,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            call_timeout_ms: 10_000,
        }
    }
}

/// Registry build step paths, relative to the project root.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RegistrySettings {
    /// Root scanned for `_api` / `_sync` handler modules.
    pub source_dir: String,
    /// Directory of function modules.
    pub functions_dir: String,
    /// Generated JSON manifest.
    pub manifest_path: String,
    /// Generated Rust registration module.
    pub module_path: String,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            source_dir: "src".to_string(),
            functions_dir: "server/functions".to_string(),
            manifest_path: "switchboard.manifest.json".to_string(),
            module_path: "src/routes_generated.rs".to_string(),
        }
    }
}

/// Log output.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl Settings {
    /// Reject combinations the server cannot run with.
    pub fn validate(&self) -> crate::Result<()> {
        let invalid = |msg: &str| Err(crate::SettingsError::InvalidValue(msg.to_owned()));
        if self.server.ping_interval_secs == 0 {
            return invalid("server.pingIntervalSecs must be greater than 0");
        }
        if self.server.pong_timeout_secs < self.server.ping_interval_secs {
            return invalid("server.pongTimeoutSecs must be at least server.pingIntervalSecs");
        }
        if self.server.max_message_size == 0 {
            return invalid("server.maxMessageSize must be greater than 0");
        }
        if self.server.send_queue == 0 {
            return invalid("server.sendQueue must be greater than 0");
        }
        if self.dispatch.presence_events && self.dispatch.presence_grace_ms == 0 {
            return invalid("dispatch.presenceGraceMs must be greater than 0 when presenceEvents is on");
        }
        if self.client.call_timeout_ms == 0 {
            return invalid("client.callTimeoutMs must be greater than 0");
        }
        Ok(())
    }
}
