//! Prometheus recorder and metric names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the global Prometheus recorder.
///
/// Call once at startup, before anything records a metric.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// A handle that renders without touching the global recorder (tests, embedding).
#[must_use]
pub fn detached_handle() -> PrometheusHandle {
    PrometheusBuilder::new().build_recorder().handle()
}

/// Calls dispatched (counter, labels: `key`, `kind`).
pub const CALLS_TOTAL: &str = "switchboard_calls_total";
/// Calls that ended in an error response (counter, labels: `key`, `reason`).
pub const CALL_ERRORS_TOTAL: &str = "switchboard_call_errors_total";
/// Dispatch latency including the handler (histogram, labels: `kind`).
pub const CALL_DURATION_SECONDS: &str = "switchboard_call_duration_seconds";
/// Sync events delivered to room members (counter).
pub const SYNC_DELIVERIES_TOTAL: &str = "switchboard_sync_deliveries_total";
/// Room members skipped by the recipient re-check (counter).
pub const SYNC_SKIPPED_TOTAL: &str = "switchboard_sync_skipped_total";
/// Handler-initiated room events delivered (counter).
pub const ROOM_EVENTS_TOTAL: &str = "switchboard_room_events_total";
/// Presence notices delivered to room peers (counter, labels: `event`).
pub const PRESENCE_EVENTS_TOTAL: &str = "switchboard_presence_events_total";
/// Connections opened (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// Live connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Connection lifetime (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Outbound frames dropped on full queues (counter).
pub const WS_BROADCAST_DROPS_TOTAL: &str = "ws_broadcast_drops_total";
