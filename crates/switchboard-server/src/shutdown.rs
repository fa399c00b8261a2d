//! Stopping the server: one signal closes the listener and every open session.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// How long [`ShutdownCoordinator::drain`] waits for the listener by default.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Owns the server-wide stop signal.
///
/// The listener stops accepting upgrades and each session loop sends a close
/// frame and leaves its rooms once the signal fires. `/health` switches to
/// `shutting_down` from the same flag.
#[derive(Debug, Default)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    /// Not yet signalled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Handed to the listener and to each session at upgrade.
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Fire the stop signal. Calling twice is harmless.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether the stop signal has fired.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Fire the stop signal, then wait for the listener task returned by
    /// [`listen`](crate::SwitchboardServer::listen) to finish.
    ///
    /// Returns `false` if `timeout` (default [`DEFAULT_DRAIN_TIMEOUT`])
    /// elapsed first. Sessions still open at that point are abandoned.
    pub async fn drain(&self, listener: JoinHandle<()>, timeout: Option<Duration>) -> bool {
        let timeout = timeout.unwrap_or(DEFAULT_DRAIN_TIMEOUT);
        self.shutdown();
        info!(timeout_ms = timeout.as_millis(), "draining sessions");
        match tokio::time::timeout(timeout, listener).await {
            Ok(Ok(())) => true,
            Ok(Err(error)) => {
                warn!(%error, "listener task failed during drain");
                true
            }
            Err(_) => {
                warn!(?timeout, "drain timed out with sessions still open");
                false
            }
        }
    }
}
