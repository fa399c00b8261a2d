//! # switchboard-server
//!
//! Axum HTTP + `WebSocket` server for switchboard operations.
//!
//! - [`Dispatcher`]: resolve, authorize, run and normalize calls; relay sync
//!   results with per-recipient re-authorization
//! - [`RoomManager`]: room membership and fan-out under a single lock
//! - [`RoomEventBroadcaster`]: custom events handlers push to a room
//! - [`PresenceTracker`]: `userAfk` / `userBack` notices with a reconnect
//!   grace period
//! - `WebSocket` gateway: origin check, token extraction, welcome, heartbeat,
//!   sequential frame handling, slow-client teardown
//! - HTTP endpoints: `/health`, `/metrics`
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod config;
pub mod dispatch;
pub mod handshake;
pub mod health;
pub mod metrics;
pub mod presence;
pub mod room_events;
pub mod rooms;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use config::{DispatchConfig, ServerConfig};
pub use dispatch::{CallState, Caller, Dispatcher, Failure, Outcome, SyncReport};
pub use handshake::OriginPolicy;
pub use presence::PresenceTracker;
pub use room_events::RoomEventBroadcaster;
pub use rooms::{BroadcastReport, RoomManager};
pub use server::SwitchboardServer;
pub use shutdown::ShutdownCoordinator;
