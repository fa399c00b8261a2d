//! WebSocket connections, per-frame handling and the session loop.

pub mod connection;
pub mod handler;
pub mod session;
