//! # switchboard-client
//!
//! Client side of the switchboard protocol:
//!
//! - **Calls**: [`Client::call`] correlates concurrent requests over one
//!   connection and bounds each with a timeout
//! - **Sync**: [`Client::sync`] runs the registered pre-filter before sending
//! - **Rooms**: join/leave and the event stream of relayed sync results
//! - **Location**: [`LocationMiddleware`] guards navigation per path

#![deny(unsafe_code)]

pub mod client;
pub mod errors;
pub mod location;
pub mod pending;

pub use client::{Client, ClientOptions, Events};
pub use errors::{ClientError, Result};
pub use location::{LocationGuard, LocationMiddleware, Navigation, NavigationRequest, Notifier, TracingNotifier};
pub use pending::{CallResult, PendingCall, PendingCalls};
