//! # switchboard-core
//!
//! Shared vocabulary for the switchboard call/broadcast layer:
//!
//! - **Keys**: [`OperationKey`] (`<kind>/<path>/<name>`) and [`OperationKind`]
//! - **Sessions**: opaque [`Session`] records with identity and [`Location`]
//! - **Auth**: [`AuthPolicy`], the closed [`Rule`] grammar and [`evaluate`]
//! - **Frames**: [`ClientFrame`] / [`ServerFrame`] wire messages
//! - **Errors**: [`ErrorReason`] codes carried in error responses
//! - **Store**: the [`StoreGateway`] trait and an in-memory implementation

#![deny(unsafe_code)]

pub mod auth;
pub mod errors;
pub mod frames;
pub mod ids;
pub mod key;
pub mod session;
pub mod store;

pub use auth::{AuthPolicy, AuthVerdict, Denial, Rule, ValueKind, evaluate};
pub use errors::ErrorReason;
pub use frames::{CallStatus, ClientFrame, CorrelationId, Response, ServerFrame};
pub use ids::{ConnectionId, SessionToken};
pub use key::{KeyError, OperationKey, OperationKind};
pub use session::{Location, Session};
pub use store::{MemoryStore, StoreError, StoreGateway};
