//! # switchboard-registry
//!
//! Turns a convention-based tree of handler modules into an addressable
//! operation table.
//!
//! - **Discovery**: pure path predicates ([`classify`]) mapping files to keys
//! - **Scan**: filesystem traversal producing a deterministic [`Manifest`]
//! - **Codegen**: [`Manifest::render_module`] emits a `register` function
//! - **Runtime**: [`RouteTable`] built through [`RouteTableBuilder`], with the
//!   [`OperationHandler`] / [`SyncFilter`] traits and the shared
//!   [`FunctionNamespace`]
//! - **Room events**: [`RoomEvent`] pushed through the server-supplied
//!   [`RoomBroadcaster`] available on every [`CallContext`]

#![deny(unsafe_code)]

pub mod broadcast;
pub mod discovery;
pub mod errors;
pub mod functions;
pub mod handler;
pub mod manifest;
pub mod scan;
pub mod table;

pub use broadcast::{RoomBroadcaster, RoomEvent};
pub use discovery::{Discovered, ModuleRole, classify};
pub use errors::{RegistryError, Result};
pub use functions::FunctionNamespace;
pub use handler::{CallContext, FilterContext, HandlerError, OperationHandler, SyncFilter};
pub use manifest::{ApiEntry, Manifest, ManifestBuilder, SyncEntry};
pub use scan::{ScanOptions, scan, write_outputs};
pub use table::{Route, RouteTable, RouteTableBuilder};
