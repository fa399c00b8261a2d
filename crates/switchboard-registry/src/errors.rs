//! Registry error types.

use std::path::PathBuf;

use switchboard_core::{KeyError, OperationKind};
use thiserror::Error;

/// Errors raised while discovering modules or building a route table.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Two modules map to the same operation key.
    #[error("duplicate operation key `{0}`")]
    DuplicateKey(String),
    /// A sync key has a client filter but no server handler.
    #[error("sync operation `{0}` has no server module")]
    MissingSyncServer(String),
    /// Two function modules export the same symbol.
    #[error("function `{0}` is exported by more than one module")]
    DuplicateFunction(String),
    /// A key was registered under the other operation kind.
    #[error("key `{key}` is not a {expected} key")]
    WrongKind {
        /// Offending key.
        key: String,
        /// Kind the registration call expected.
        expected: OperationKind,
    },
    /// The key string is malformed.
    #[error(transparent)]
    InvalidKey(#[from] KeyError),
    /// A file under `_sync` lacks the `_client` / `_server` suffix.
    #[error("sync module `{0}` must end in `_client` or `_server`")]
    InvalidSyncModule(String),
    /// Registered handlers disagree with the generated manifest.
    #[error("route table does not match manifest (missing: {missing:?}, unexpected: {unexpected:?})")]
    ManifestMismatch {
        /// Keys in the manifest with no registered handler.
        missing: Vec<String>,
        /// Registered keys absent from the manifest.
        unexpected: Vec<String>,
    },
    /// Directory traversal failed.
    #[error("failed to walk `{path}`: {source}")]
    Walk {
        /// Directory being scanned.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: walkdir::Error,
    },
    /// Reading or writing generated files failed.
    #[error("i/o error on `{path}`: {source}")]
    Io {
        /// File involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// Manifest (de)serialization failed.
    #[error("manifest JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result alias for registry operations.
pub type Result<T> = std::result::Result<T, RegistryError>;
