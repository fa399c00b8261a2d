//! # switchboard-settings
//!
//! Layered configuration for switchboard.
//!
//! Sources, lowest priority first:
//! 1. Compiled defaults ([`Settings::default`])
//! 2. `switchboard.json`, deep-merged over the defaults
//! 3. `SWITCHBOARD_*` environment variables
//!
//! Settings are loaded once by the binary and passed down explicitly.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{apply_env_overrides, deep_merge, load_settings_from_path, load_with_env, settings_path};
pub use types::{
    ClientSettings, DispatchSettings, LoggingSettings, RegistrySettings, ServerSettings, Settings, TokenSource,
};
