//! Naming-convention predicates.
//!
//! These functions look only at path strings. Traversal lives in
//! [`crate::scan`].
//!
//! Conventions, relative to the source root:
//!
//! | Path | Role | Key |
//! |------|------|-----|
//! | `<dir>/_api/<name>.rs` | api handler | `api/<dir>/<name>` |
//! | `<dir>/_sync/<name>_server.rs` | sync server handler | `sync/<dir>/<name>` |
//! | `<dir>/_sync/<name>_client.rs` | sync client filter | `sync/<dir>/<name>` |
//!
//! `<name>` may itself contain `/` when handlers are nested below the marker
//! directory. `mod.rs` files are never handlers.

use switchboard_core::{OperationKey, OperationKind};

use crate::errors::{RegistryError, Result};

const API_MARKER: &str = "_api";
const SYNC_MARKER: &str = "_sync";
const CLIENT_SUFFIX: &str = "_client";
const SERVER_SUFFIX: &str = "_server";

/// What a discovered module contributes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ModuleRole {
    /// `api` handler.
    Api,
    /// Client-side pre-filter of a sync pair.
    SyncClient,
    /// Server-side handler of a sync pair.
    SyncServer,
}

/// A handler module recognized by [`classify`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Discovered {
    /// Module role.
    pub role: ModuleRole,
    /// Key it registers under.
    pub key: OperationKey,
}

/// Normalize separators to `/`.
#[must_use]
pub fn normalize(path: &str) -> String {
    path.replace('\\', "/")
}

/// Classify a path relative to the source root.
///
/// `Ok(None)` means "not a handler module". An error means the path sits in
/// a handler directory but breaks the convention.
pub fn classify(relative: &str) -> Result<Option<Discovered>> {
    let normalized = normalize(relative);
    let Some(stem) = normalized.strip_suffix(".rs") else {
        return Ok(None);
    };
    if stem == "mod" || stem.ends_with("/mod") {
        return Ok(None);
    }

    let segments: Vec<&str> = stem.split('/').collect();
    let Some(marker_at) = segments
        .iter()
        .position(|s| *s == API_MARKER || *s == SYNC_MARKER)
    else {
        return Ok(None);
    };
    let dir = segments[..marker_at].join("/");
    let name = segments[marker_at + 1..].join("/");
    if name.is_empty() {
        return Ok(None);
    }

    if segments[marker_at] == API_MARKER {
        let key = OperationKey::new(OperationKind::Api, &dir, &name)?;
        return Ok(Some(Discovered {
            role: ModuleRole::Api,
            key,
        }));
    }

    let (role, base) = if let Some(base) = name.strip_suffix(CLIENT_SUFFIX) {
        (ModuleRole::SyncClient, base)
    } else if let Some(base) = name.strip_suffix(SERVER_SUFFIX) {
        (ModuleRole::SyncServer, base)
    } else {
        return Err(RegistryError::InvalidSyncModule(normalized));
    };
    if base.is_empty() || base.ends_with('/') {
        return Err(RegistryError::InvalidSyncModule(normalized));
    }
    let key = OperationKey::new(OperationKind::Sync, &dir, base)?;
    Ok(Some(Discovered { role, key }))
}

/// Whether `file_name` is a function module (any `.rs` except `mod.rs`).
#[must_use]
pub fn is_function_module(file_name: &str) -> bool {
    file_name.ends_with(".rs") && file_name != "mod.rs"
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn key_of(path: &str) -> (ModuleRole, String) {
        let found = classify(path).unwrap().unwrap();
        (found.role, found.key.to_string())
    }

    #[test]
    fn api_module() {
        assert_eq!(
            key_of("settings/_api/updateUser.rs"),
            (ModuleRole::Api, "api/settings/updateUser".into())
        );
    }

    #[test]
    fn nested_page_path() {
        assert_eq!(
            key_of("games/boerZoektVrouw/_api/getGameData.rs"),
            (ModuleRole::Api, "api/games/boerZoektVrouw/getGameData".into())
        );
    }

    #[test]
    fn sync_pair_shares_one_key() {
        assert_eq!(
            key_of("test/_sync/updateCounter_client.rs"),
            (ModuleRole::SyncClient, "sync/test/updateCounter".into())
        );
        assert_eq!(
            key_of("test/_sync/updateCounter_server.rs"),
            (ModuleRole::SyncServer, "sync/test/updateCounter".into())
        );
    }

    #[test]
    fn windows_separators_are_normalized() {
        assert_eq!(
            key_of("test\\_sync\\updateCounter_server.rs"),
            (ModuleRole::SyncServer, "sync/test/updateCounter".into())
        );
    }

    #[test]
    fn root_level_marker() {
        assert_eq!(key_of("_api/ping.rs"), (ModuleRole::Api, "api/ping".into()));
    }

    #[test]
    fn non_handlers_are_skipped() {
        assert!(classify("settings/page.rs").unwrap().is_none());
        assert!(classify("settings/_api/notes.md").unwrap().is_none());
        assert!(classify("settings/_api/mod.rs").unwrap().is_none());
        assert!(classify("settings/_apis/x.rs").unwrap().is_none());
    }

    #[test]
    fn sync_without_suffix_is_an_error() {
        assert_matches!(
            classify("test/_sync/updateCounter.rs"),
            Err(RegistryError::InvalidSyncModule(p)) if p == "test/_sync/updateCounter.rs"
        );
        assert_matches!(classify("test/_sync/_server.rs"), Err(RegistryError::InvalidSyncModule(_)));
    }

    #[test]
    fn function_module_predicate() {
        assert!(is_function_module("session.rs"));
        assert!(!is_function_module("mod.rs"));
        assert!(!is_function_module("session.ts"));
    }
}
