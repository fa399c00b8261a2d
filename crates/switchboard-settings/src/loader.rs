//! Settings loading: defaults, then a JSON file, then the environment.
//!
//! Merge rules for the file layer:
//! - objects merge recursively, file keys win
//! - arrays and primitives are replaced
//! - `null` in the file leaves the default in place

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::{Settings, TokenSource};

/// Settings file name looked up in the working directory.
pub const SETTINGS_FILE: &str = "switchboard.json";

/// Default settings file location (`./switchboard.json`).
#[must_use]
pub fn settings_path() -> PathBuf {
    PathBuf::from(SETTINGS_FILE)
}

/// Load from `path`, apply process environment overrides, validate.
///
/// A missing file yields defaults; an unreadable or malformed one is an error.
pub fn load_settings_from_path(path: &Path) -> Result<Settings> {
    load_with_env(path, |name| std::env::var(name).ok())
}

/// [`load_settings_from_path`] with an injectable environment.
pub fn load_with_env(path: &Path, env: impl Fn(&str) -> Option<String>) -> Result<Settings> {
    let defaults = serde_json::to_value(Settings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: Settings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings, env);
    settings.validate()?;
    Ok(settings)
}

/// Recursive merge of `source` over `target`.
#[must_use]
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `SWITCHBOARD_*` overrides read through `env`.
///
/// Unparseable or out-of-range values are logged and ignored.
pub fn apply_env_overrides(settings: &mut Settings, env: impl Fn(&str) -> Option<String>) {
    let read = |name: &str| env(name).filter(|v| !v.is_empty());

    if let Some(v) = read("SWITCHBOARD_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = read("SWITCHBOARD_PORT") {
        match parse_u16_range(&v, 0, u16::MAX) {
            Some(port) => settings.server.port = port,
            None => warn!(key = "SWITCHBOARD_PORT", value = %v, "invalid port env var, ignoring"),
        }
    }
    if let Some(v) = read("SWITCHBOARD_TOKEN_SOURCE") {
        match v.to_lowercase().as_str() {
            "cookie" => settings.server.token_source = TokenSource::Cookie,
            "bearer" => settings.server.token_source = TokenSource::Bearer,
            _ => warn!(key = "SWITCHBOARD_TOKEN_SOURCE", value = %v, "invalid token source, ignoring"),
        }
    }
    if let Some(v) = read("SWITCHBOARD_ALLOWED_ORIGINS") {
        settings.server.allowed_origins = parse_list(&v);
    }

    if let Some(v) = read("SWITCHBOARD_RECHECK_SYNC_RECIPIENTS") {
        if let Some(b) = bool_or_warn("SWITCHBOARD_RECHECK_SYNC_RECIPIENTS", &v) {
            settings.dispatch.recheck_sync_recipients = b;
        }
    }
    if let Some(v) = read("SWITCHBOARD_EXPOSE_AUTH_REASONS") {
        if let Some(b) = bool_or_warn("SWITCHBOARD_EXPOSE_AUTH_REASONS", &v) {
            settings.dispatch.expose_auth_reasons = b;
        }
    }

    if let Some(v) = read("SWITCHBOARD_PRESENCE_EVENTS") {
        if let Some(b) = bool_or_warn("SWITCHBOARD_PRESENCE_EVENTS", &v) {
            settings.dispatch.presence_events = b;
        }
    }
    if let Some(v) = read("SWITCHBOARD_PRESENCE_GRACE_MS") {
        match parse_u64_range(&v, 1, 3_600_000) {
            Some(ms) => settings.dispatch.presence_grace_ms = ms,
            None => warn!(key = "SWITCHBOARD_PRESENCE_GRACE_MS", value = %v, "invalid grace env var, ignoring"),
        }
    }

    if let Some(v) = read("SWITCHBOARD_CALL_TIMEOUT_MS") {
        match parse_u64_range(&v, 1, 3_600_000) {
            Some(ms) => settings.client.call_timeout_ms = ms,
            None => warn!(key = "SWITCHBOARD_CALL_TIMEOUT_MS", value = %v, "invalid timeout env var, ignoring"),
        }
    }

    if let Some(v) = read("SWITCHBOARD_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read("SWITCHBOARD_LOG_JSON") {
        if let Some(b) = bool_or_warn("SWITCHBOARD_LOG_JSON", &v) {
            settings.logging.json = b;
        }
    }
}

fn bool_or_warn(name: &str, val: &str) -> Option<bool> {
    let parsed = parse_bool(val);
    if parsed.is_none() {
        warn!(key = name, value = %val, "invalid boolean env var, ignoring");
    }
    parsed
}

// ── Pure parsers ────────────────────────────────────────────────────────────

/// `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`, case-insensitive.
#[must_use]
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a `u16` within `min..=max`.
#[must_use]
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}

/// Parse a `u64` within `min..=max`.
#[must_use]
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}

/// Split a comma-separated list, trimming blanks.
#[must_use]
pub fn parse_list(val: &str) -> Vec<String> {
    val.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SettingsError;
    use assert_matches::assert_matches;
    use serde_json::json;
    use std::collections::HashMap;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |name| map.get(name).cloned()
    }

    // ── deep_merge ──

    #[test]
    fn merge_nested_override() {
        let merged = deep_merge(
            json!({"server": {"host": "a", "port": 1}}),
            json!({"server": {"port": 2}}),
        );
        assert_eq!(merged, json!({"server": {"host": "a", "port": 2}}));
    }

    #[test]
    fn merge_null_preserves_target() {
        let merged = deep_merge(json!({"a": 1}), json!({"a": null}));
        assert_eq!(merged, json!({"a": 1}));
    }

    #[test]
    fn merge_array_replaces() {
        let merged = deep_merge(json!({"o": ["x", "y"]}), json!({"o": ["z"]}));
        assert_eq!(merged, json!({"o": ["z"]}));
    }

    #[test]
    fn merge_primitive_replaces_object() {
        let merged = deep_merge(json!({"a": {"b": 1}}), json!({"a": 5}));
        assert_eq!(merged, json!({"a": 5}));
    }

    // ── file loading ──

    #[test]
    fn missing_file_returns_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let s = load_with_env(&dir.path().join("absent.json"), no_env).unwrap();
        assert_eq!(s, Settings::default());
    }

    #[test]
    fn partial_file_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE);
        std::fs::write(
            &path,
            r#"{"server": {"port": 9000, "allowedOrigins": ["https://app.example"]}, "dispatch": {"exposeAuthReasons": true}}"#,
        )
        .unwrap();
        let s = load_with_env(&path, no_env).unwrap();
        assert_eq!(s.server.port, 9000);
        assert_eq!(s.server.host, "127.0.0.1");
        assert_eq!(s.server.allowed_origins, vec!["https://app.example"]);
        assert!(s.dispatch.expose_auth_reasons);
        assert!(s.dispatch.recheck_sync_recipients);
    }

    #[test]
    fn invalid_json_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE);
        std::fs::write(&path, "{not json").unwrap();
        assert_matches!(load_with_env(&path, no_env), Err(SettingsError::Json(_)));
    }

    #[test]
    fn invalid_combination_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE);
        std::fs::write(&path, r#"{"server": {"pingIntervalSecs": 0}}"#).unwrap();
        assert_matches!(load_with_env(&path, no_env), Err(SettingsError::InvalidValue(_)));
    }

    // ── env overrides ──

    #[test]
    fn env_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE);
        std::fs::write(&path, r#"{"server": {"port": 9000}}"#).unwrap();
        let env = env_of(&[
            ("SWITCHBOARD_PORT", "9100"),
            ("SWITCHBOARD_LOG_JSON", "yes"),
            ("SWITCHBOARD_RECHECK_SYNC_RECIPIENTS", "off"),
            ("SWITCHBOARD_ALLOWED_ORIGINS", "https://a.example, https://b.example,"),
            ("SWITCHBOARD_TOKEN_SOURCE", "Bearer"),
            ("SWITCHBOARD_PRESENCE_EVENTS", "1"),
            ("SWITCHBOARD_PRESENCE_GRACE_MS", "2500"),
        ]);
        let s = load_with_env(&path, env).unwrap();
        assert_eq!(s.server.port, 9100);
        assert!(s.logging.json);
        assert!(!s.dispatch.recheck_sync_recipients);
        assert_eq!(s.server.allowed_origins, vec!["https://a.example", "https://b.example"]);
        assert_eq!(s.server.token_source, TokenSource::Bearer);
        assert!(s.dispatch.presence_events);
        assert_eq!(s.dispatch.presence_grace_ms, 2500);
    }

    #[test]
    fn invalid_env_values_are_ignored() {
        let mut s = Settings::default();
        apply_env_overrides(
            &mut s,
            env_of(&[
                ("SWITCHBOARD_PORT", "70000"),
                ("SWITCHBOARD_CALL_TIMEOUT_MS", "0"),
                ("SWITCHBOARD_EXPOSE_AUTH_REASONS", "maybe"),
                ("SWITCHBOARD_HOST", ""),
                ("SWITCHBOARD_PRESENCE_GRACE_MS", "0"),
            ]),
        );
        assert_eq!(s, Settings::default());
    }

    // ── parsers ──

    #[test]
    fn parse_bool_variants() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool("on"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("nah"), None);
    }

    #[test]
    fn parse_ranges() {
        assert_eq!(parse_u16_range("8080", 1, 65535), Some(8080));
        assert_eq!(parse_u16_range("0", 1, 65535), None);
        assert_eq!(parse_u64_range("5000", 1, 10_000), Some(5000));
        assert_eq!(parse_u64_range("-1", 1, 10), None);
    }
}
