//! Upgrade-time checks: origin policy and session token extraction.

use axum::http::HeaderMap;
use axum::http::header::{AUTHORIZATION, HOST, ORIGIN};
use axum_extra::extract::cookie::CookieJar;
use switchboard_core::SessionToken;
use switchboard_settings::TokenSource;

use crate::config::ServerConfig;

const LOOPBACK_HOSTS: [&str; 3] = ["localhost", "127.0.0.1", "[::1]"];

/// Decides which `Origin` headers may open a WebSocket.
///
/// Requests without an `Origin` (native clients) are always allowed. Browser
/// origins pass when they point at this server, at a loopback host, or at
/// one of the configured external origins.
#[derive(Clone, Debug)]
pub struct OriginPolicy {
    server_authority: String,
    allowed: Vec<String>,
}

impl OriginPolicy {
    /// Policy for a server bound at `host:port`.
    #[must_use]
    pub fn new(host: &str, port: u16, allowed_origins: &[String]) -> Self {
        Self {
            server_authority: format!("{host}:{port}"),
            allowed: allowed_origins
                .iter()
                .map(|o| o.trim_end_matches('/').to_owned())
                .collect(),
        }
    }

    /// Policy from server configuration.
    #[must_use]
    pub fn from_config(config: &ServerConfig) -> Self {
        Self::new(&config.host, config.port, &config.allowed_origins)
    }

    /// Whether an upgrade with these headers may proceed.
    #[must_use]
    pub fn allows(&self, headers: &HeaderMap) -> bool {
        let Some(origin) = headers.get(ORIGIN) else {
            return true;
        };
        let Ok(origin) = origin.to_str() else {
            return false;
        };
        let host = headers.get(HOST).and_then(|h| h.to_str().ok());
        self.allows_origin(origin, host)
    }

    /// Whether `origin` is acceptable when the request targeted `host`.
    #[must_use]
    pub fn allows_origin(&self, origin: &str, host: Option<&str>) -> bool {
        let origin = origin.trim_end_matches('/');
        if self.allowed.iter().any(|allowed| allowed == origin) {
            return true;
        }
        let Some((_, authority)) = origin.split_once("://") else {
            return false;
        };
        if authority == self.server_authority || host.is_some_and(|h| h == authority) {
            return true;
        }
        LOOPBACK_HOSTS.contains(&hostname(authority))
    }
}

fn hostname(authority: &str) -> &str {
    if authority.starts_with('[') {
        return authority.split_once(']').map_or(authority, |(h, _)| &authority[..=h.len()]);
    }
    authority.split_once(':').map_or(authority, |(h, _)| h)
}

/// Session token for an upgrade request.
///
/// Reads the configured source first (the session cookie or an
/// `Authorization: Bearer` header) and falls back to the `token` query
/// parameter. Empty values count as absent.
#[must_use]
pub fn extract_token(headers: &HeaderMap, query_token: Option<&str>, config: &ServerConfig) -> Option<SessionToken> {
    let primary = match config.token_source {
        TokenSource::Cookie => CookieJar::from_headers(headers)
            .get(&config.session_cookie)
            .map(|cookie| cookie.value().to_owned()),
        TokenSource::Bearer => headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(|v| v.trim().to_owned()),
    };
    primary
        .filter(|t| !t.is_empty())
        .or_else(|| query_token.filter(|t| !t.is_empty()).map(str::to_owned))
        .map(SessionToken::from)
}
