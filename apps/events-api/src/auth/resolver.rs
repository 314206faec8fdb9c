//! Handshake authentication: session cookie → identity and team.
//!
//! Resolution never fails. A missing cookie, an unknown token, a store error
//! and a slow store all produce [`ResolvedIdentity::Anonymous`], and the
//! caller cannot tell which one happened.

use std::sync::Arc;
use std::time::Duration;

use axum::http::header::COOKIE;
use axum::http::HeaderMap;
use hackbox_common::Identity;

use super::sessions::SessionStore;

/// Outcome of resolving a handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedIdentity {
    Authenticated {
        identity: Identity,
        team: Option<String>,
    },
    Anonymous,
}

impl ResolvedIdentity {
    pub fn team(&self) -> Option<&str> {
        match self {
            ResolvedIdentity::Authenticated { team, .. } => team.as_deref(),
            ResolvedIdentity::Anonymous => None,
        }
    }

    pub fn identity(&self) -> Option<&Identity> {
        match self {
            ResolvedIdentity::Authenticated { identity, .. } => Some(identity),
            ResolvedIdentity::Anonymous => None,
        }
    }
}

pub struct AuthResolver {
    sessions: Arc<SessionStore>,
    cookie_name: String,
    lookup_timeout: Duration,
}

impl AuthResolver {
    pub fn new(
        sessions: Arc<SessionStore>,
        cookie_name: impl Into<String>,
        lookup_timeout: Duration,
    ) -> Self {
        Self {
            sessions,
            cookie_name: cookie_name.into(),
            lookup_timeout,
        }
    }

    /// Resolve the raw `Cookie` header of a handshake.
    pub async fn resolve(&self, cookie_header: Option<&str>) -> ResolvedIdentity {
        let Some(token) = cookie_header.and_then(|h| cookie_value(h, &self.cookie_name)) else {
            return ResolvedIdentity::Anonymous;
        };

        match tokio::time::timeout(self.lookup_timeout, self.sessions.get(token)).await {
            Ok(Ok(Some(session))) => ResolvedIdentity::Authenticated {
                team: session.team().map(str::to_string),
                identity: session.identity,
            },
            Ok(Ok(None)) => ResolvedIdentity::Anonymous,
            Ok(Err(err)) => {
                tracing::warn!(%err, "session lookup failed, continuing as anonymous");
                ResolvedIdentity::Anonymous
            }
            Err(_elapsed) => {
                tracing::warn!(
                    timeout_ms = self.lookup_timeout.as_millis() as u64,
                    "session lookup timed out, continuing as anonymous"
                );
                ResolvedIdentity::Anonymous
            }
        }
    }

    /// Resolve from request headers. HTTP/2 clients may split cookies over
    /// several header lines, so all of them are considered.
    pub async fn resolve_headers(&self, headers: &HeaderMap) -> ResolvedIdentity {
        let joined = cookie_header(headers);
        self.resolve(joined.as_deref()).await
    }
}

/// Join every `Cookie` header line into one `name=value; ...` string.
pub fn cookie_header(headers: &HeaderMap) -> Option<String> {
    let parts: Vec<&str> = headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("; "))
    }
}

/// Look up `name` in a `name=value; name=value` cookie string.
///
/// Returns `None` for a missing or empty value. Surrounding double quotes
/// are stripped.
pub fn cookie_value<'a>(header: &'a str, name: &str) -> Option<&'a str> {
    header
        .split(';')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| key.trim() == name)
        .map(|(_, value)| value.trim().trim_matches('"'))
        .filter(|value| !value.is_empty())
}
