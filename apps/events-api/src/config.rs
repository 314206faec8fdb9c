use std::time::Duration;

/// Longest accepted heartbeat interval (10 minutes).
const MAX_HEARTBEAT_INTERVAL_MS: u64 = 10 * 60 * 1000;
/// Longest accepted session lifetime (one year).
const MAX_SESSION_TTL_SECS: u64 = 365 * 24 * 3600;

/// Events API configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port the HTTP server binds to.
    pub port: u16,
    /// Name of the cookie carrying the session token.
    pub session_cookie_name: String,
    /// Redis connection string. When unset, sessions live in process memory.
    pub redis_url: Option<String>,
    /// Lifetime of sessions created through this service.
    pub session_ttl_secs: u64,
    /// Upper bound on a single session lookup during the handshake.
    pub session_lookup_timeout: Duration,
    /// Capacity of each connection's outbound event queue.
    pub outbound_buffer: usize,
    /// Upper bound on a single WebSocket write.
    pub write_timeout: Duration,
    /// Heartbeat interval advertised to clients in READY.
    pub heartbeat_interval: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Every variable is optional; unparsable values fall back to defaults.
    pub fn from_env() -> Self {
        Self {
            port: parsed_var("PORT").unwrap_or(4100),
            session_cookie_name: std::env::var("SESSION_COOKIE_NAME")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "hackbox_session".to_string()),
            redis_url: std::env::var("REDIS_URL").ok().filter(|s| !s.is_empty()),
            session_ttl_secs: session_ttl_secs(parsed_var("SESSION_TTL_SECS")),
            session_lookup_timeout: Duration::from_millis(
                parsed_var("SESSION_LOOKUP_TIMEOUT_MS").unwrap_or(2000),
            ),
            outbound_buffer: parsed_var("OUTBOUND_BUFFER")
                .filter(|n: &usize| *n > 0)
                .unwrap_or(256),
            write_timeout: Duration::from_millis(parsed_var("WRITE_TIMEOUT_MS").unwrap_or(5000)),
            heartbeat_interval: heartbeat_interval(parsed_var("HEARTBEAT_INTERVAL_MS")),
        }
    }
}

/// Zero falls back to the default; oversized values are capped.
fn heartbeat_interval(ms: Option<u64>) -> Duration {
    let ms = ms.filter(|n| *n > 0).unwrap_or(30_000);
    Duration::from_millis(ms.min(MAX_HEARTBEAT_INTERVAL_MS))
}

fn session_ttl_secs(secs: Option<u64>) -> u64 {
    secs.unwrap_or(24 * 3600).min(MAX_SESSION_TTL_SECS)
}

fn parsed_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}
