pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
pub mod routes;

use std::sync::Arc;

use auth::resolver::AuthResolver;
use auth::sessions::SessionStore;
use config::Config;
use db::kv::KeyValueStore;
use gateway::registry::GroupRegistry;
use tokio::sync::watch;

/// Shared application state available to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionStore>,
    pub auth: Arc<AuthResolver>,
    pub groups: Arc<GroupRegistry>,
    pub config: Arc<Config>,
    /// Flips to `true` when the server begins shutting down.
    pub shutdown: watch::Receiver<bool>,
}

impl AppState {
    pub fn new(config: Config, kv: Arc<dyn KeyValueStore>, shutdown: watch::Receiver<bool>) -> Self {
        let sessions = Arc::new(SessionStore::new(kv, config.session_ttl_secs));
        let auth = Arc::new(AuthResolver::new(
            sessions.clone(),
            config.session_cookie_name.clone(),
            config.session_lookup_timeout,
        ));
        Self {
            sessions,
            auth,
            groups: Arc::new(GroupRegistry::new()),
            config: Arc::new(config),
            shutdown,
        }
    }
}
