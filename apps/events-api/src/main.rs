use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use events_api::config::Config;
use events_api::db::kv::{KeyValueStore, MemoryStore, RedisStore};
use events_api::AppState;

/// How often the in-memory session store drops expired entries.
const MEMORY_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() {
    // Load .env file (silently skip if missing — env vars may be set externally)
    if dotenvy::dotenv().is_err() {
        let env_path = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(env_path);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    let port = config.port;

    let kv: Arc<dyn KeyValueStore> = match config.redis_url.as_deref() {
        Some(url) => {
            let store = RedisStore::connect(url)
                .await
                .expect("failed to connect to Redis");
            tracing::info!("session store: redis");
            Arc::new(store)
        }
        None => {
            let store = Arc::new(MemoryStore::new());
            spawn_memory_sweeper(store.clone());
            tracing::info!("session store: in-memory");
            store
        }
    };

    tracing::info!(
        cookie = %config.session_cookie_name,
        heartbeat_ms = config.heartbeat_interval.as_millis() as u64,
        outbound_buffer = config.outbound_buffer,
        "events-api configured"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let state = AppState::new(config, kv, shutdown_rx);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .merge(events_api::routes::router())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(%addr, "events-api listening");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("failed to bind");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown requested, closing gateway connections");
            let _ = shutdown_tx.send(true);
        })
        .await
        .expect("server error");
}

fn spawn_memory_sweeper(store: Arc<MemoryStore>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(MEMORY_SWEEP_INTERVAL);
        loop {
            interval.tick().await;
            let purged = store.purge_expired();
            if purged > 0 {
                tracing::debug!(purged, "expired sessions purged");
            }
        }
    });
}
