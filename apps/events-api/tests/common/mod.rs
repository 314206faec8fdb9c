#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use futures_util::StreamExt;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use events_api::config::Config;
use events_api::db::kv::{KeyValueStore, MemoryStore};
use events_api::AppState;
use hackbox_common::Identity;

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub const COOKIE_NAME: &str = "hackbox_session";

/// Deterministic configuration, independent of the host environment.
pub fn test_config() -> Config {
    Config {
        port: 0,
        session_cookie_name: COOKIE_NAME.to_string(),
        redis_url: None,
        session_ttl_secs: 60,
        session_lookup_timeout: Duration::from_millis(500),
        outbound_buffer: 16,
        write_timeout: Duration::from_secs(2),
        heartbeat_interval: Duration::from_secs(30),
    }
}

/// Build an AppState over an in-memory session store. Keep the returned
/// sender alive for as long as shutdown should remain possible.
pub fn test_state(config: Config) -> (AppState, watch::Sender<bool>) {
    let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    (AppState::new(config, kv, shutdown_rx), shutdown_tx)
}

/// Build the full application router wired to a fresh test state.
pub fn test_app() -> (Router, AppState, watch::Sender<bool>) {
    let (state, shutdown_tx) = test_state(test_config());
    let app = events_api::routes::router().with_state(state.clone());
    (app, state, shutdown_tx)
}

/// Start an actual TCP server for WebSocket testing. The server runs in the
/// background.
pub async fn start_ws_server(config: Config) -> (SocketAddr, AppState, watch::Sender<bool>) {
    let (state, shutdown_tx) = test_state(config);
    let app = events_api::routes::router().with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (addr, state, shutdown_tx)
}

/// Store a session the way the login flow would and return its token.
pub async fn login(state: &AppState, user_id: &str, team: Option<&str>) -> String {
    let identity = Identity {
        user_id: user_id.to_string(),
        display_name: format!("User {user_id}"),
    };
    state
        .sessions
        .create(identity, team.map(str::to_string))
        .await
        .expect("create session")
        .token
}

/// Open a gateway connection, optionally presenting a session cookie.
pub async fn connect(addr: SocketAddr, token: Option<&str>) -> WsClient {
    let mut request = format!("ws://{addr}/gateway")
        .into_client_request()
        .expect("client request");
    if let Some(token) = token {
        let cookie = format!("theme=dark; {COOKIE_NAME}={token}");
        request
            .headers_mut()
            .insert(http::header::COOKIE, cookie.parse().expect("cookie header"));
    }
    let (ws, _) = tokio_tungstenite::connect_async(request)
        .await
        .expect("ws connect");
    ws
}

/// Read the next JSON text frame, skipping pings and pongs.
pub async fn next_json(ws: &mut WsClient) -> serde_json::Value {
    loop {
        let msg = time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timeout waiting for frame")
            .expect("stream ended")
            .expect("ws read error");
        match msg {
            Message::Text(text) => return serde_json::from_str(&text).expect("parse frame"),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("expected text frame, got: {other:?}"),
        }
    }
}

/// Read frames until a close frame arrives and return its code.
pub async fn next_close_code(ws: &mut WsClient) -> Option<u16> {
    loop {
        let msg = time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timeout waiting for close");
        match msg {
            Some(Ok(Message::Close(frame))) => return frame.map(|f| u16::from(f.code)),
            Some(Ok(_)) => continue,
            Some(Err(_)) | None => return None,
        }
    }
}

/// Connect and consume READY.
pub async fn connect_ready(addr: SocketAddr, token: Option<&str>) -> (WsClient, serde_json::Value) {
    let mut ws = connect(addr, token).await;
    let ready = next_json(&mut ws).await;
    assert_eq!(ready["t"], "READY");
    (ws, ready)
}

/// Poll `check` until it holds or two seconds pass.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
