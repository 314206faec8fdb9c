//! WebSocket upgrade handler and per-connection event loop.

use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::time::{self, Instant, MissedTickBehavior};

use hackbox_common::id::{prefix, prefixed_ulid};

use crate::auth::resolver::ResolvedIdentity;
use crate::AppState;

use super::events::{GatewayMessage, CLOSE_GOING_AWAY, CLOSE_SESSION_TIMEOUT};
use super::fanout::EventReceiver;
use super::handler::{handle_client_text, ready_message, ClientAction};
use super::lifecycle::{CloseReason, Connection};
use super::session::GatewaySession;

type WsSink = SplitSink<WebSocket, Message>;
type WsStream = SplitStream<WebSocket>;

pub fn router() -> Router<AppState> {
    Router::new().route("/gateway", get(ws_upgrade))
}

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> impl IntoResponse {
    // Identity is fixed before the upgrade completes.
    let resolved = state.auth.resolve_headers(&headers).await;
    ws.on_upgrade(move |socket| handle_connection(socket, state, resolved))
}

async fn handle_connection(socket: WebSocket, state: AppState, resolved: ResolvedIdentity) {
    let (mut ws_tx, ws_rx) = socket.split();

    let session = GatewaySession::new(prefixed_ulid(prefix::CONNECTION), resolved);
    let (connection, events_rx) =
        Connection::open(state.groups.clone(), session, state.config.outbound_buffer);
    if !connection.activate() {
        return;
    }
    let session = connection.session().clone();

    tracing::info!(
        connection_id = %session.connection_id,
        user_id = ?session.user_id(),
        team = ?session.team(),
        "gateway session established"
    );

    let ready = ready_message(&session, state.config.heartbeat_interval);
    let reason = match send_json(&mut ws_tx, &ready, state.config.write_timeout).await {
        Ok(()) => run_session(&session, &mut ws_tx, ws_rx, events_rx, &state).await,
        Err(reason) => reason,
    };

    connection.close(reason);

    tracing::info!(
        connection_id = %session.connection_id,
        user_id = ?session.user_id(),
        team = ?session.team(),
        reason = reason.as_str(),
        "gateway session ended"
    );
}

/// Main session event loop: read client frames, forward team events, enforce
/// liveness, and honour shutdown. Returns why the connection ended.
async fn run_session(
    session: &GatewaySession,
    ws_tx: &mut WsSink,
    mut ws_rx: WsStream,
    mut events_rx: EventReceiver,
    state: &AppState,
) -> CloseReason {
    let write_timeout = state.config.write_timeout;
    let interval = state.config.heartbeat_interval;
    let silence_limit = liveness_window(interval);

    let mut heartbeat_timer = time::interval(interval);
    heartbeat_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    heartbeat_timer.tick().await; // First tick fires immediately; skip it.
    let mut last_seen = Instant::now();

    let mut shutdown = state.shutdown.clone();
    let mut watching_shutdown = true;

    loop {
        tokio::select! {
            // Client sends us a frame.
            msg = ws_rx.next() => {
                let msg = match msg {
                    Some(Ok(m)) => m,
                    Some(Err(e)) => {
                        tracing::debug!(?e, connection_id = %session.connection_id, "ws read error");
                        return CloseReason::TransportError;
                    }
                    None => return CloseReason::ClientClosed,
                };
                last_seen = Instant::now();

                match msg {
                    Message::Text(text) => match handle_client_text(text.as_str()) {
                        ClientAction::Reply(reply) => {
                            if let Err(reason) = send_json(ws_tx, &reply, write_timeout).await {
                                return reason;
                            }
                        }
                        ClientAction::Close { code, reason } => {
                            tracing::debug!(
                                connection_id = %session.connection_id,
                                code,
                                reason,
                                "closing on protocol error"
                            );
                            let _ = send_close(ws_tx, code, reason, write_timeout).await;
                            return CloseReason::ProtocolError;
                        }
                    },
                    Message::Close(_) => return CloseReason::ClientClosed,
                    Message::Ping(_) | Message::Pong(_) | Message::Binary(_) => continue,
                }
            }

            // Team event pushed by the group registry.
            event = events_rx.recv() => {
                let Some(event) = event else {
                    return CloseReason::Dropped;
                };
                let msg = GatewayMessage::dispatch(&event.event_name, session.next_seq(), event.data.clone());
                if let Err(reason) = send_json(ws_tx, &msg, write_timeout).await {
                    return reason;
                }
            }

            // Liveness check and server ping.
            _ = heartbeat_timer.tick() => {
                if last_seen.elapsed() > silence_limit {
                    tracing::debug!(
                        connection_id = %session.connection_id,
                        "heartbeat timeout, closing connection"
                    );
                    let _ = send_close(ws_tx, CLOSE_SESSION_TIMEOUT, "Heartbeat timeout", write_timeout).await;
                    return CloseReason::HeartbeatTimeout;
                }
                if let Err(reason) = send_frame(ws_tx, Message::Ping(Default::default()), write_timeout).await {
                    return reason;
                }
            }

            changed = shutdown.changed(), if watching_shutdown => {
                if changed.is_err() {
                    // Sender gone; nobody can ask us to stop any more.
                    watching_shutdown = false;
                    continue;
                }
                let stopping = *shutdown.borrow_and_update();
                if stopping {
                    let reconnect = GatewayMessage::reconnect("server shutting down");
                    let _ = send_json(ws_tx, &reconnect, write_timeout).await;
                    let _ = send_close(ws_tx, CLOSE_GOING_AWAY, "Server shutting down", write_timeout).await;
                    return CloseReason::Shutdown;
                }
            }
        }
    }
}

/// A client must show some sign of life within 1.5× the heartbeat interval.
fn liveness_window(interval: Duration) -> Duration {
    interval.saturating_mul(3) / 2
}

async fn send_json(
    ws_tx: &mut WsSink,
    msg: &GatewayMessage,
    write_timeout: Duration,
) -> Result<(), CloseReason> {
    let json = serde_json::to_string(msg).map_err(|e| {
        tracing::error!(?e, "failed to encode gateway message");
        CloseReason::ProtocolError
    })?;
    send_frame(ws_tx, Message::Text(json.into()), write_timeout).await
}

/// Write one frame, giving up after `write_timeout`.
async fn send_frame(
    ws_tx: &mut WsSink,
    frame: Message,
    write_timeout: Duration,
) -> Result<(), CloseReason> {
    match time::timeout(write_timeout, ws_tx.send(frame)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            tracing::debug!(?e, "ws write error");
            Err(CloseReason::TransportError)
        }
        Err(_) => {
            tracing::warn!(timeout_ms = write_timeout.as_millis() as u64, "ws write timed out");
            Err(CloseReason::SendFailed)
        }
    }
}

/// Send a WebSocket close frame with a code and reason.
async fn send_close(
    ws_tx: &mut WsSink,
    code: u16,
    reason: &str,
    write_timeout: Duration,
) -> Result<(), CloseReason> {
    let close_msg = Message::Close(Some(CloseFrame {
        code,
        reason: reason.to_string().into(),
    }));
    send_frame(ws_tx, close_msg, write_timeout).await
}
