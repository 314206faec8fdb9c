//! READY construction and incoming opcode dispatch.

use std::time::Duration;

use super::events::{
    ClientMessage, EventName, GatewayMessage, HeartbeatPayload, CLOSE_DECODE_ERROR,
    CLOSE_UNKNOWN_OPCODE, OP_HEARTBEAT,
};
use super::session::GatewaySession;

/// What the event loop should do with one inbound text frame.
#[derive(Debug)]
pub enum ClientAction {
    Reply(GatewayMessage),
    Close { code: u16, reason: &'static str },
}

/// Build the READY dispatch. Consumes the session's first sequence number.
pub fn ready_message(session: &GatewaySession, heartbeat_interval: Duration) -> GatewayMessage {
    let user = session.identity.as_ref().map(|identity| {
        serde_json::json!({
            "id": identity.user_id,
            "display_name": identity.display_name,
        })
    });

    let ready_data = serde_json::json!({
        "connection_id": session.connection_id,
        "user": user,
        "team": session.team(),
        "heartbeat_interval": heartbeat_interval.as_millis() as u64,
    });

    GatewayMessage::dispatch(EventName::READY, session.next_seq(), ready_data)
}

/// Process one client text frame.
pub fn handle_client_text(text: &str) -> ClientAction {
    let client_msg: ClientMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(_) => {
            return ClientAction::Close {
                code: CLOSE_DECODE_ERROR,
                reason: "Invalid JSON",
            }
        }
    };

    match client_msg.op {
        OP_HEARTBEAT => {
            let payload: HeartbeatPayload =
                serde_json::from_value(client_msg.d).unwrap_or_default();
            ClientAction::Reply(GatewayMessage::heartbeat_ack(payload.seq))
        }
        _ => ClientAction::Close {
            code: CLOSE_UNKNOWN_OPCODE,
            reason: "Unknown opcode",
        },
    }
}
