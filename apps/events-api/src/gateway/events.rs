//! Gateway opcodes, event names, and wire-format messages.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Opcodes
// ---------------------------------------------------------------------------

pub const OP_DISPATCH: u8 = 0;
pub const OP_HEARTBEAT: u8 = 1;
pub const OP_HEARTBEAT_ACK: u8 = 6;
pub const OP_RECONNECT: u8 = 7;

// ---------------------------------------------------------------------------
// Close codes (4000-range for application-level)
// ---------------------------------------------------------------------------

pub const CLOSE_GOING_AWAY: u16 = 1001;
pub const CLOSE_UNKNOWN_OPCODE: u16 = 4001;
pub const CLOSE_DECODE_ERROR: u16 = 4002;
pub const CLOSE_SESSION_TIMEOUT: u16 = 4009;

// ---------------------------------------------------------------------------
// Server → Client message
// ---------------------------------------------------------------------------

/// A message sent from the server to the client over WebSocket.
#[derive(Debug, Clone, Serialize)]
pub struct GatewayMessage {
    pub op: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub s: Option<u64>,
    pub d: Value,
}

impl GatewayMessage {
    /// Build a DISPATCH message (op=0).
    pub fn dispatch(event_name: &str, seq: u64, data: Value) -> Self {
        Self {
            op: OP_DISPATCH,
            t: Some(event_name.to_string()),
            s: Some(seq),
            d: data,
        }
    }

    /// Build a RECONNECT message (op=7) asking the client to connect again.
    pub fn reconnect(reason: &str) -> Self {
        Self {
            op: OP_RECONNECT,
            t: None,
            s: None,
            d: serde_json::json!({ "reason": reason }),
        }
    }

    /// Build a HEARTBEAT_ACK message (op=6).
    pub fn heartbeat_ack(seq: u64) -> Self {
        Self {
            op: OP_HEARTBEAT_ACK,
            t: None,
            s: None,
            d: serde_json::json!({ "ack": seq }),
        }
    }
}

// ---------------------------------------------------------------------------
// Client → Server message
// ---------------------------------------------------------------------------

/// A message received from the client over WebSocket.
#[derive(Debug, Deserialize)]
pub struct ClientMessage {
    pub op: u8,
    #[serde(default)]
    pub d: Value,
}

#[derive(Debug, Default, Deserialize)]
pub struct HeartbeatPayload {
    #[serde(default)]
    pub seq: u64,
}

// ---------------------------------------------------------------------------
// Dispatch event names
// ---------------------------------------------------------------------------

/// Event names the gateway itself dispatches. Producer events keep whatever
/// name they were published with.
pub struct EventName;

impl EventName {
    pub const READY: &'static str = "READY";
}
