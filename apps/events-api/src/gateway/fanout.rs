//! Event payloads and the per-connection outbound queue.
//!
//! Producers hand a [`GroupEvent`] to the group registry, which pushes one
//! shared `Arc` into the bounded queue of every member. Each connection task
//! drains its own queue, so a slow socket only ever backs up itself.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;

/// An event addressed to every connection of one team.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupEvent {
    /// The team this event belongs to.
    pub team: String,
    /// The dispatch event name (e.g. "SCOREBOARD_UPDATE").
    pub event_name: String,
    /// Event data, passed through to clients untouched.
    pub data: Value,
}

impl GroupEvent {
    pub fn new(team: impl Into<String>, event_name: impl Into<String>, data: Value) -> Self {
        Self {
            team: team.into(),
            event_name: event_name.into(),
            data,
        }
    }
}

pub type EventSender = mpsc::Sender<Arc<GroupEvent>>;
pub type EventReceiver = mpsc::Receiver<Arc<GroupEvent>>;

/// Create a connection's outbound queue.
pub fn outbound_channel(capacity: usize) -> (EventSender, EventReceiver) {
    mpsc::channel(capacity.max(1))
}
