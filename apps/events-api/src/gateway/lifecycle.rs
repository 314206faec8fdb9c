//! Connection lifecycle: `Connecting → Active → Closing → Closed`.
//!
//! Activation is the only place a connection joins its team group and
//! closing is the only place it leaves. [`Connection`] closes itself on drop,
//! so the leave also runs when the owning task errors out or panics.

use std::sync::Arc;

use parking_lot::Mutex;

use super::fanout::{outbound_channel, EventReceiver};
use super::registry::{ConnectionHandle, GroupRegistry};
use super::session::GatewaySession;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Active,
    Closing,
    Closed,
}

/// Why a connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    ClientClosed,
    TransportError,
    HeartbeatTimeout,
    ProtocolError,
    SendFailed,
    Shutdown,
    Dropped,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::ClientClosed => "client_closed",
            CloseReason::TransportError => "transport_error",
            CloseReason::HeartbeatTimeout => "heartbeat_timeout",
            CloseReason::ProtocolError => "protocol_error",
            CloseReason::SendFailed => "send_failed",
            CloseReason::Shutdown => "shutdown",
            CloseReason::Dropped => "dropped",
        }
    }
}

struct Lifecycle {
    state: ConnectionState,
    /// Released on close so the outbound queue ends once the registry has
    /// let go of its copy.
    handle: Option<ConnectionHandle>,
}

pub struct Connection {
    session: Arc<GatewaySession>,
    registry: Arc<GroupRegistry>,
    lifecycle: Mutex<Lifecycle>,
}

impl Connection {
    /// Open a connection in `Connecting`. The receiver is the connection's
    /// outbound event queue.
    pub fn open(
        registry: Arc<GroupRegistry>,
        session: GatewaySession,
        outbound_buffer: usize,
    ) -> (Self, EventReceiver) {
        let (tx, rx) = outbound_channel(outbound_buffer);
        let handle = ConnectionHandle::new(
            session.connection_id.clone(),
            session.user_id().map(str::to_string),
            tx,
        );
        let connection = Self {
            session: Arc::new(session),
            registry,
            lifecycle: Mutex::new(Lifecycle {
                state: ConnectionState::Connecting,
                handle: Some(handle),
            }),
        };
        (connection, rx)
    }

    pub fn session(&self) -> &Arc<GatewaySession> {
        &self.session
    }

    pub fn id(&self) -> &str {
        &self.session.connection_id
    }

    pub fn state(&self) -> ConnectionState {
        self.lifecycle.lock().state
    }

    /// `Connecting → Active`, joining the team group if there is one.
    ///
    /// Returns `false` if the connection was not in `Connecting`, in which
    /// case nothing is joined.
    pub fn activate(&self) -> bool {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.state != ConnectionState::Connecting {
            return false;
        }
        if let (Some(team), Some(handle)) = (self.session.team(), lifecycle.handle.as_ref()) {
            self.registry.join(team, handle.clone());
        }
        lifecycle.state = ConnectionState::Active;
        true
    }

    /// Run teardown: leave the team group and release the handle.
    ///
    /// Only the first call does anything; it returns `true`.
    pub fn close(&self, reason: CloseReason) -> bool {
        let mut lifecycle = self.lifecycle.lock();
        match lifecycle.state {
            ConnectionState::Closing | ConnectionState::Closed => return false,
            ConnectionState::Connecting | ConnectionState::Active => {}
        }
        let was_active = lifecycle.state == ConnectionState::Active;
        lifecycle.state = ConnectionState::Closing;

        // Anonymous connections leave "" which the registry ignores.
        self.registry
            .leave(self.session.team().unwrap_or_default(), self.id());
        lifecycle.handle = None;
        lifecycle.state = ConnectionState::Closed;

        tracing::debug!(
            connection_id = %self.session.connection_id,
            team = ?self.session.team(),
            was_active,
            reason = reason.as_str(),
            "connection closed"
        );
        true
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close(CloseReason::Dropped);
    }
}
