//! Per-connection gateway session state.

use std::sync::atomic::{AtomicU64, Ordering};

use hackbox_common::{normalize_team, Identity};

use crate::auth::resolver::ResolvedIdentity;

/// Everything known about one WebSocket connection, fixed at handshake.
///
/// Team affiliation never changes for the life of the connection.
pub struct GatewaySession {
    /// Unique connection identifier (`conn_` prefixed ULID).
    pub connection_id: String,
    /// Resolved identity, `None` for anonymous connections.
    pub identity: Option<Identity>,
    /// Team broadcast group, `None` for anonymous or team-less users.
    team: Option<String>,
    /// Monotonically increasing sequence number for dispatch events.
    seq: AtomicU64,
}

impl GatewaySession {
    pub fn new(connection_id: String, resolved: ResolvedIdentity) -> Self {
        let (identity, team) = match resolved {
            ResolvedIdentity::Authenticated { identity, team } => {
                let team = team.as_deref().and_then(normalize_team).map(str::to_string);
                (Some(identity), team)
            }
            ResolvedIdentity::Anonymous => (None, None),
        };
        Self {
            connection_id,
            identity,
            team,
            seq: AtomicU64::new(0),
        }
    }

    pub fn team(&self) -> Option<&str> {
        self.team.as_deref()
    }

    pub fn user_id(&self) -> Option<&str> {
        self.identity.as_ref().map(|i| i.user_id.as_str())
    }

    /// Get the next sequence number for a dispatch event.
    pub fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed) + 1
    }
}
