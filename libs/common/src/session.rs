//! Session records shared between the login flow and the event gateway.
//!
//! The login service writes these into the shared key-value store; the
//! gateway only ever reads them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Key-value namespace for session records.
pub const SESSION_KEY_PREFIX: &str = "hackbox:session:";

/// Build the storage key for a session token.
pub fn session_key(token: &str) -> String {
    format!("{SESSION_KEY_PREFIX}{token}")
}

/// Canonical form of a team name: surrounding whitespace removed, blank
/// names mean no team.
pub fn normalize_team(team: &str) -> Option<&str> {
    Some(team.trim()).filter(|t| !t.is_empty())
}

/// Who a session belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    pub display_name: String,
}

/// A live session bound to an opaque token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub token: String,
    pub identity: Identity,
    /// Team the user plays for. Organisers and spectators have none.
    #[serde(default)]
    pub team: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn new(token: String, identity: Identity, team: Option<String>) -> Self {
        Self {
            token,
            identity,
            team: team.as_deref().and_then(normalize_team).map(str::to_string),
            created_at: Utc::now(),
        }
    }

    /// The team as a broadcast-group key, in canonical form.
    pub fn team(&self) -> Option<&str> {
        self.team.as_deref().and_then(normalize_team)
    }
}
