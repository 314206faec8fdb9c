//! Session lookup over the shared key-value store.

use std::sync::Arc;

use hackbox_common::session::session_key;
use hackbox_common::{Identity, Session};

use crate::db::kv::KeyValueStore;
use crate::error::ApiError;

/// Generate an opaque random token with the given prefix.
pub fn generate_opaque_token(prefix: &str, bytes: usize) -> String {
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
    use rand::Rng;
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill(&mut buf[..]);
    format!("{}_{}", prefix, URL_SAFE_NO_PAD.encode(&buf))
}

pub fn generate_session_token() -> String {
    generate_opaque_token(hackbox_common::id::prefix::SESSION, 32)
}

/// Currently valid sessions, keyed by opaque token.
///
/// Sessions are written by the login flow and expire through the store's
/// TTL. Reads are safe from any number of connection tasks at once.
pub struct SessionStore {
    kv: Arc<dyn KeyValueStore>,
    ttl_secs: u64,
}

impl SessionStore {
    pub fn new(kv: Arc<dyn KeyValueStore>, ttl_secs: u64) -> Self {
        Self { kv, ttl_secs }
    }

    /// Resolve a token. `Ok(None)` is the normal answer for unknown or
    /// expired tokens; `Err` only when the store itself misbehaves.
    pub async fn get(&self, token: &str) -> Result<Option<Session>, ApiError> {
        if token.is_empty() {
            return Ok(None);
        }
        match self.kv.get(&session_key(token)).await? {
            Some(v) => {
                let mut session: Session = serde_json::from_str(&v).map_err(|e| {
                    tracing::error!(?e, "corrupt session record");
                    ApiError::internal("corrupt session data")
                })?;
                session.team = session.team().map(str::to_string);
                Ok(Some(session))
            }
            None => Ok(None),
        }
    }

    /// Mint a fresh token and store a session for it.
    pub async fn create(
        &self,
        identity: Identity,
        team: Option<String>,
    ) -> Result<Session, ApiError> {
        let session = Session::new(generate_session_token(), identity, team);
        self.insert(&session).await?;
        Ok(session)
    }

    /// Store a session whose token was minted elsewhere.
    pub async fn insert(&self, session: &Session) -> Result<(), ApiError> {
        let value =
            serde_json::to_string(session).map_err(|_| ApiError::internal("serialization"))?;
        self.kv
            .set_ex(&session_key(&session.token), &value, self.ttl_secs)
            .await
    }

    /// Forget a session (logout). Unknown tokens are ignored.
    pub async fn revoke(&self, token: &str) -> Result<(), ApiError> {
        self.kv.del(&session_key(token)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::kv::MemoryStore;

    fn store() -> (SessionStore, Arc<MemoryStore>) {
        let kv = Arc::new(MemoryStore::new());
        (SessionStore::new(kv.clone(), 60), kv)
    }

    fn alice() -> Identity {
        Identity {
            user_id: "usr_alice".to_string(),
            display_name: "Alice".to_string(),
        }
    }

    #[test]
    fn session_tokens_are_prefixed_and_unique() {
        let a = generate_session_token();
        let b = generate_session_token();
        assert!(a.starts_with("hbs_"));
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn create_then_get() {
        let (sessions, _) = store();
        let created = sessions
            .create(alice(), Some("red".to_string()))
            .await
            .unwrap();

        let found = sessions.get(&created.token).await.unwrap().unwrap();
        assert_eq!(found.identity, alice());
        assert_eq!(found.team(), Some("red"));
    }

    #[tokio::test]
    async fn padded_team_from_login_flow_is_trimmed() {
        let (sessions, kv) = store();
        let record = serde_json::json!({
            "token": "hbs_padded",
            "identity": { "user_id": "usr_1", "display_name": "Alice" },
            "team": "  red ",
            "created_at": "2026-01-01T00:00:00Z",
        });
        kv.set_ex(&session_key("hbs_padded"), &record.to_string(), 60)
            .await
            .unwrap();

        let found = sessions.get("hbs_padded").await.unwrap().unwrap();
        assert_eq!(found.team.as_deref(), Some("red"));
    }

    #[tokio::test]
    async fn unknown_and_empty_tokens_are_not_found() {
        let (sessions, _) = store();
        assert!(sessions.get("hbs_nope").await.unwrap().is_none());
        assert!(sessions.get("").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn revoke_removes_session() {
        let (sessions, _) = store();
        let created = sessions.create(alice(), None).await.unwrap();
        sessions.revoke(&created.token).await.unwrap();
        assert!(sessions.get(&created.token).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn corrupt_record_is_an_error() {
        let (sessions, kv) = store();
        kv.set_ex(&session_key("bad"), "not json", 60).await.unwrap();
        let err = sessions.get("bad").await.unwrap_err();
        assert_eq!(err.code, "INTERNAL_ERROR");
    }

    #[tokio::test]
    async fn externally_minted_session_is_readable() {
        let (sessions, _) = store();
        let session = Session::new("abc123".to_string(), alice(), Some("blue".to_string()));
        sessions.insert(&session).await.unwrap();
        assert_eq!(sessions.get("abc123").await.unwrap(), Some(session));
    }
}
