//! crates/bookworm_core/src/session.rs
//!
//! Issues, resolves and revokes cookie session tokens, and handles per-session
//! owner elevation.

use chrono::{Duration, Utc};
use rand::RngCore;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::{AuthSession, Identity};
use crate::ports::{CredentialStore, PortError, PortResult, SessionStore};

/// 32 bytes = 256 bits of entropy.
const TOKEN_BYTES: usize = 32;

/// Generates an opaque, hex-encoded session token from the OS-seeded CSPRNG.
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Compares two secrets without short-circuiting on the first differing byte.
pub fn constant_time_eq(left: &str, right: &str) -> bool {
    let left_bytes = left.as_bytes();
    let right_bytes = right.as_bytes();
    if left_bytes.len() != right_bytes.len() {
        return false;
    }

    let mut diff = 0_u8;
    for (a, b) in left_bytes.iter().zip(right_bytes.iter()) {
        diff |= *a ^ *b;
    }
    diff == 0
}

#[derive(Clone)]
pub struct SessionManager {
    sessions: Arc<dyn SessionStore>,
    users: Arc<dyn CredentialStore>,
    ttl: Duration,
    owner_unlock_code: Option<String>,
}

impl SessionManager {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        users: Arc<dyn CredentialStore>,
        ttl: Duration,
        owner_unlock_code: Option<String>,
    ) -> Self {
        Self {
            sessions,
            users,
            ttl,
            owner_unlock_code: owner_unlock_code.filter(|code| !code.is_empty()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Stores a fresh session and returns its token.
    pub async fn create_session(&self, user_id: Uuid) -> PortResult<String> {
        let now = Utc::now();
        let session = AuthSession {
            token: generate_token(),
            user_id,
            is_owner: false,
            created_at: now,
            expires_at: now + self.ttl,
            last_seen_at: None,
        };
        self.sessions.create_auth_session(&session).await?;
        Ok(session.token)
    }

    /// Maps a token to its identity. Unknown and expired tokens resolve to `None`;
    /// expired rows are evicted on the way out.
    pub async fn resolve(&self, token: &str) -> PortResult<Option<Identity>> {
        if token.is_empty() {
            return Ok(None);
        }
        let Some(session) = self.sessions.get_auth_session(token).await? else {
            return Ok(None);
        };

        let now = Utc::now();
        if session.is_expired(now) {
            debug!("Session for user {} expired; evicting.", session.user_id);
            self.sessions.delete_auth_session(token).await?;
            match self.sessions.delete_expired_sessions(now).await {
                Ok(swept) if swept > 0 => debug!("Swept {} other expired sessions.", swept),
                Ok(_) => {}
                Err(e) => warn!("Failed to sweep expired sessions: {}", e),
            }
            return Ok(None);
        }

        let user = match self.users.get_user_by_id(session.user_id).await {
            Ok(user) => user,
            Err(PortError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };

        if let Err(e) = self.sessions.touch_auth_session(token, now).await {
            warn!("Failed to update last-seen for session: {}", e);
        }

        Ok(Some(Identity {
            user_id: user.user_id,
            email: user.email,
            is_owner: session.is_owner || user.is_owner,
            account_created_at: user.created_at,
        }))
    }

    pub async fn revoke(&self, token: &str) -> PortResult<()> {
        self.sessions.delete_auth_session(token).await
    }

    /// Elevates the session when `code` matches the configured unlock code.
    /// Returns whether the elevation happened.
    pub async fn unlock_owner(&self, token: &str, code: &str) -> PortResult<bool> {
        let Some(expected) = self.owner_unlock_code.as_deref() else {
            return Ok(false);
        };
        if !constant_time_eq(code.trim(), expected) {
            return Ok(false);
        }
        self.sessions.set_session_owner(token, true).await
    }

    pub async fn lock_owner(&self, token: &str) -> PortResult<()> {
        self.sessions.set_session_owner(token, false).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryStore;

    fn manager(store: &Arc<MemoryStore>, ttl: Duration, code: Option<&str>) -> SessionManager {
        SessionManager::new(
            store.clone(),
            store.clone(),
            ttl,
            code.map(str::to_string),
        )
    }

    #[test]
    fn tokens_carry_256_bits() {
        let token = generate_token();
        assert_eq!(token.len(), 64);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(token, generate_token());
    }

    #[test]
    fn constant_time_eq_matches_only_identical_input() {
        assert!(constant_time_eq("open-sesame", "open-sesame"));
        assert!(!constant_time_eq("open-sesame", "open-sesamE"));
        assert!(!constant_time_eq("short", "longer"));
    }

    #[tokio::test]
    async fn token_resolves_until_expiry_then_is_gone() {
        let store = Arc::new(MemoryStore::default());
        let user = store.add_user("u@example.com", false);
        let sessions = manager(&store, Duration::days(30), None);

        let token = sessions.create_session(user.user_id).await.unwrap();
        let identity = sessions.resolve(&token).await.unwrap().unwrap();
        assert_eq!(identity.user_id, user.user_id);
        assert!(!identity.is_owner);

        store.expire_session(&token);
        assert!(sessions.resolve(&token).await.unwrap().is_none());
        assert!(!store.has_session(&token));
        assert!(sessions.resolve(&token).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn revoke_is_idempotent() {
        let store = Arc::new(MemoryStore::default());
        let user = store.add_user("u@example.com", false);
        let sessions = manager(&store, Duration::days(1), None);

        let token = sessions.create_session(user.user_id).await.unwrap();
        sessions.revoke(&token).await.unwrap();
        sessions.revoke(&token).await.unwrap();
        assert!(sessions.resolve(&token).await.unwrap().is_none());
        assert!(sessions.resolve("not-a-token").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn owner_unlock_is_per_session() {
        let store = Arc::new(MemoryStore::default());
        let user = store.add_user("u@example.com", false);
        let sessions = manager(&store, Duration::days(1), Some("letmein"));

        let first = sessions.create_session(user.user_id).await.unwrap();
        assert!(!sessions.unlock_owner(&first, "wrong").await.unwrap());
        assert!(sessions.unlock_owner(&first, "letmein").await.unwrap());
        assert!(sessions.resolve(&first).await.unwrap().unwrap().is_owner);

        let second = sessions.create_session(user.user_id).await.unwrap();
        assert!(!sessions.resolve(&second).await.unwrap().unwrap().is_owner);

        sessions.lock_owner(&first).await.unwrap();
        assert!(!sessions.resolve(&first).await.unwrap().unwrap().is_owner);
    }

    #[tokio::test]
    async fn unlock_without_configured_code_never_matches() {
        let store = Arc::new(MemoryStore::default());
        let user = store.add_user("u@example.com", false);
        let sessions = manager(&store, Duration::days(1), Some(""));
        let token = sessions.create_session(user.user_id).await.unwrap();
        assert!(!sessions.unlock_owner(&token, "").await.unwrap());
    }

    #[tokio::test]
    async fn persistent_owner_flag_is_reported() {
        let store = Arc::new(MemoryStore::default());
        let owner = store.add_user("boss@example.com", true);
        let sessions = manager(&store, Duration::days(1), None);
        let token = sessions.create_session(owner.user_id).await.unwrap();
        assert!(sessions.resolve(&token).await.unwrap().unwrap().is_owner);
    }
}
