//! Refresh sessions: opaque, single-use, rotate-on-refresh.
//!
//! ```text
//! Active ──rotate──▶ Rotated   (old row swapped for the new one atomically)
//!        ──revoke──▶ Revoked   (row deleted)
//!        ──lookup past expiry──▶ Expired (row deleted lazily)
//! ```

use std::sync::Arc;
use std::time::Duration as StdDuration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Duration, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use hris_core::{SessionId, UserId};

use crate::authorize::DEFAULT_STORAGE_TIMEOUT;
use crate::error::{AuthError, AuthResult};
use crate::store::{bounded, RefreshSessionStore};

const TOKEN_BYTES: usize = 32;

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshSession {
    pub id: SessionId,
    pub token: String,
    pub user_id: UserId,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl core::fmt::Debug for RefreshSession {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RefreshSession")
            .field("id", &self.id)
            .field("token", &"<redacted>")
            .field("user_id", &self.user_id)
            .field("expires_at", &self.expires_at)
            .field("created_at", &self.created_at)
            .finish()
    }
}

impl RefreshSession {
    pub fn new(user_id: UserId, ttl: Duration, now: DateTime<Utc>) -> Self {
        Self {
            id: SessionId::new(),
            token: generate_token(),
            user_id,
            expires_at: now + ttl,
            created_at: now,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// 256 random bits, URL-safe base64 without padding.
fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Outcome of a lookup. Expired and unknown are both terminal but kept apart
/// so callers can word their message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionLookup {
    Valid(RefreshSession),
    Expired,
    NotFound,
}

#[derive(Clone)]
pub struct RefreshSessionManager {
    store: Arc<dyn RefreshSessionStore>,
    ttl: Duration,
    timeout: StdDuration,
}

impl RefreshSessionManager {
    pub fn new(store: Arc<dyn RefreshSessionStore>, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            timeout: DEFAULT_STORAGE_TIMEOUT,
        }
    }

    pub fn with_storage_timeout(mut self, timeout: StdDuration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Start a new session. Existing sessions of the principal are untouched.
    #[instrument(skip(self), err)]
    pub async fn create(&self, user_id: UserId) -> AuthResult<RefreshSession> {
        let session = RefreshSession::new(user_id, self.ttl, Utc::now());
        bounded(self.timeout, "insert_session", self.store.insert_session(&session)).await?;
        debug!(session_id = %session.id, "refresh session created");
        Ok(session)
    }

    /// Look up `token`, deleting it if it has expired.
    pub async fn lookup(&self, token: &str) -> AuthResult<SessionLookup> {
        if token.is_empty() {
            return Ok(SessionLookup::NotFound);
        }
        let Some(session) =
            bounded(self.timeout, "find_session", self.store.find_session(token)).await?
        else {
            return Ok(SessionLookup::NotFound);
        };
        if session.is_expired_at(Utc::now()) {
            bounded(self.timeout, "take_session", self.store.take_session(token)).await?;
            debug!(session_id = %session.id, "expired refresh session removed");
            return Ok(SessionLookup::Expired);
        }
        Ok(SessionLookup::Valid(session))
    }

    /// The live session for `token`, if any.
    pub async fn find_valid(&self, token: &str) -> AuthResult<Option<RefreshSession>> {
        match self.lookup(token).await? {
            SessionLookup::Valid(session) => Ok(Some(session)),
            SessionLookup::Expired | SessionLookup::NotFound => Ok(None),
        }
    }

    /// The live session for `token`, or the error a refresh of it reports.
    pub async fn require_valid(&self, token: &str) -> AuthResult<RefreshSession> {
        match self.lookup(token).await? {
            SessionLookup::Valid(session) => Ok(session),
            SessionLookup::Expired => Err(AuthError::ExpiredRefreshToken),
            SessionLookup::NotFound => Err(AuthError::InvalidRefreshToken),
        }
    }

    /// Consume `token` and issue its replacement.
    pub async fn rotate(&self, token: &str) -> AuthResult<RefreshSession> {
        let current = self.require_valid(token).await?;
        self.commit_rotation(&current).await
    }

    /// Replace `current` with a fresh session in one store call.
    ///
    /// Only the caller whose store call removed the old row gets a replacement,
    /// so concurrent rotations of one token yield exactly one success. A failed
    /// call leaves `current` valid, so retrying is safe.
    pub async fn commit_rotation(&self, current: &RefreshSession) -> AuthResult<RefreshSession> {
        let replacement = RefreshSession::new(current.user_id, self.ttl, Utc::now());
        let rotated = bounded(
            self.timeout,
            "rotate_session",
            self.store.rotate_session(&current.token, &replacement),
        )
        .await?;
        let Some(old) = rotated else {
            debug!(session_id = %current.id, "refresh session already consumed");
            return Err(AuthError::InvalidRefreshToken);
        };
        info!(user_id = %old.user_id, old_session = %old.id, new_session = %replacement.id, "refresh session rotated");
        Ok(replacement)
    }

    /// Idempotent.
    pub async fn revoke(&self, token: &str) -> AuthResult<()> {
        if token.is_empty() {
            return Ok(());
        }
        if let Some(session) =
            bounded(self.timeout, "take_session", self.store.take_session(token)).await?
        {
            info!(user_id = %session.user_id, session_id = %session.id, "refresh session revoked");
        }
        Ok(())
    }

    /// Remove every session of `user_id`; returns how many were removed.
    pub async fn revoke_all(&self, user_id: UserId) -> AuthResult<u64> {
        let removed = bounded(
            self.timeout,
            "delete_sessions_for",
            self.store.delete_sessions_for(user_id),
        )
        .await?;
        info!(%user_id, removed, "all refresh sessions revoked");
        Ok(removed)
    }

    /// Bulk maintenance; lazy deletion on lookup remains the primary path.
    pub async fn purge_expired(&self) -> AuthResult<u64> {
        let removed =
            bounded(self.timeout, "delete_expired", self.store.delete_expired(Utc::now())).await?;
        if removed > 0 {
            info!(removed, "expired refresh sessions purged");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_256_bit_url_safe() {
        let token = generate_token();
        assert_eq!(token.len(), 43);
        assert!(token.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        assert_ne!(token, generate_token());
    }

    #[test]
    fn expiry_is_inclusive() {
        let now = Utc::now();
        let session = RefreshSession::new(UserId::new(), Duration::seconds(10), now);
        assert!(!session.is_expired_at(now + Duration::seconds(9)));
        assert!(session.is_expired_at(now + Duration::seconds(10)));
    }

    #[test]
    fn debug_hides_token() {
        let session = RefreshSession::new(UserId::new(), Duration::seconds(10), Utc::now());
        assert!(!format!("{session:?}").contains(&session.token));
    }
}
