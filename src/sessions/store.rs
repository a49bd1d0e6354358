//! Refresh session store with reuse detection.
//!
//! Each refresh token is single use. Presenting the current token rotates
//! it atomically. Presenting a token this session already consumed is
//! treated as evidence that it was stolen and revokes the whole session.
//! Any other secret is rejected as malformed and leaves the session alone,
//! since the session id itself is not secret.
//!
//! With a non-zero reuse grace, presenting the immediately previous token
//! within the grace window after a rotation is rejected without revoking.

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, field, info, instrument, warn};

use super::models::{ClientMetadata, RefreshSession, RefreshToken};
use super::repository::RefreshSessionRepository;
use crate::clock::SharedClock;
use crate::config::TokenConfig;
use crate::crypto;
use crate::errors::{Error, Result};
use crate::monitor::{SecurityEventKind, SecurityLog};
use crate::storage::DbPool;

pub const REASON_REUSE_DETECTED: &str = "reuse_detected";
pub const REASON_LOGOUT: &str = "logout";

#[derive(Debug, Clone)]
pub struct RefreshSettings {
    /// Sliding lifetime, renewed on every rotation
    pub ttl: Duration,
    pub reuse_grace: Duration,
}

impl From<&TokenConfig> for RefreshSettings {
    fn from(config: &TokenConfig) -> Self {
        Self { ttl: config.refresh_ttl(), reuse_grace: config.refresh_reuse_grace() }
    }
}

/// A session together with the token that currently unlocks it.
#[derive(Debug, Clone)]
pub struct IssuedRefresh {
    pub session: RefreshSession,
    pub token: RefreshToken,
}

pub struct RefreshSessionStore {
    repository: RefreshSessionRepository,
    clock: SharedClock,
    events: SecurityLog,
    settings: RefreshSettings,
}

impl RefreshSessionStore {
    pub fn new(pool: DbPool, clock: SharedClock, events: SecurityLog, settings: RefreshSettings) -> Self {
        Self { repository: RefreshSessionRepository::new(pool), clock, events, settings }
    }

    /// Start a session at login.
    #[instrument(skip(self, scopes, client_metadata), fields(user_id = %user_id))]
    pub async fn create(
        &self,
        user_id: &str,
        scopes: Vec<String>,
        client_metadata: ClientMetadata,
    ) -> Result<IssuedRefresh> {
        if user_id.trim().is_empty() {
            return Err(Error::validation_field("user id cannot be empty", "user_id"));
        }
        let now = self.clock.now();
        let session_id = RefreshToken::new_session_id();
        let token = RefreshToken::issue(&session_id)?;
        let session = RefreshSession {
            session_id,
            user_id: user_id.to_string(),
            rotation_hash: token.rotation_hash(),
            previous_rotation_hash: None,
            scopes,
            client_metadata,
            issued_at: now,
            last_rotated_at: now,
            expires_at: now + self.settings.ttl,
            revoked_at: None,
            revoke_reason: None,
            version: 1,
        };
        self.repository.insert(&session).await?;
        info!(session_id = %session.session_id, "Created refresh session");
        Ok(IssuedRefresh { session, token })
    }

    /// Exchange the presented refresh token for a new one.
    #[instrument(skip(self, presented), fields(session_id = field::Empty))]
    pub async fn rotate(&self, presented: &str) -> Result<IssuedRefresh> {
        let old = RefreshToken::parse(presented)?;
        tracing::Span::current().record("session_id", old.session_id.as_str());

        let now = self.clock.now();
        let presented_hash = old.rotation_hash();
        let next = RefreshToken::issue(&old.session_id)?;
        let rotated = self
            .repository
            .compare_and_rotate(
                &old.session_id,
                &presented_hash,
                &next.rotation_hash(),
                now,
                now + self.settings.ttl,
            )
            .await?;

        if rotated {
            let session = self.repository.get(&old.session_id).await?.ok_or_else(|| {
                Error::internal(format!("refresh session '{}' vanished after rotation", old.session_id))
            })?;
            return Ok(IssuedRefresh { session, token: next });
        }

        Err(self.classify_failed_rotation(&old.session_id, &presented_hash, now).await?)
    }

    /// Work out why the compare-and-swap matched no row. Returns the error
    /// to hand back; revokes the session on reuse.
    async fn classify_failed_rotation(
        &self,
        session_id: &str,
        presented_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Error> {
        let Some(session) = self.repository.get(session_id).await? else {
            return Ok(Error::token_malformed("unknown refresh session"));
        };
        if let Some(reason) = &session.revoke_reason {
            return Ok(Error::session_revoked(reason.clone()));
        }
        if session.revoked_at.is_some() {
            return Ok(Error::session_revoked("revoked"));
        }
        if session.expires_at <= now {
            return Ok(Error::TokenExpired);
        }

        let matched_previous = session
            .previous_rotation_hash
            .as_deref()
            .is_some_and(|previous| crypto::constant_time_eq(previous.as_bytes(), presented_hash.as_bytes()));
        if !matched_previous && !self.repository.was_consumed(session_id, presented_hash).await? {
            debug!(session_id = %session.session_id, "Refresh secret was never issued for this session");
            return Ok(Error::token_malformed("refresh token not issued for this session"));
        }

        if matched_previous
            && self.settings.reuse_grace > Duration::zero()
            && now - session.last_rotated_at <= self.settings.reuse_grace
        {
            self.events.record_kind(
                SecurityEventKind::RefreshRaceTolerated,
                [("session_id", session.session_id.clone()), ("user_id", session.user_id.clone())],
            );
            return Ok(Error::ReplayDetected("refresh token already rotated".to_string()));
        }

        let revoked = self.repository.revoke(&session.session_id, REASON_REUSE_DETECTED, now).await?;
        self.events.record_kind(
            SecurityEventKind::RefreshTokenReuse,
            [
                ("session_id", session.session_id.clone()),
                ("user_id", session.user_id.clone()),
                ("matched_previous", matched_previous.to_string()),
                ("revoked", revoked.to_string()),
            ],
        );
        warn!(
            session_id = %session.session_id,
            user_id = %session.user_id,
            "Refresh token reuse detected; session revoked"
        );
        Ok(Error::session_revoked(REASON_REUSE_DETECTED))
    }

    /// Revoke the session a refresh token belongs to. Only a token the
    /// session actually issued revokes it; malformed, unknown, foreign or
    /// already revoked tokens succeed without effect.
    #[instrument(skip(self, presented))]
    pub async fn logout(&self, presented: &str) -> Result<()> {
        let Ok(token) = RefreshToken::parse(presented) else {
            return Ok(());
        };
        let Some(session) = self.repository.get(&token.session_id).await? else {
            return Ok(());
        };
        let presented_hash = token.rotation_hash();
        let issued = crypto::constant_time_eq(session.rotation_hash.as_bytes(), presented_hash.as_bytes())
            || self.repository.was_consumed(&session.session_id, &presented_hash).await?;
        if !issued {
            debug!(session_id = %session.session_id, "Logout with a secret this session never issued ignored");
            return Ok(());
        }
        self.revoke(&session.session_id, REASON_LOGOUT).await?;
        Ok(())
    }

    /// Returns whether the session was live before this call.
    pub async fn revoke(&self, session_id: &str, reason: &str) -> Result<bool> {
        let revoked = self.repository.revoke(session_id, reason, self.clock.now()).await?;
        if revoked {
            self.events.record_kind(
                SecurityEventKind::SessionRevoked,
                [("session_id", session_id.to_string()), ("reason", reason.to_string())],
            );
        }
        Ok(revoked)
    }

    /// Revoke every live session of a user.
    #[instrument(skip(self))]
    pub async fn revoke_user(&self, user_id: &str, reason: &str) -> Result<u64> {
        let count = self.repository.revoke_user(user_id, reason, self.clock.now()).await?;
        self.events.record_kind(
            SecurityEventKind::UserSessionsRevoked,
            [
                ("user_id", user_id.to_string()),
                ("reason", reason.to_string()),
                ("sessions", count.to_string()),
            ],
        );
        Ok(count)
    }

    pub async fn get(&self, session_id: &str) -> Result<Option<RefreshSession>> {
        self.repository.get(session_id).await
    }

    pub async fn active_sessions_for_user(&self, user_id: &str) -> Result<i64> {
        self.repository.count_active_for_user(user_id, self.clock.now()).await
    }

    /// Drop rows that finished more than `retention` ago.
    pub async fn purge_finished(&self, retention: Duration) -> Result<u64> {
        self.repository.delete_finished_before(self.clock.now() - retention).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::sessions::SessionState;
    use crate::storage::create_memory_pool;
    use std::sync::Arc;

    async fn store_with(grace: Duration) -> (Arc<RefreshSessionStore>, Arc<ManualClock>, SecurityLog) {
        let pool = create_memory_pool().await.unwrap();
        let clock = ManualClock::starting_now();
        let events = SecurityLog::new(clock.clone(), 64);
        let settings = RefreshSettings { ttl: Duration::days(14), reuse_grace: grace };
        let store = RefreshSessionStore::new(pool, clock.clone(), events.clone(), settings);
        (Arc::new(store), clock, events)
    }

    fn wire(issued: &IssuedRefresh) -> String {
        issued.token.to_secret_string().expose_secret().to_string()
    }

    #[tokio::test]
    async fn test_rotation_replaces_token() {
        let (store, _clock, _events) = store_with(Duration::zero()).await;
        let r1 = store.create("user-1", vec!["journal.read".into()], ClientMetadata::new()).await.unwrap();
        let r2 = store.rotate(&wire(&r1)).await.unwrap();

        assert_eq!(r2.session.session_id, r1.session.session_id);
        assert_ne!(wire(&r1), wire(&r2));
        assert_eq!(r2.session.version, 2);
        assert_eq!(r2.session.scopes, vec!["journal.read".to_string()]);
        assert!(store.rotate(&wire(&r2)).await.is_ok());
    }

    #[tokio::test]
    async fn test_reuse_revokes_session() {
        let (store, clock, events) = store_with(Duration::zero()).await;
        let r1 = store.create("user-1", vec![], ClientMetadata::new()).await.unwrap();
        let r2 = store.rotate(&wire(&r1)).await.unwrap();

        let err = store.rotate(&wire(&r1)).await.unwrap_err();
        assert!(matches!(&err, Error::SessionRevoked { reason } if reason == REASON_REUSE_DETECTED));
        assert_eq!(err.status_code(), 401);
        assert_eq!(events.count(SecurityEventKind::RefreshTokenReuse), 1);

        let session = store.get(&r1.session.session_id).await.unwrap().unwrap();
        assert_eq!(session.state(clock.now()), SessionState::Revoked);
        assert!(store.rotate(&wire(&r2)).await.is_err(), "thief and owner both lose the session");
        assert_eq!(events.count(SecurityEventKind::RefreshTokenReuse), 1);
    }

    #[tokio::test]
    async fn test_grace_window_tolerates_previous_token() {
        let (store, clock, events) = store_with(Duration::seconds(10)).await;
        let r1 = store.create("user-1", vec![], ClientMetadata::new()).await.unwrap();
        let r2 = store.rotate(&wire(&r1)).await.unwrap();

        clock.advance(Duration::seconds(5));
        assert!(matches!(store.rotate(&wire(&r1)).await, Err(Error::ReplayDetected(_))));
        assert_eq!(events.count(SecurityEventKind::RefreshRaceTolerated), 1);
        assert!(store.rotate(&wire(&r2)).await.is_ok());
    }

    #[tokio::test]
    async fn test_grace_window_elapsed_is_reuse() {
        let (store, clock, _events) = store_with(Duration::seconds(10)).await;
        let r1 = store.create("user-1", vec![], ClientMetadata::new()).await.unwrap();
        store.rotate(&wire(&r1)).await.unwrap();

        clock.advance(Duration::seconds(11));
        assert!(matches!(store.rotate(&wire(&r1)).await, Err(Error::SessionRevoked { .. })));
    }

    #[tokio::test]
    async fn test_concurrent_rotations_single_winner() {
        let (store, _clock, _events) = store_with(Duration::zero()).await;
        let r1 = store.create("user-1", vec![], ClientMetadata::new()).await.unwrap();
        let token = wire(&r1);

        let (a, b) = tokio::join!(store.rotate(&token), store.rotate(&token));
        assert_eq!([a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count(), 1);
    }

    #[tokio::test]
    async fn test_expired_session() {
        let (store, clock, events) = store_with(Duration::zero()).await;
        let r1 = store.create("user-1", vec![], ClientMetadata::new()).await.unwrap();
        clock.advance(Duration::days(15));

        assert!(matches!(store.rotate(&wire(&r1)).await, Err(Error::TokenExpired)));
        assert_eq!(events.count(SecurityEventKind::RefreshTokenReuse), 0);
    }

    #[tokio::test]
    async fn test_logout_is_idempotent() {
        let (store, clock, events) = store_with(Duration::zero()).await;
        let r1 = store.create("user-1", vec![], ClientMetadata::new()).await.unwrap();

        store.logout(&wire(&r1)).await.unwrap();
        store.logout(&wire(&r1)).await.unwrap();
        store.logout("garbage").await.unwrap();

        let session = store.get(&r1.session.session_id).await.unwrap().unwrap();
        assert_eq!(session.state(clock.now()), SessionState::Revoked);
        assert_eq!(session.revoke_reason.as_deref(), Some(REASON_LOGOUT));
        assert_eq!(events.count(SecurityEventKind::SessionRevoked), 1);
        assert!(matches!(store.rotate(&wire(&r1)).await, Err(Error::SessionRevoked { .. })));
    }

    #[tokio::test]
    async fn test_revoke_user() {
        let (store, _clock, _events) = store_with(Duration::zero()).await;
        store.create("user-1", vec![], ClientMetadata::new()).await.unwrap();
        store.create("user-1", vec![], ClientMetadata::new()).await.unwrap();
        let other = store.create("user-2", vec![], ClientMetadata::new()).await.unwrap();

        assert_eq!(store.revoke_user("user-1", "breach").await.unwrap(), 2);
        assert_eq!(store.active_sessions_for_user("user-1").await.unwrap(), 0);
        assert!(store.rotate(&wire(&other)).await.is_ok());
    }

    #[tokio::test]
    async fn test_unknown_session_is_malformed() {
        let (store, _clock, _events) = store_with(Duration::zero()).await;
        let forged = RefreshToken::issue("nope").unwrap();
        let raw = forged.to_secret_string().expose_secret().to_string();
        assert!(matches!(store.rotate(&raw).await, Err(Error::TokenMalformed(_))));
    }

    fn forged(issued: &IssuedRefresh) -> String {
        format!("rt.{}.attacker-guess", issued.session.session_id)
    }

    #[tokio::test]
    async fn test_forged_secret_does_not_revoke() {
        let (store, clock, events) = store_with(Duration::zero()).await;
        let r1 = store.create("victim", vec![], ClientMetadata::new()).await.unwrap();

        assert!(matches!(store.rotate(&forged(&r1)).await, Err(Error::TokenMalformed(_))));
        let session = store.get(&r1.session.session_id).await.unwrap().unwrap();
        assert_eq!(session.state(clock.now()), SessionState::Active);
        assert_eq!(events.count(SecurityEventKind::RefreshTokenReuse), 0);

        let r2 = store.rotate(&wire(&r1)).await.unwrap();
        assert!(matches!(store.rotate(&forged(&r2)).await, Err(Error::TokenMalformed(_))));
        assert!(store.rotate(&wire(&r2)).await.is_ok());
    }

    #[tokio::test]
    async fn test_older_consumed_token_is_reuse() {
        let (store, _clock, events) = store_with(Duration::zero()).await;
        let r1 = store.create("user-1", vec![], ClientMetadata::new()).await.unwrap();
        let r2 = store.rotate(&wire(&r1)).await.unwrap();
        store.rotate(&wire(&r2)).await.unwrap();

        assert!(matches!(store.rotate(&wire(&r1)).await, Err(Error::SessionRevoked { .. })));
        assert_eq!(events.count(SecurityEventKind::RefreshTokenReuse), 1);
    }

    #[tokio::test]
    async fn test_logout_requires_an_issued_secret() {
        let (store, clock, events) = store_with(Duration::zero()).await;
        let r1 = store.create("victim", vec![], ClientMetadata::new()).await.unwrap();

        store.logout(&forged(&r1)).await.unwrap();
        let session = store.get(&r1.session.session_id).await.unwrap().unwrap();
        assert_eq!(session.state(clock.now()), SessionState::Active);
        assert_eq!(events.count(SecurityEventKind::SessionRevoked), 0);
        assert!(store.rotate(&wire(&r1)).await.is_ok());
    }

    #[tokio::test]
    async fn test_purge_drops_history_of_finished_sessions() {
        let (store, clock, _events) = store_with(Duration::zero()).await;
        let r1 = store.create("user-1", vec![], ClientMetadata::new()).await.unwrap();
        store.rotate(&wire(&r1)).await.unwrap();
        store.logout(&wire(&r1)).await.unwrap();

        clock.advance(Duration::days(1));
        assert_eq!(store.purge_finished(Duration::hours(1)).await.unwrap(), 1);
        assert!(!store.repository.was_consumed(&r1.session.session_id, &r1.token.rotation_hash()).await.unwrap());
    }
}
