//! Security monitor: health reporting and incident-response controls.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::events::{SecurityEvent, SecurityEventKind, Severity};
use super::log::SecurityLog;
use crate::errors::{Error, Result};
use crate::keys::{KeyRotationService, KeyStatus, KeyType, RotationOutcome};
use crate::secrets::{BreakerState, SecretsClient};
use crate::sessions::RefreshSessionStore;

pub const REASON_CONTAINMENT: &str = "containment";

/// What `invalidate_cache` evicts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum CacheScope {
    /// Every cached secret
    Secrets,
    /// One cached secret
    SecretPath { path: String },
    /// Every refresh session of one user
    UserSessions { user_id: String },
    /// Every cached secret
    All,
}

impl CacheScope {
    fn label(&self) -> &'static str {
        match self {
            CacheScope::Secrets => "secrets",
            CacheScope::SecretPath { .. } => "secret_path",
            CacheScope::UserSessions { .. } => "user_sessions",
            CacheScope::All => "all",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidationReport {
    pub secrets_evicted: usize,
    pub sessions_revoked: u64,
    pub incident_id: Uuid,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretsStatus {
    pub backend: &'static str,
    pub breaker: BreakerState,
    pub breaker_opened_at: Option<DateTime<Utc>>,
    pub emergency_mode: bool,
    pub cached_entries: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorStatus {
    pub generated_at: DateTime<Utc>,
    pub secrets: SecretsStatus,
    pub keys: Vec<KeyStatus>,
    /// Events by severity over the last hour
    pub recent_events: BTreeMap<Severity, u64>,
    pub latest_critical: Vec<SecurityEvent>,
}

pub struct SecurityMonitor {
    log: SecurityLog,
    secrets: Arc<SecretsClient>,
    keys: Arc<KeyRotationService>,
    sessions: Arc<RefreshSessionStore>,
}

impl std::fmt::Debug for SecurityMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityMonitor").field("log", &self.log).finish_non_exhaustive()
    }
}

impl SecurityMonitor {
    pub fn new(
        log: SecurityLog,
        secrets: Arc<SecretsClient>,
        keys: Arc<KeyRotationService>,
        sessions: Arc<RefreshSessionStore>,
    ) -> Self {
        Self { log, secrets, keys, sessions }
    }

    pub fn log(&self) -> &SecurityLog {
        &self.log
    }

    pub fn record(&self, event: SecurityEvent) -> Uuid {
        self.log.record(event)
    }

    pub fn recent_events(&self, limit: usize) -> Vec<SecurityEvent> {
        self.log.recent(limit)
    }

    pub fn status(&self) -> MonitorStatus {
        let now = self.log.now();
        let latest_critical = self
            .log
            .recent(256)
            .into_iter()
            .filter(|e| e.severity == Severity::Critical)
            .take(10)
            .collect();
        MonitorStatus {
            generated_at: now,
            secrets: SecretsStatus {
                backend: self.secrets.backend_name(),
                breaker: self.secrets.breaker_state(),
                breaker_opened_at: self.secrets.breaker_opened_at(),
                emergency_mode: self.secrets.is_emergency(),
                cached_entries: self.secrets.cached_entries(),
            },
            keys: self.keys.status(),
            recent_events: self.log.counts_by_severity(now - Duration::hours(1)),
            latest_critical,
        }
    }

    /// Rotate immediately, outside the schedule.
    #[instrument(skip(self), fields(key_type = %key_type, actor = %actor))]
    pub async fn force_rotation(&self, key_type: KeyType, actor: &str) -> Result<RotationOutcome> {
        self.log.record_kind(
            SecurityEventKind::ForcedRotation,
            [("key_type", key_type.to_string()), ("actor", actor.to_string())],
        );
        warn!("Forced key rotation requested");
        self.keys.rotate(key_type).await
    }

    /// Switch the secrets client in or out of cache-only mode.
    #[instrument(skip(self), fields(actor = %actor))]
    pub fn emergency_mode(&self, enabled: bool, actor: &str) -> Uuid {
        self.secrets.set_emergency(enabled);
        let mut event = self
            .log
            .event(SecurityEventKind::EmergencyModeChanged)
            .with("enabled", enabled)
            .with("actor", actor);
        if !enabled {
            event = event.with_severity(Severity::High);
        }
        self.log.record(event)
    }

    /// Evict cached material for breach containment.
    #[instrument(skip(self), fields(scope = scope.label(), actor = %actor))]
    pub async fn invalidate_cache(&self, scope: CacheScope, actor: &str) -> Result<InvalidationReport> {
        let mut report = InvalidationReport::default();
        match &scope {
            CacheScope::Secrets | CacheScope::All => {
                report.secrets_evicted = self.secrets.invalidate_all();
            }
            CacheScope::SecretPath { path } => {
                if path.trim().is_empty() {
                    return Err(Error::validation_field("path cannot be empty", "path"));
                }
                report.secrets_evicted = usize::from(self.secrets.invalidate(path));
            }
            CacheScope::UserSessions { user_id } => {
                report.sessions_revoked = self.sessions.revoke_user(user_id, REASON_CONTAINMENT).await?;
            }
        }

        let mut event = self
            .log
            .event(SecurityEventKind::CacheInvalidated)
            .with("scope", scope.label())
            .with("actor", actor)
            .with("secrets_evicted", report.secrets_evicted)
            .with("sessions_revoked", report.sessions_revoked);
        match &scope {
            CacheScope::SecretPath { path } => event = event.with("path", path),
            CacheScope::UserSessions { user_id } => event = event.with("user_id", user_id),
            CacheScope::Secrets | CacheScope::All => {}
        }
        report.incident_id = self.log.record(event);
        info!(
            secrets_evicted = report.secrets_evicted,
            sessions_revoked = report.sessions_revoked,
            "Cache invalidated"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::{SecretsConfig, TokenConfig};
    use crate::keys::{KeyRotationSettings, LocalRotationLock};
    use crate::secrets::{InMemorySecretStore, SecretsClientSettings};
    use crate::sessions::{ClientMetadata, RefreshSettings};
    use crate::storage::create_memory_pool;
    use std::time::Duration as StdDuration;

    struct Harness {
        monitor: SecurityMonitor,
        secrets: Arc<SecretsClient>,
        sessions: Arc<RefreshSessionStore>,
        store: Arc<InMemorySecretStore>,
        log: SecurityLog,
    }

    async fn harness() -> Harness {
        let clock = ManualClock::starting_now();
        let log = SecurityLog::new(clock.clone(), 256);
        let store = Arc::new(InMemorySecretStore::new());
        let secrets = Arc::new(
            SecretsClient::new(
                store.clone(),
                SecretsClientSettings::from(&SecretsConfig::default()),
                clock.clone(),
                log.clone(),
            )
            .unwrap(),
        );
        let keys = Arc::new(
            KeyRotationService::initialize(
                secrets.clone(),
                Arc::new(LocalRotationLock::new(clock.clone(), Duration::seconds(60))),
                clock.clone(),
                log.clone(),
                KeyRotationSettings {
                    signing_path: "keywarden/signing-keys".into(),
                    encryption_path: "keywarden/encryption-keys".into(),
                    signing_overlap: Duration::minutes(20),
                    encryption_overlap: Duration::hours(48),
                    signing_grace: Duration::minutes(31),
                    signing_interval: Duration::days(1),
                    encryption_interval: Duration::days(30),
                    lock_timeout: StdDuration::from_millis(50),
                },
            )
            .await
            .unwrap(),
        );
        let sessions = Arc::new(RefreshSessionStore::new(
            create_memory_pool().await.unwrap(),
            clock.clone(),
            log.clone(),
            RefreshSettings::from(&TokenConfig::default()),
        ));
        let monitor = SecurityMonitor::new(log.clone(), secrets.clone(), keys, sessions.clone());
        Harness { monitor, secrets, sessions, store, log }
    }

    #[tokio::test]
    async fn test_status_reports_components() {
        let h = harness().await;
        h.log.record_kind(SecurityEventKind::RefreshTokenReuse, [("session_id", "s".to_string())]);

        let status = h.monitor.status();
        assert_eq!(status.secrets.breaker, BreakerState::Closed);
        assert!(!status.secrets.emergency_mode);
        assert_eq!(status.keys.len(), 2);
        assert_eq!(status.recent_events.get(&Severity::Critical), Some(&1));
        assert_eq!(status.latest_critical.len(), 1);
    }

    #[tokio::test]
    async fn test_force_rotation_records_event() {
        let h = harness().await;
        let before = h.monitor.status().keys[0].version;
        let outcome = h.monitor.force_rotation(KeyType::Signing, "oncall").await.unwrap();
        assert!(outcome.version > before);
        assert_eq!(h.log.count(SecurityEventKind::ForcedRotation), 1);
        assert_eq!(h.monitor.status().keys[0].pending_kid.as_deref(), Some(outcome.kid.as_str()));
    }

    #[tokio::test]
    async fn test_emergency_mode_toggles_secrets_client() {
        let h = harness().await;
        h.monitor.emergency_mode(true, "oncall");
        assert!(h.secrets.is_emergency());
        assert!(h.monitor.status().secrets.emergency_mode);
        h.monitor.emergency_mode(false, "oncall");
        assert!(!h.secrets.is_emergency());
        assert_eq!(h.log.count(SecurityEventKind::EmergencyModeChanged), 2);
    }

    #[tokio::test]
    async fn test_invalidate_cache_scopes() {
        let h = harness().await;
        h.store.seed("app/db", "pw");
        h.secrets.get("app/db").await.unwrap();
        let cached = h.secrets.cached_entries();
        assert!(cached >= 3);

        let report = h
            .monitor
            .invalidate_cache(CacheScope::SecretPath { path: "app/db".into() }, "oncall")
            .await
            .unwrap();
        assert_eq!(report.secrets_evicted, 1);
        assert_eq!(h.secrets.cached_entries(), cached - 1);

        let report = h.monitor.invalidate_cache(CacheScope::All, "oncall").await.unwrap();
        assert_eq!(report.secrets_evicted, cached - 1);
        assert_eq!(h.secrets.cached_entries(), 0);
        assert_eq!(h.log.count(SecurityEventKind::CacheInvalidated), 2);
    }

    #[tokio::test]
    async fn test_invalidate_user_sessions() {
        let h = harness().await;
        h.sessions.create("user-1", vec![], ClientMetadata::new()).await.unwrap();
        h.sessions.create("user-1", vec![], ClientMetadata::new()).await.unwrap();

        let report = h
            .monitor
            .invalidate_cache(CacheScope::UserSessions { user_id: "user-1".into() }, "oncall")
            .await
            .unwrap();
        assert_eq!(report.sessions_revoked, 2);
        assert_eq!(h.sessions.active_sessions_for_user("user-1").await.unwrap(), 0);
    }

    #[test]
    fn test_scope_wire_format() {
        let scope: CacheScope =
            serde_json::from_str(r#"{"scope":"userSessions","userId":"user-1"}"#).unwrap();
        assert_eq!(scope, CacheScope::UserSessions { user_id: "user-1".into() });
        let scope: CacheScope = serde_json::from_str(r#"{"scope":"all"}"#).unwrap();
        assert_eq!(scope, CacheScope::All);
    }
}
