//! Component wiring shared by the server and the CLI commands.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clock::{self, SharedClock};
use crate::config::{AppConfig, LockBackend};
use crate::errors::Result;
use crate::keys::{
    KeyRotationService, KeyRotationSettings, LocalRotationLock, RotationLock, RotationScheduler,
    SqlxRotationLock,
};
use crate::monitor::{SecurityEventWriter, SecurityLog, SecurityMonitor};
use crate::secrets::{self, SecretStore, SecretsClient, SecretsClientSettings};
use crate::sessions::{RefreshSessionStore, RefreshSettings};
use crate::storage::{self, DbPool};
use crate::tokens::{TokenPolicy, TokenService};
use crate::webhooks::{WebhookSecurityGate, WebhookSettings};

const HOUSEKEEPING_INTERVAL: StdDuration = StdDuration::from_secs(60);

/// Everything request handlers need, cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub clock: SharedClock,
    pub pool: DbPool,
    pub events: SecurityLog,
    pub secrets: Arc<SecretsClient>,
    pub keys: Arc<KeyRotationService>,
    pub sessions: Arc<RefreshSessionStore>,
    pub tokens: Arc<TokenService>,
    pub webhooks: Arc<WebhookSecurityGate>,
    pub monitor: Arc<SecurityMonitor>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("secrets", &self.secrets)
            .field("keys", &self.keys)
            .field("tokens", &self.tokens)
            .finish_non_exhaustive()
    }
}

/// Wired components plus the background work that has not started yet.
pub struct App {
    pub state: AppState,
    writer: Option<SecurityEventWriter>,
}

impl App {
    /// Production wiring: configured database, secret store and wall clock.
    pub async fn from_config(config: AppConfig) -> Result<Self> {
        let pool = storage::create_pool(&config.database).await?;
        let store = secrets::build_store(&config.secrets)?;
        Self::with_components(config, pool, store, clock::system()).await
    }

    /// Wiring with explicit collaborators; tests pass an in-memory store and a
    /// manual clock.
    pub async fn with_components(
        config: AppConfig,
        pool: DbPool,
        store: Arc<dyn SecretStore>,
        clock: SharedClock,
    ) -> Result<Self> {
        let events = SecurityLog::new(clock.clone(), config.observability.event_buffer);
        let (sink, writer) = SecurityEventWriter::channel(pool.clone(), config.observability.event_buffer);
        events.attach_sink(sink);

        let secrets = Arc::new(SecretsClient::new(
            store,
            SecretsClientSettings::from(&config.secrets),
            clock.clone(),
            events.clone(),
        )?);

        let lock: Arc<dyn RotationLock> = match config.rotation.lock_backend {
            LockBackend::Database => {
                Arc::new(SqlxRotationLock::new(pool.clone(), clock.clone(), config.rotation.lock_lease()))
            }
            LockBackend::Local => Arc::new(LocalRotationLock::new(clock.clone(), config.rotation.lock_lease())),
        };
        let keys = Arc::new(
            KeyRotationService::initialize(
                secrets.clone(),
                lock,
                clock.clone(),
                events.clone(),
                KeyRotationSettings::from_config(&config.secrets, &config.rotation, &config.tokens),
            )
            .await?,
        );

        let sessions = Arc::new(RefreshSessionStore::new(
            pool.clone(),
            clock.clone(),
            events.clone(),
            RefreshSettings::from(&config.tokens),
        ));
        let tokens = Arc::new(TokenService::new(
            keys.clone(),
            sessions.clone(),
            TokenPolicy::from_config(&config.tokens)?,
            clock.clone(),
            events.clone(),
        ));
        let webhooks = Arc::new(WebhookSecurityGate::new(
            secrets.clone(),
            clock.clone(),
            events.clone(),
            WebhookSettings::from_config(&config.webhook, &config.secrets),
        ));
        let monitor = Arc::new(SecurityMonitor::new(
            events.clone(),
            secrets.clone(),
            keys.clone(),
            sessions.clone(),
        ));

        info!(backend = secrets.backend_name(), "Application components initialized");
        let state = AppState {
            config: Arc::new(config),
            clock,
            pool,
            events,
            secrets,
            keys,
            sessions,
            tokens,
            webhooks,
            monitor,
        };
        Ok(Self { state, writer: Some(writer) })
    }

    /// Start event persistence only; used by one-shot CLI commands.
    pub fn spawn_event_writer(&mut self, shutdown: CancellationToken) -> Option<JoinHandle<()>> {
        self.writer.take().map(|writer| writer.spawn(shutdown))
    }

    /// Start event persistence, the rotation scheduler and housekeeping.
    pub fn spawn_background(&mut self, shutdown: CancellationToken) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::with_capacity(3);
        handles.extend(self.spawn_event_writer(shutdown.clone()));

        let tick = self.state.config.rotation.scheduler_tick();
        handles.push(RotationScheduler::new(self.state.keys.clone(), tick).spawn(shutdown.clone()));
        handles.push(spawn_housekeeping(self.state.clone(), shutdown));
        handles
    }
}

/// Periodically drop expired nonces and finished refresh sessions.
fn spawn_housekeeping(state: AppState, shutdown: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(HOUSEKEEPING_INTERVAL);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let retention = state.config.tokens.refresh_ttl();

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let nonces = state.webhooks.purge_expired();
                    match state.sessions.purge_finished(retention).await {
                        Ok(sessions) => debug!(nonces, sessions, "Housekeeping pass complete"),
                        Err(e) => warn!(error = %e, "Refresh session purge failed"),
                    }
                }
                _ = shutdown.cancelled() => break,
            }
        }
        info!("Housekeeping stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::secrets::InMemorySecretStore;
    use crate::storage::create_memory_pool;
    use crate::tokens::{ScopeSet, TokenClass};

    async fn app() -> App {
        App::with_components(
            AppConfig::default(),
            create_memory_pool().await.unwrap(),
            Arc::new(InMemorySecretStore::new()),
            ManualClock::starting_now(),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_components_share_keys() {
        let app = app().await;
        let scopes = ScopeSet::parse("keys.read").unwrap();
        let issued = app.state.tokens.issue(TokenClass::M2m, "svc", &scopes).await.unwrap();
        let validated = app.state.tokens.validate(issued.token.expose_secret()).await.unwrap();
        assert_eq!(validated.subject(), "svc");
        assert_eq!(app.state.keys.get_jwks().keys.len(), 1);
    }

    #[tokio::test]
    async fn test_background_tasks_stop_on_cancel() {
        let mut app = app().await;
        let shutdown = CancellationToken::new();
        let handles = app.spawn_background(shutdown.clone());
        assert_eq!(handles.len(), 3);
        assert!(app.spawn_event_writer(shutdown.clone()).is_none());

        shutdown.cancel();
        for handle in handles {
            handle.await.unwrap();
        }
    }
}
