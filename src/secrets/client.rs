//! Resilient secrets client.
//!
//! Wraps a [`SecretStore`] with an encrypted local cache, bounded retries
//! with exponential backoff and jitter, a per-call timeout and a circuit
//! breaker. Read path for `get`:
//!
//! 1. A fresh cache entry (younger than the TTL) is returned without any
//!    network call.
//! 2. In emergency mode, or while the breaker is open, the cached value is
//!    served up to `TTL + emergency horizon` and nothing is sent upstream.
//! 3. Otherwise the store is called. On total failure an expired cache entry
//!    inside the horizon is served instead; with nothing usable the call
//!    fails with `Unavailable`.
//!
//! A cached value that fails to decrypt is evicted and the read fails.

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use super::breaker::{BreakerState, CallPermit, CircuitBreaker, Transition};
use super::cache::{CachedSecret, EncryptedCache};
use super::error::{Result, SecretsError};
use super::store::SecretStore;
use super::types::SecretString;
use crate::clock::SharedClock;
use crate::config::SecretsConfig;
use crate::monitor::{SecurityEventKind, SecurityLog};
use crate::observability::metrics;

/// Tunables for [`SecretsClient`], derived from [`SecretsConfig`].
#[derive(Debug, Clone)]
pub struct SecretsClientSettings {
    pub cache_ttl: Duration,
    pub emergency_horizon: Duration,
    pub retry_attempts: u32,
    pub retry_base_delay: std::time::Duration,
    pub retry_max_delay: std::time::Duration,
    pub call_timeout: std::time::Duration,
    pub breaker_threshold: u32,
    pub breaker_window: std::time::Duration,
    pub breaker_cooldown: std::time::Duration,
}

impl From<&SecretsConfig> for SecretsClientSettings {
    fn from(config: &SecretsConfig) -> Self {
        Self {
            cache_ttl: Duration::seconds(config.cache_ttl_seconds as i64),
            emergency_horizon: Duration::seconds(config.emergency_horizon_seconds as i64),
            retry_attempts: config.retry_attempts.max(1),
            retry_base_delay: std::time::Duration::from_millis(config.retry_base_delay_ms),
            retry_max_delay: std::time::Duration::from_millis(config.retry_max_delay_ms),
            call_timeout: config.call_timeout(),
            breaker_threshold: config.breaker_failure_threshold,
            breaker_window: config.breaker_window(),
            breaker_cooldown: config.breaker_cooldown(),
        }
    }
}

/// Why a read could not use the network.
#[derive(Debug, Clone, Copy)]
enum Degraded {
    EmergencyMode,
    CircuitOpen,
    ProviderFailed,
}

impl Degraded {
    fn as_str(&self) -> &'static str {
        match self {
            Degraded::EmergencyMode => "emergency_mode",
            Degraded::CircuitOpen => "circuit_open",
            Degraded::ProviderFailed => "provider_failed",
        }
    }
}

pub struct SecretsClient {
    store: Arc<dyn SecretStore>,
    cache: EncryptedCache,
    breaker: CircuitBreaker,
    settings: SecretsClientSettings,
    emergency: AtomicBool,
    clock: SharedClock,
    events: SecurityLog,
}

impl std::fmt::Debug for SecretsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretsClient")
            .field("backend", &self.store.backend_name())
            .field("cached_entries", &self.cache.len())
            .field("breaker", &self.breaker.state())
            .field("emergency", &self.is_emergency())
            .finish()
    }
}

impl SecretsClient {
    pub fn new(
        store: Arc<dyn SecretStore>,
        settings: SecretsClientSettings,
        clock: SharedClock,
        events: SecurityLog,
    ) -> Result<Self> {
        let breaker = CircuitBreaker::new(
            settings.breaker_threshold,
            settings.breaker_window,
            settings.breaker_cooldown,
        );
        Ok(Self {
            store,
            cache: EncryptedCache::new()?,
            breaker,
            settings,
            emergency: AtomicBool::new(false),
            clock,
            events,
        })
    }

    pub fn backend_name(&self) -> &'static str {
        self.store.backend_name()
    }

    /// Read a secret, preferring the cache.
    #[instrument(skip(self), fields(backend = self.store.backend_name()))]
    pub async fn get(&self, path: &str) -> Result<SecretString> {
        let now = self.clock.now();
        let cached = self.read_cache(path)?;

        if let Some(entry) = &cached {
            if now - entry.fetched_at <= self.settings.cache_ttl {
                metrics::record_cache_hit();
                return Ok(entry.value.clone());
            }
        }
        metrics::record_cache_miss();

        if self.is_emergency() {
            return self.serve_degraded(path, cached, now, Degraded::EmergencyMode, None);
        }

        match self.fetch(path).await {
            Ok(value) => {
                self.cache.insert(path, &value, self.clock.now())?;
                Ok(value)
            }
            Err(e @ SecretsError::NotFound { .. }) => Err(e),
            Err(SecretsError::Unavailable { .. }) => {
                self.serve_degraded(path, cached, now, Degraded::CircuitOpen, None)
            }
            Err(e) if e.counts_as_backend_failure() => {
                self.serve_degraded(path, cached, now, Degraded::ProviderFailed, Some(e))
            }
            Err(e) => Err(e),
        }
    }

    /// Read straight from the store and refresh the cache. Never serves a
    /// cached value.
    #[instrument(skip(self))]
    pub async fn refresh(&self, path: &str) -> Result<SecretString> {
        if self.is_emergency() {
            return Err(SecretsError::unavailable("emergency mode: network calls suspended"));
        }
        let value = self.fetch(path).await?;
        self.cache.insert(path, &value, self.clock.now())?;
        debug!(path = %path, "Refreshed secret in cache");
        Ok(value)
    }

    /// Write-through: store first, then cache.
    #[instrument(skip(self, value))]
    pub async fn put(&self, path: &str, value: &SecretString) -> Result<()> {
        if self.is_emergency() {
            return Err(SecretsError::unavailable("emergency mode: network calls suspended"));
        }
        let Some(permit) = self.breaker.try_acquire(self.clock.now()) else {
            return Err(SecretsError::unavailable("circuit breaker open"));
        };

        let outcome =
            tokio::time::timeout(self.settings.call_timeout, self.store.set_secret(path, value))
                .await
                .unwrap_or_else(|_| {
                    Err(SecretsError::Timeout {
                        key: path.to_string(),
                        timeout_ms: self.settings.call_timeout.as_millis() as u64,
                    })
                });

        match outcome {
            Ok(()) => {
                self.on_success(permit);
                self.cache.insert(path, value, self.clock.now())?;
                Ok(())
            }
            Err(e) => {
                if e.counts_as_backend_failure() {
                    self.on_failure(permit, path);
                } else {
                    self.on_success(permit);
                }
                Err(e)
            }
        }
    }

    /// Cached value regardless of age; no network call.
    pub fn cached(&self, path: &str) -> Result<Option<SecretString>> {
        Ok(self.read_cache(path)?.map(|entry| entry.value))
    }

    pub fn invalidate(&self, path: &str) -> bool {
        self.cache.remove(path)
    }

    pub fn invalidate_all(&self) -> usize {
        self.cache.clear()
    }

    pub fn breaker_state(&self) -> BreakerState {
        self.breaker.state()
    }

    pub fn breaker_opened_at(&self) -> Option<DateTime<Utc>> {
        self.breaker.opened_at()
    }

    pub fn cached_entries(&self) -> usize {
        self.cache.len()
    }

    /// Cache-only mode: no network calls, cached values served up to the
    /// emergency horizon.
    pub fn set_emergency(&self, enabled: bool) {
        let previous = self.emergency.swap(enabled, Ordering::SeqCst);
        if previous != enabled {
            info!(enabled, "Secrets client emergency mode changed");
        }
    }

    pub fn is_emergency(&self) -> bool {
        self.emergency.load(Ordering::SeqCst)
    }

    fn read_cache(&self, path: &str) -> Result<Option<CachedSecret>> {
        match self.cache.get(path) {
            Err(e @ SecretsError::Corrupted { .. }) => {
                self.events.record_kind(
                    SecurityEventKind::CacheCorrupted,
                    [("path", path.to_string())],
                );
                Err(e)
            }
            other => other,
        }
    }

    fn serve_degraded(
        &self,
        path: &str,
        cached: Option<CachedSecret>,
        now: DateTime<Utc>,
        reason: Degraded,
        cause: Option<SecretsError>,
    ) -> Result<SecretString> {
        let limit = self.settings.cache_ttl + self.settings.emergency_horizon;
        match cached {
            Some(entry) if now - entry.fetched_at <= limit => {
                metrics::record_stale_served();
                warn!(
                    path = %path,
                    reason = reason.as_str(),
                    age_seconds = (now - entry.fetched_at).num_seconds(),
                    "Serving cached secret while provider is unavailable"
                );
                Ok(entry.value)
            }
            _ => {
                let message = match cause {
                    Some(e) => format!("{} ({}): {}", path, reason.as_str(), e),
                    None => format!("{} ({})", path, reason.as_str()),
                };
                Err(SecretsError::unavailable(message))
            }
        }
    }

    /// Network read through the breaker with bounded retries.
    async fn fetch(&self, path: &str) -> Result<SecretString> {
        let mut last_error = None;

        for attempt in 0..self.settings.retry_attempts {
            if attempt > 0 {
                tokio::time::sleep(self.backoff(attempt)).await;
            }
            // Dropped unsettled if this future is cancelled mid-call.
            let Some(permit) = self.breaker.try_acquire(self.clock.now()) else {
                break;
            };

            let outcome =
                tokio::time::timeout(self.settings.call_timeout, self.store.get_secret(path)).await;
            match outcome {
                Ok(Ok(value)) => {
                    self.on_success(permit);
                    return Ok(value);
                }
                Ok(Err(e)) if !e.counts_as_backend_failure() => {
                    self.on_success(permit);
                    return Err(e);
                }
                Ok(Err(e)) => {
                    debug!(path = %path, attempt, error = %e, "Secret store call failed");
                    self.on_failure(permit, path);
                    last_error = Some(e);
                }
                Err(_) => {
                    debug!(path = %path, attempt, "Secret store call timed out");
                    self.on_failure(permit, path);
                    last_error = Some(SecretsError::Timeout {
                        key: path.to_string(),
                        timeout_ms: self.settings.call_timeout.as_millis() as u64,
                    });
                }
            }
        }

        Err(last_error.unwrap_or_else(|| SecretsError::unavailable("circuit breaker open")))
    }

    fn backoff(&self, attempt: u32) -> std::time::Duration {
        let base = self.settings.retry_base_delay.as_millis() as u64;
        let max = self.settings.retry_max_delay.as_millis() as u64;
        let exp = base.saturating_mul(1u64 << (attempt - 1).min(16)).min(max);
        let jitter = if exp > 1 { rand::thread_rng().gen_range(0..=exp / 2) } else { 0 };
        std::time::Duration::from_millis(exp.saturating_add(jitter).min(max.max(1)))
    }

    fn on_success(&self, permit: CallPermit<'_>) {
        if let Some(Transition::Closed) = permit.succeeded() {
            metrics::set_breaker_open(false);
            self.events.record_kind(
                SecurityEventKind::CircuitClosed,
                [("backend", self.store.backend_name().to_string())],
            );
        }
    }

    fn on_failure(&self, permit: CallPermit<'_>, path: &str) {
        if let Some(Transition::Opened { from, failures }) = permit.failed(self.clock.now()) {
            metrics::set_breaker_open(true);
            self.events.record_kind(
                SecurityEventKind::CircuitOpened,
                [
                    ("backend", self.store.backend_name().to_string()),
                    ("path", path.to_string()),
                    ("from", from.as_str().to_string()),
                    ("failures", failures.to_string()),
                ],
            );
        }
    }
}
