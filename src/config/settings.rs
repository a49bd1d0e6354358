//! # Configuration Settings
//!
//! Defines the configuration structure for keywarden. Every section has
//! defaults suitable for a single-node deployment and can be overridden
//! with `KEYWARDEN_*` environment variables.

use crate::errors::{Error, Result};
use crate::secrets::SecretString;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use validator::Validate;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate, Default)]
pub struct AppConfig {
    /// Server configuration
    #[validate(nested)]
    pub server: ServerConfig,

    /// Database configuration
    #[validate(nested)]
    pub database: DatabaseConfig,

    /// External secret store and local cache
    #[validate(nested)]
    pub secrets: SecretsConfig,

    /// Key rotation schedule and locking
    #[validate(nested)]
    pub rotation: RotationConfig,

    /// Token lifetimes and claims
    #[validate(nested)]
    pub tokens: TokenConfig,

    /// Inbound rotation webhooks
    #[validate(nested)]
    pub webhook: WebhookConfig,

    /// Observability configuration
    #[validate(nested)]
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// Load every section from the environment and validate the result.
    pub fn from_env() -> Result<Self> {
        let config = Self {
            server: ServerConfig::from_env(),
            database: DatabaseConfig::from_env(),
            secrets: SecretsConfig::from_env()?,
            rotation: RotationConfig::from_env(),
            tokens: TokenConfig::from_env(),
            webhook: WebhookConfig::from_env(),
            observability: ObservabilityConfig::from_env()?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<()> {
        Validate::validate(self).map_err(Error::from)?;
        self.validate_custom()
    }

    /// Cross-field rules the validator derive cannot express
    fn validate_custom(&self) -> Result<()> {
        if self.webhook.replay_ttl_seconds < self.webhook.tolerance_seconds {
            return Err(Error::validation_field(
                "Replay cache TTL must be at least the timestamp tolerance window",
                "webhook.replay_ttl_seconds",
            ));
        }

        if self.tokens.session_idle_seconds > self.tokens.session_max_seconds {
            return Err(Error::validation_field(
                "Session idle timeout cannot exceed the absolute session lifetime",
                "tokens.session_idle_seconds",
            ));
        }

        if !self.database.url.starts_with("sqlite:") {
            return Err(Error::validation_field(
                "Database URL must start with 'sqlite:'",
                "database.url",
            ));
        }

        if self.secrets.backend == SecretsBackend::Vault && self.secrets.vault_token.is_none() {
            return Err(Error::validation_field(
                "KEYWARDEN_VAULT_TOKEN is required for the vault backend",
                "secrets.vault_token",
            ));
        }

        Ok(())
    }
}

fn env_parse<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name).ok().and_then(|s| s.parse::<T>().ok()).unwrap_or(default)
}

fn env_string(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ServerConfig {
    /// Server bind address
    #[validate(length(min = 1, message = "Host cannot be empty"))]
    pub host: String,

    /// Server port
    #[validate(range(min = 1, max = 65535, message = "Port must be between 1 and 65535"))]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: "127.0.0.1".to_string(), port: 8080 }
    }
}

impl ServerConfig {
    /// Get the server bind address
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: env_string("KEYWARDEN_HOST", &defaults.host),
            port: env_parse("KEYWARDEN_PORT", defaults.port),
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DatabaseConfig {
    /// Database connection URL
    #[validate(length(min = 1, message = "Database URL cannot be empty"))]
    pub url: String,

    /// Maximum number of connections in the pool
    #[validate(range(min = 1, max = 100, message = "Max connections must be between 1 and 100"))]
    pub max_connections: u32,

    /// Connection timeout in seconds
    #[validate(range(
        min = 1,
        max = 60,
        message = "Connect timeout must be between 1 and 60 seconds"
    ))]
    pub connect_timeout_seconds: u64,

    /// Enable automatic migrations
    pub auto_migrate: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://./data/keywarden.db".to_string(),
            max_connections: 5,
            connect_timeout_seconds: 10,
            auto_migrate: true,
        }
    }
}

impl DatabaseConfig {
    /// Get connection timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }

    /// Create DatabaseConfig from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            url: env_string("KEYWARDEN_DATABASE_URL", &defaults.url),
            max_connections: env_parse(
                "KEYWARDEN_DATABASE_MAX_CONNECTIONS",
                defaults.max_connections,
            ),
            connect_timeout_seconds: env_parse(
                "KEYWARDEN_DATABASE_CONNECT_TIMEOUT_SECONDS",
                defaults.connect_timeout_seconds,
            ),
            auto_migrate: std::env::var("KEYWARDEN_DATABASE_AUTO_MIGRATE")
                .map(|s| s.to_lowercase() == "true" || s == "1")
                .unwrap_or(defaults.auto_migrate),
        }
    }
}

/// Which external secret store backs the secrets client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecretsBackend {
    Vault,
    Env,
    Memory,
}

impl FromStr for SecretsBackend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "vault" => Ok(Self::Vault),
            "env" => Ok(Self::Env),
            "memory" => Ok(Self::Memory),
            other => Err(Error::config(format!(
                "Unknown secrets backend '{}': expected vault, env or memory",
                other
            ))),
        }
    }
}

/// External secret store, cache and circuit breaker settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SecretsConfig {
    pub backend: SecretsBackend,

    /// Vault server address
    pub vault_address: String,

    pub vault_token: Option<SecretString>,

    pub vault_namespace: Option<String>,

    /// KV v2 mount path
    #[validate(length(min = 1, message = "Vault mount path cannot be empty"))]
    pub vault_mount: String,

    /// Freshness window of a cached secret
    #[validate(range(min = 1, max = 86400, message = "Cache TTL must be between 1s and 24h"))]
    pub cache_ttl_seconds: u64,

    /// How long past TTL a cached value may be served while the store is down
    #[validate(range(min = 60, message = "Emergency horizon must be at least one minute"))]
    pub emergency_horizon_seconds: u64,

    #[validate(range(min = 1, max = 100, message = "Breaker threshold must be between 1 and 100"))]
    pub breaker_failure_threshold: u32,

    /// Sliding window in which consecutive failures are counted
    #[validate(range(min = 1, message = "Breaker window must be at least 1 second"))]
    pub breaker_window_seconds: u64,

    /// Time the breaker stays open before a half-open trial call
    #[validate(range(min = 1, message = "Breaker cool-down must be at least 1 second"))]
    pub breaker_cooldown_seconds: u64,

    #[validate(range(min = 1, max = 10, message = "Retry attempts must be between 1 and 10"))]
    pub retry_attempts: u32,

    pub retry_base_delay_ms: u64,

    pub retry_max_delay_ms: u64,

    /// Per-attempt timeout of a store call
    #[validate(range(min = 10, max = 30000, message = "Call timeout must be between 10ms and 30s"))]
    pub call_timeout_ms: u64,

    #[validate(length(min = 1))]
    pub signing_keys_path: String,

    #[validate(length(min = 1))]
    pub encryption_keys_path: String,

    #[validate(length(min = 1))]
    pub webhook_hmac_path: String,

    #[validate(length(min = 1))]
    pub webhook_bearer_path: String,
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self {
            backend: SecretsBackend::Memory,
            vault_address: "http://127.0.0.1:8200".to_string(),
            vault_token: None,
            vault_namespace: None,
            vault_mount: "secret".to_string(),
            cache_ttl_seconds: 300,
            emergency_horizon_seconds: 7 * 24 * 3600,
            breaker_failure_threshold: 5,
            breaker_window_seconds: 60,
            breaker_cooldown_seconds: 30,
            retry_attempts: 3,
            retry_base_delay_ms: 100,
            retry_max_delay_ms: 2000,
            call_timeout_ms: 2000,
            signing_keys_path: "keywarden/signing-keys".to_string(),
            encryption_keys_path: "keywarden/encryption-keys".to_string(),
            webhook_hmac_path: "keywarden/webhook-hmac".to_string(),
            webhook_bearer_path: "keywarden/webhook-bearer".to_string(),
        }
    }
}

impl SecretsConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds)
    }

    pub fn emergency_horizon(&self) -> Duration {
        Duration::from_secs(self.emergency_horizon_seconds)
    }

    pub fn breaker_window(&self) -> Duration {
        Duration::from_secs(self.breaker_window_seconds)
    }

    pub fn breaker_cooldown(&self) -> Duration {
        Duration::from_secs(self.breaker_cooldown_seconds)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let backend = match std::env::var("KEYWARDEN_SECRETS_BACKEND") {
            Ok(value) => value.parse()?,
            Err(_) => defaults.backend,
        };

        Ok(Self {
            backend,
            vault_address: env_string("KEYWARDEN_VAULT_ADDR", &defaults.vault_address),
            vault_token: std::env::var("KEYWARDEN_VAULT_TOKEN").ok().map(SecretString::new),
            vault_namespace: std::env::var("KEYWARDEN_VAULT_NAMESPACE").ok(),
            vault_mount: env_string("KEYWARDEN_VAULT_MOUNT", &defaults.vault_mount),
            cache_ttl_seconds: env_parse(
                "KEYWARDEN_SECRETS_CACHE_TTL_SECONDS",
                defaults.cache_ttl_seconds,
            ),
            emergency_horizon_seconds: env_parse(
                "KEYWARDEN_SECRETS_EMERGENCY_HORIZON_SECONDS",
                defaults.emergency_horizon_seconds,
            ),
            breaker_failure_threshold: env_parse(
                "KEYWARDEN_SECRETS_BREAKER_THRESHOLD",
                defaults.breaker_failure_threshold,
            ),
            breaker_window_seconds: env_parse(
                "KEYWARDEN_SECRETS_BREAKER_WINDOW_SECONDS",
                defaults.breaker_window_seconds,
            ),
            breaker_cooldown_seconds: env_parse(
                "KEYWARDEN_SECRETS_BREAKER_COOLDOWN_SECONDS",
                defaults.breaker_cooldown_seconds,
            ),
            retry_attempts: env_parse("KEYWARDEN_SECRETS_RETRY_ATTEMPTS", defaults.retry_attempts),
            retry_base_delay_ms: env_parse(
                "KEYWARDEN_SECRETS_RETRY_BASE_DELAY_MS",
                defaults.retry_base_delay_ms,
            ),
            retry_max_delay_ms: env_parse(
                "KEYWARDEN_SECRETS_RETRY_MAX_DELAY_MS",
                defaults.retry_max_delay_ms,
            ),
            call_timeout_ms: env_parse("KEYWARDEN_SECRETS_CALL_TIMEOUT_MS", defaults.call_timeout_ms),
            signing_keys_path: env_string(
                "KEYWARDEN_SIGNING_KEYS_PATH",
                &defaults.signing_keys_path,
            ),
            encryption_keys_path: env_string(
                "KEYWARDEN_ENCRYPTION_KEYS_PATH",
                &defaults.encryption_keys_path,
            ),
            webhook_hmac_path: env_string(
                "KEYWARDEN_WEBHOOK_HMAC_PATH",
                &defaults.webhook_hmac_path,
            ),
            webhook_bearer_path: env_string(
                "KEYWARDEN_WEBHOOK_BEARER_PATH",
                &defaults.webhook_bearer_path,
            ),
        })
    }
}

/// Which lock implementation serializes rotations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockBackend {
    /// Lease row in the shared database; safe across nodes
    Database,
    /// In-process mutex; single node only
    Local,
}

/// Key rotation schedule and locking
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RotationConfig {
    /// Time a freshly generated signing key is published before promotion
    #[validate(range(min = 1, message = "Signing overlap must be positive"))]
    pub signing_overlap_seconds: u64,

    /// Time the previous encryption key keeps decrypting after a flip
    #[validate(range(min = 1, message = "Encryption overlap must be positive"))]
    pub encryption_overlap_seconds: u64,

    #[validate(range(min = 1, max = 60000, message = "Lock timeout must be between 1ms and 60s"))]
    pub lock_timeout_ms: u64,

    /// Lease length; a crashed holder releases implicitly once it elapses
    #[validate(range(min = 1, max = 3600))]
    pub lock_lease_seconds: u64,

    pub lock_backend: LockBackend,

    pub signing_interval_seconds: u64,

    pub encryption_interval_seconds: u64,

    #[validate(range(min = 1, max = 3600, message = "Scheduler tick must be between 1s and 1h"))]
    pub scheduler_tick_seconds: u64,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            signing_overlap_seconds: 20 * 60,
            encryption_overlap_seconds: 48 * 3600,
            lock_timeout_ms: 5000,
            lock_lease_seconds: 60,
            lock_backend: LockBackend::Database,
            signing_interval_seconds: 24 * 3600,
            encryption_interval_seconds: 30 * 24 * 3600,
            scheduler_tick_seconds: 30,
        }
    }
}

impl RotationConfig {
    pub fn signing_overlap(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.signing_overlap_seconds as i64)
    }

    pub fn encryption_overlap(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.encryption_overlap_seconds as i64)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn lock_lease(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.lock_lease_seconds as i64)
    }

    pub fn signing_interval(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.signing_interval_seconds as i64)
    }

    pub fn encryption_interval(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.encryption_interval_seconds as i64)
    }

    pub fn scheduler_tick(&self) -> Duration {
        Duration::from_secs(self.scheduler_tick_seconds)
    }

    pub fn from_env() -> Self {
        let defaults = Self::default();
        let lock_backend = match std::env::var("KEYWARDEN_ROTATION_LOCK_BACKEND").as_deref() {
            Ok("local") => LockBackend::Local,
            Ok("database") => LockBackend::Database,
            _ => defaults.lock_backend,
        };
        Self {
            signing_overlap_seconds: env_parse(
                "KEYWARDEN_SIGNING_OVERLAP_SECONDS",
                defaults.signing_overlap_seconds,
            ),
            encryption_overlap_seconds: env_parse(
                "KEYWARDEN_ENCRYPTION_OVERLAP_SECONDS",
                defaults.encryption_overlap_seconds,
            ),
            lock_timeout_ms: env_parse("KEYWARDEN_ROTATION_LOCK_TIMEOUT_MS", defaults.lock_timeout_ms),
            lock_lease_seconds: env_parse(
                "KEYWARDEN_ROTATION_LOCK_LEASE_SECONDS",
                defaults.lock_lease_seconds,
            ),
            lock_backend,
            signing_interval_seconds: env_parse(
                "KEYWARDEN_SIGNING_ROTATION_INTERVAL_SECONDS",
                defaults.signing_interval_seconds,
            ),
            encryption_interval_seconds: env_parse(
                "KEYWARDEN_ENCRYPTION_ROTATION_INTERVAL_SECONDS",
                defaults.encryption_interval_seconds,
            ),
            scheduler_tick_seconds: env_parse(
                "KEYWARDEN_ROTATION_TICK_SECONDS",
                defaults.scheduler_tick_seconds,
            ),
        }
    }
}

/// Token lifetimes, claims and scope policy
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct TokenConfig {
    #[validate(length(min = 1, message = "Token issuer cannot be empty"))]
    pub issuer: String,

    #[validate(length(min = 1, message = "Token audience cannot be empty"))]
    pub audience: String,

    #[validate(range(min = 60, message = "Session idle timeout must be at least 1 minute"))]
    pub session_idle_seconds: u64,

    #[validate(range(min = 60, message = "Session lifetime must be at least 1 minute"))]
    pub session_max_seconds: u64,

    #[validate(range(min = 60, max = 3600, message = "Access TTL must be between 1 and 60 minutes"))]
    pub access_ttl_seconds: u64,

    /// Sliding refresh session lifetime
    #[validate(range(min = 3600, message = "Refresh TTL must be at least 1 hour"))]
    pub refresh_ttl_seconds: u64,

    #[validate(range(min = 300, max = 1800, message = "M2M TTL must be between 5 and 30 minutes"))]
    pub m2m_ttl_seconds: u64,

    #[validate(range(max = 60, message = "Clock skew tolerance cannot exceed 60 seconds"))]
    pub clock_skew_seconds: u64,

    /// Scopes a machine identity may request
    pub m2m_allowed_scopes: Vec<String>,

    /// Window in which replay of the immediately previous refresh id is
    /// treated as a client race instead of theft. Zero disables it.
    #[validate(range(max = 60, message = "Refresh reuse grace cannot exceed 60 seconds"))]
    pub refresh_reuse_grace_seconds: u64,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            issuer: "keywarden".to_string(),
            audience: "keywarden-api".to_string(),
            session_idle_seconds: 30 * 60,
            session_max_seconds: 12 * 3600,
            access_ttl_seconds: 10 * 60,
            refresh_ttl_seconds: 14 * 24 * 3600,
            m2m_ttl_seconds: 15 * 60,
            clock_skew_seconds: 60,
            m2m_allowed_scopes: vec![
                "keys.read".to_string(),
                "admin.monitor".to_string(),
                "admin.write".to_string(),
            ],
            refresh_reuse_grace_seconds: 0,
        }
    }
}

impl TokenConfig {
    pub fn session_idle(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.session_idle_seconds as i64)
    }

    pub fn session_max(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.session_max_seconds as i64)
    }

    pub fn access_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.access_ttl_seconds as i64)
    }

    pub fn refresh_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.refresh_ttl_seconds as i64)
    }

    pub fn m2m_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.m2m_ttl_seconds as i64)
    }

    pub fn clock_skew(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.clock_skew_seconds as i64)
    }

    pub fn refresh_reuse_grace(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.refresh_reuse_grace_seconds as i64)
    }

    /// Longest lifetime of any token signed with a signing key.
    ///
    /// Refresh tokens are opaque and never signed, so they do not count.
    pub fn longest_signed_ttl(&self) -> chrono::Duration {
        [self.session_idle(), self.access_ttl(), self.m2m_ttl()]
            .into_iter()
            .max()
            .unwrap_or_else(|| self.session_idle())
    }

    pub fn from_env() -> Self {
        let defaults = Self::default();
        let m2m_allowed_scopes = std::env::var("KEYWARDEN_M2M_ALLOWED_SCOPES")
            .map(|s| {
                s.split(',').map(str::trim).filter(|s| !s.is_empty()).map(String::from).collect()
            })
            .unwrap_or(defaults.m2m_allowed_scopes);

        Self {
            issuer: env_string("KEYWARDEN_TOKEN_ISSUER", &defaults.issuer),
            audience: env_string("KEYWARDEN_TOKEN_AUDIENCE", &defaults.audience),
            session_idle_seconds: env_parse(
                "KEYWARDEN_SESSION_IDLE_SECONDS",
                defaults.session_idle_seconds,
            ),
            session_max_seconds: env_parse(
                "KEYWARDEN_SESSION_MAX_SECONDS",
                defaults.session_max_seconds,
            ),
            access_ttl_seconds: env_parse("KEYWARDEN_ACCESS_TTL_SECONDS", defaults.access_ttl_seconds),
            refresh_ttl_seconds: env_parse(
                "KEYWARDEN_REFRESH_TTL_SECONDS",
                defaults.refresh_ttl_seconds,
            ),
            m2m_ttl_seconds: env_parse("KEYWARDEN_M2M_TTL_SECONDS", defaults.m2m_ttl_seconds),
            clock_skew_seconds: env_parse(
                "KEYWARDEN_CLOCK_SKEW_SECONDS",
                defaults.clock_skew_seconds,
            ),
            m2m_allowed_scopes,
            refresh_reuse_grace_seconds: env_parse(
                "KEYWARDEN_REFRESH_REUSE_GRACE_SECONDS",
                defaults.refresh_reuse_grace_seconds,
            ),
        }
    }
}

/// Inbound rotation webhook checks
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct WebhookConfig {
    #[validate(range(min = 1, max = 10485760, message = "Max payload must be between 1B and 10MiB"))]
    pub max_payload_bytes: usize,

    /// Allowed |now - timestamp|
    #[validate(range(min = 1, max = 3600))]
    pub tolerance_seconds: u64,

    /// Nonce retention; never shorter than the tolerance window
    #[validate(range(min = 1))]
    pub replay_ttl_seconds: u64,

    /// Accepted webhooks per source identity per hour
    #[validate(range(min = 1, max = 100000))]
    pub rate_limit_per_hour: u32,

    /// Source identity used when a payload does not name one
    #[validate(length(min = 1))]
    pub default_source: String,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            max_payload_bytes: 1024 * 1024,
            tolerance_seconds: 300,
            replay_ttl_seconds: 600,
            rate_limit_per_hour: 100,
            default_source: "secret-store".to_string(),
        }
    }
}

impl WebhookConfig {
    pub fn tolerance(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.tolerance_seconds as i64)
    }

    pub fn replay_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.replay_ttl_seconds as i64)
    }

    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_payload_bytes: env_parse(
                "KEYWARDEN_WEBHOOK_MAX_PAYLOAD_BYTES",
                defaults.max_payload_bytes,
            ),
            tolerance_seconds: env_parse(
                "KEYWARDEN_WEBHOOK_TOLERANCE_SECONDS",
                defaults.tolerance_seconds,
            ),
            replay_ttl_seconds: env_parse(
                "KEYWARDEN_WEBHOOK_REPLAY_TTL_SECONDS",
                defaults.replay_ttl_seconds,
            ),
            rate_limit_per_hour: env_parse(
                "KEYWARDEN_WEBHOOK_RATE_LIMIT_PER_HOUR",
                defaults.rate_limit_per_hour,
            ),
            default_source: env_string("KEYWARDEN_WEBHOOK_DEFAULT_SOURCE", &defaults.default_source),
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Text,
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ObservabilityConfig {
    /// Log level filter (`RUST_LOG` syntax)
    #[validate(length(min = 1, message = "Log level cannot be empty"))]
    pub log_level: String,

    pub log_format: LogFormat,

    /// Security events kept in memory for status reporting
    #[validate(range(min = 16, max = 100000))]
    pub event_buffer: usize,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self { log_level: "info".to_string(), log_format: LogFormat::Text, event_buffer: 1024 }
    }
}

impl ObservabilityConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let log_format = match std::env::var("KEYWARDEN_LOG_FORMAT").as_deref() {
            Ok("json") => LogFormat::Json,
            Ok("text") | Err(_) => LogFormat::Text,
            Ok(other) => {
                return Err(Error::config(format!(
                    "Unknown log format '{}': expected json or text",
                    other
                )))
            }
        };
        Ok(Self {
            log_level: env_string("KEYWARDEN_LOG_LEVEL", &defaults.log_level),
            log_format,
            event_buffer: env_parse("KEYWARDEN_SECURITY_EVENT_BUFFER", defaults.event_buffer),
        })
    }
}
