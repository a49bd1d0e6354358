//! # Configuration Management
//!
//! Typed, validated settings for keywarden. Values come from `KEYWARDEN_*`
//! environment variables (a `.env` file is loaded first when present) and
//! fall back to defaults suitable for a single node.

pub mod settings;

pub use settings::{
    AppConfig, DatabaseConfig, LockBackend, LogFormat, ObservabilityConfig, RotationConfig,
    SecretsBackend, SecretsConfig, ServerConfig, TokenConfig, WebhookConfig,
};

use crate::errors::Result;

/// Load `.env` (if any) and build the application configuration.
pub fn load() -> Result<AppConfig> {
    // A missing .env file is the normal case in production.
    let _ = dotenvy::dotenv();
    AppConfig::from_env()
}
