//! Secrets management.
//!
//! Every signing key, encryption key and webhook credential lives in an
//! external [`SecretStore`]. Callers never talk to a store directly; they go
//! through [`SecretsClient`], which adds an encrypted cache, retries and a
//! circuit breaker so a store outage degrades to cached values instead of
//! failing requests.
//!
//! # Backends
//!
//! - **vault**: HashiCorp Vault KV v2
//! - **env**: `KEYWARDEN_SECRET_*` variables with an in-process write overlay
//! - **memory**: process-local map for tests and single-node development

pub mod breaker;
pub mod cache;
pub mod client;
pub mod env;
pub mod error;
pub mod memory;
pub mod store;
pub mod types;
pub mod vault;

use std::sync::Arc;

pub use breaker::{BreakerState, CircuitBreaker};
pub use client::{SecretsClient, SecretsClientSettings};
pub use env::EnvVarSecretStore;
pub use error::{Result, SecretsError};
pub use memory::InMemorySecretStore;
pub use store::{validate_path, SecretStore};
pub use types::SecretString;
pub use vault::{VaultConfig, VaultSecretStore};

use crate::config::{SecretsBackend, SecretsConfig};

/// Build the configured store backend.
pub fn build_store(config: &SecretsConfig) -> Result<Arc<dyn SecretStore>> {
    let store: Arc<dyn SecretStore> = match config.backend {
        SecretsBackend::Vault => {
            let vault_config = VaultConfig::from_settings(config)?;
            Arc::new(VaultSecretStore::new(vault_config)?)
        }
        SecretsBackend::Env => Arc::new(EnvVarSecretStore::new()),
        SecretsBackend::Memory => {
            tracing::warn!("Using in-memory secret store; secrets are lost on restart");
            Arc::new(InMemorySecretStore::new())
        }
    };
    tracing::info!(backend = store.backend_name(), "Secret store configured");
    Ok(store)
}
