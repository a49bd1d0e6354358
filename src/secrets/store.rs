//! External secret store abstraction.

use async_trait::async_trait;

use super::error::{Result, SecretsError};
use super::types::SecretString;

/// Backend holding the authoritative copy of every secret.
///
/// Implementations MUST NOT log secret values. The secrets client layers
/// caching, retries and the circuit breaker on top; adapters only translate
/// calls and classify errors (`NotFound` for a missing path, a transport
/// variant for anything that says the backend is unhealthy).
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Short backend name for logs and status output.
    fn backend_name(&self) -> &'static str;

    /// Retrieve a secret value by path.
    async fn get_secret(&self, path: &str) -> Result<SecretString>;

    /// Store or replace a secret value.
    async fn set_secret(&self, path: &str, value: &SecretString) -> Result<()>;

    /// Remove a secret.
    async fn delete_secret(&self, path: &str) -> Result<()>;
}

/// Reject paths no backend can address.
pub fn validate_path(path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(SecretsError::invalid_key(path, "path cannot be empty"));
    }
    if path.len() > 256 {
        return Err(SecretsError::invalid_key(path, "path exceeds 256 characters"));
    }
    if path.starts_with('/') || path.split('/').any(|segment| segment.is_empty() || segment == "..")
    {
        return Err(SecretsError::invalid_key(path, "path segments must be non-empty and relative"));
    }
    Ok(())
}
