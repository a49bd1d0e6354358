//! Environment variable secret store.
//!
//! **Development only.** Secrets are read from variables named
//! `KEYWARDEN_SECRET_<PATH>`, where the path is upper-cased and every
//! character outside `[A-Z0-9]` becomes `_`:
//!
//! ```bash
//! export KEYWARDEN_SECRET_KEYWARDEN_WEBHOOK_HMAC="dev-hmac-key"
//! ```
//!
//! Writes (key rotation persists key sets) land in a process-local overlay
//! that shadows the environment and is lost on restart.

use async_trait::async_trait;
use dashmap::DashMap;
use std::env;

use super::error::{Result, SecretsError};
use super::store::{validate_path, SecretStore};
use super::types::SecretString;

/// Environment variable prefix for secrets.
const SECRET_PREFIX: &str = "KEYWARDEN_SECRET_";

#[derive(Debug, Default)]
pub struct EnvVarSecretStore {
    overlay: DashMap<String, SecretString>,
}

impl EnvVarSecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn path_to_env_var(path: &str) -> String {
        let suffix: String = path
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
            .collect();
        format!("{}{}", SECRET_PREFIX, suffix)
    }
}

#[async_trait]
impl SecretStore for EnvVarSecretStore {
    fn backend_name(&self) -> &'static str {
        "env"
    }

    async fn get_secret(&self, path: &str) -> Result<SecretString> {
        validate_path(path)?;
        if let Some(value) = self.overlay.get(path) {
            return Ok(value.clone());
        }

        let env_var = Self::path_to_env_var(path);
        env::var(&env_var).map(SecretString::new).map_err(|_| {
            SecretsError::not_found(format!("{} (looking for {})", path, env_var))
        })
    }

    async fn set_secret(&self, path: &str, value: &SecretString) -> Result<()> {
        validate_path(path)?;
        tracing::warn!(path = %path, "Secret written to process-local env overlay; it will not survive a restart");
        self.overlay.insert(path.to_string(), value.clone());
        Ok(())
    }

    async fn delete_secret(&self, path: &str) -> Result<()> {
        match self.overlay.remove(path) {
            Some(_) => Ok(()),
            None => Err(SecretsError::backend_error(format!(
                "Cannot delete '{}': environment variables are read-only",
                path
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_to_env_var() {
        assert_eq!(
            EnvVarSecretStore::path_to_env_var("keywarden/webhook-hmac"),
            "KEYWARDEN_SECRET_KEYWARDEN_WEBHOOK_HMAC"
        );
    }

    #[tokio::test]
    async fn test_reads_environment() {
        env::set_var("KEYWARDEN_SECRET_TESTS_ENV_READ", "from-env");
        let store = EnvVarSecretStore::new();
        assert_eq!(store.get_secret("tests/env-read").await.unwrap().expose_secret(), "from-env");
        env::remove_var("KEYWARDEN_SECRET_TESTS_ENV_READ");
    }

    #[tokio::test]
    async fn test_overlay_shadows_environment() {
        env::set_var("KEYWARDEN_SECRET_TESTS_ENV_OVERLAY", "from-env");
        let store = EnvVarSecretStore::new();
        store.set_secret("tests/env-overlay", &SecretString::new("written")).await.unwrap();
        assert_eq!(
            store.get_secret("tests/env-overlay").await.unwrap().expose_secret(),
            "written"
        );
        env::remove_var("KEYWARDEN_SECRET_TESTS_ENV_OVERLAY");
    }

    #[tokio::test]
    async fn test_missing_is_not_found() {
        let store = EnvVarSecretStore::new();
        assert!(matches!(
            store.get_secret("tests/definitely-missing").await,
            Err(SecretsError::NotFound { .. })
        ));
    }
}
