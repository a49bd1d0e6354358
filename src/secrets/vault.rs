//! HashiCorp Vault secret store (KV v2).
//!
//! Each secret is a KV v2 entry whose data map holds a single `value` field.
//! A 404 from Vault is a missing secret; every other failure (transport,
//! sealed vault, permission) is reported as a backend failure so the
//! secrets client can count it against the circuit breaker.

use async_trait::async_trait;
use std::collections::HashMap;
use vaultrs::client::{VaultClient, VaultClientSettingsBuilder};
use vaultrs::error::ClientError;
use vaultrs::kv2;

use super::error::{Result, SecretsError};
use super::store::{validate_path, SecretStore};
use super::types::SecretString;
use crate::config::SecretsConfig;

const VALUE_FIELD: &str = "value";

/// Connection settings for Vault.
#[derive(Debug, Clone)]
pub struct VaultConfig {
    /// Vault server address (e.g., "https://vault.example.com:8200")
    pub address: String,

    pub token: SecretString,

    /// Vault namespace (for Enterprise multi-tenancy)
    pub namespace: Option<String>,

    /// KV v2 mount path
    pub mount_path: String,
}

impl VaultConfig {
    pub fn from_settings(settings: &SecretsConfig) -> Result<Self> {
        let token = settings
            .vault_token
            .clone()
            .ok_or_else(|| SecretsError::config_error("KEYWARDEN_VAULT_TOKEN is not set"))?;
        Ok(Self {
            address: settings.vault_address.clone(),
            token,
            namespace: settings.vault_namespace.clone(),
            mount_path: settings.vault_mount.clone(),
        })
    }
}

pub struct VaultSecretStore {
    client: VaultClient,
    mount_path: String,
}

impl VaultSecretStore {
    /// Build the client. No network call is made here; an unreachable Vault
    /// surfaces on first use and is handled by the circuit breaker.
    pub fn new(config: VaultConfig) -> Result<Self> {
        if config.address.is_empty() {
            return Err(SecretsError::config_error("Vault address cannot be empty"));
        }

        let mut settings_builder = VaultClientSettingsBuilder::default();
        settings_builder.address(&config.address);
        settings_builder.token(config.token.expose_secret());
        if let Some(namespace) = config.namespace {
            settings_builder.namespace(Some(namespace));
        }

        let settings = settings_builder.build().map_err(|e| {
            SecretsError::config_error(format!("Invalid Vault configuration: {}", e))
        })?;

        let client = VaultClient::new(settings).map_err(|e| {
            SecretsError::connection_failed(format!("Failed to create Vault client: {}", e))
        })?;

        tracing::info!(address = %config.address, mount_path = %config.mount_path, "Vault secret store configured");
        Ok(Self { client, mount_path: config.mount_path })
    }

    fn classify(path: &str, error: ClientError) -> SecretsError {
        match error {
            ClientError::APIError { code: 404, .. } => SecretsError::not_found(path),
            ClientError::APIError { code: 401 | 403, errors } => {
                SecretsError::AuthenticationFailed { message: errors.join("; ") }
            }
            other => {
                tracing::warn!(error = %other, path = %path, "Vault call failed");
                SecretsError::connection_failed(other.to_string())
            }
        }
    }
}

#[async_trait]
impl SecretStore for VaultSecretStore {
    fn backend_name(&self) -> &'static str {
        "vault"
    }

    async fn get_secret(&self, path: &str) -> Result<SecretString> {
        validate_path(path)?;
        let data: HashMap<String, String> = kv2::read(&self.client, &self.mount_path, path)
            .await
            .map_err(|e| Self::classify(path, e))?;

        data.get(VALUE_FIELD).cloned().map(SecretString::new).ok_or_else(|| {
            SecretsError::backend_error(format!("Secret '{}' has no '{}' field", path, VALUE_FIELD))
        })
    }

    async fn set_secret(&self, path: &str, value: &SecretString) -> Result<()> {
        validate_path(path)?;
        let mut data = HashMap::new();
        data.insert(VALUE_FIELD.to_string(), value.expose_secret().to_string());

        kv2::set(&self.client, &self.mount_path, path, &data)
            .await
            .map_err(|e| Self::classify(path, e))?;

        tracing::debug!(path = %path, mount_path = %self.mount_path, "Stored secret in Vault");
        Ok(())
    }

    async fn delete_secret(&self, path: &str) -> Result<()> {
        kv2::delete_metadata(&self.client, &self.mount_path, path)
            .await
            .map_err(|e| Self::classify(path, e))
    }
}
