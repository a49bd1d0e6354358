//! Encrypted local cache for secret values.
//!
//! Values are sealed with AES-256-GCM under a key generated at process start
//! and never persisted, with the secret path as additional authenticated
//! data. A value that fails to open is evicted and reported as corrupted;
//! it is never returned.

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use super::error::{Result, SecretsError};
use super::types::SecretString;
use crate::crypto::{AeadKey, NONCE_SIZE};

struct CacheEntry {
    ciphertext: Vec<u8>,
    nonce: [u8; NONCE_SIZE],
    fetched_at: DateTime<Utc>,
}

/// Decrypted cache hit.
#[derive(Debug, Clone)]
pub struct CachedSecret {
    pub value: SecretString,
    pub fetched_at: DateTime<Utc>,
}

pub struct EncryptedCache {
    key: AeadKey,
    entries: DashMap<String, CacheEntry>,
}

impl EncryptedCache {
    pub fn new() -> Result<Self> {
        let key = AeadKey::generate()
            .map_err(|e| SecretsError::internal(format!("cache key generation failed: {}", e)))?;
        Ok(Self { key, entries: DashMap::new() })
    }

    pub fn get(&self, path: &str) -> Result<Option<CachedSecret>> {
        let opened = match self.entries.get(path) {
            None => return Ok(None),
            Some(entry) => self
                .key
                .open(&entry.ciphertext, &entry.nonce, path.as_bytes())
                .map(|plaintext| (plaintext, entry.fetched_at)),
        };

        match opened {
            Ok((plaintext, fetched_at)) => {
                let value = String::from_utf8(plaintext).map_err(|_| {
                    self.entries.remove(path);
                    SecretsError::corrupted(path)
                })?;
                Ok(Some(CachedSecret { value: SecretString::new(value), fetched_at }))
            }
            Err(e) => {
                tracing::error!(path = %path, error = %e, "Cached secret failed to decrypt; evicting");
                self.entries.remove(path);
                Err(SecretsError::corrupted(path))
            }
        }
    }

    pub fn insert(&self, path: &str, value: &SecretString, fetched_at: DateTime<Utc>) -> Result<()> {
        let (ciphertext, nonce) = self
            .key
            .seal(value.expose_secret().as_bytes(), path.as_bytes())
            .map_err(|e| SecretsError::internal(format!("cache seal failed: {}", e)))?;
        self.entries.insert(path.to_string(), CacheEntry { ciphertext, nonce, fetched_at });
        Ok(())
    }

    pub fn remove(&self, path: &str) -> bool {
        self.entries.remove(path).is_some()
    }

    /// Drop every entry, returning how many were removed.
    pub fn clear(&self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn corrupt(&self, path: &str) {
        if let Some(mut entry) = self.entries.get_mut(path) {
            if let Some(byte) = entry.ciphertext.first_mut() {
                *byte ^= 0xFF;
            }
        }
    }
}
