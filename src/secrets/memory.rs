//! In-process secret store for development and tests.
//!
//! Values live in a `DashMap`. An availability switch simulates an outage of
//! the external store: while unavailable every call fails with
//! `ConnectionFailed`. Writes to selected paths can be acknowledged without
//! being stored, which exercises the rotation read-back check.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use super::error::{Result, SecretsError};
use super::store::{validate_path, SecretStore};
use super::types::SecretString;

#[derive(Debug, Default)]
pub struct InMemorySecretStore {
    values: DashMap<String, SecretString>,
    ignored_writes: DashMap<String, ()>,
    unavailable: AtomicBool,
    calls: AtomicU64,
}

impl InMemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggle the simulated outage.
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Number of backend calls made so far (reads, writes and deletes).
    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Acknowledge writes to `path` without storing them.
    pub fn ignore_writes(&self, path: &str) {
        self.ignored_writes.insert(path.to_string(), ());
    }

    pub fn accept_writes(&self, path: &str) {
        self.ignored_writes.remove(path);
    }

    /// Direct write that bypasses the availability switch and call counter.
    pub fn seed(&self, path: &str, value: impl Into<SecretString>) {
        self.values.insert(path.to_string(), value.into());
    }

    /// Direct read that bypasses the availability switch and call counter.
    pub fn peek(&self, path: &str) -> Option<SecretString> {
        self.values.get(path).map(|v| v.clone())
    }

    fn enter(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(SecretsError::connection_failed("in-memory store marked unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl SecretStore for InMemorySecretStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn get_secret(&self, path: &str) -> Result<SecretString> {
        self.enter()?;
        validate_path(path)?;
        self.values.get(path).map(|v| v.clone()).ok_or_else(|| SecretsError::not_found(path))
    }

    async fn set_secret(&self, path: &str, value: &SecretString) -> Result<()> {
        self.enter()?;
        validate_path(path)?;
        if self.ignored_writes.contains_key(path) {
            return Ok(());
        }
        self.values.insert(path.to_string(), value.clone());
        Ok(())
    }

    async fn delete_secret(&self, path: &str) -> Result<()> {
        self.enter()?;
        self.values.remove(path).map(|_| ()).ok_or_else(|| SecretsError::not_found(path))
    }
}
