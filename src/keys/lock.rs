//! Per-key-type rotation locks.
//!
//! A lock is a lease: it expires on its own if the holder dies, so a crashed
//! rotation never wedges the key type. Acquisition polls until a deadline and
//! returns `None` on timeout; callers treat that as "try again later".

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration as StdDuration;
use tracing::{debug, warn};
use uuid::Uuid;

use super::types::KeyType;
use crate::clock::SharedClock;
use crate::errors::{Error, Result};
use crate::storage::{to_millis, DbPool};

const POLL_INTERVAL: StdDuration = StdDuration::from_millis(50);

/// Proof of holding the lock for one key type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockLease {
    pub key_type: KeyType,
    pub holder: String,
    pub expires_at: DateTime<Utc>,
}

#[async_trait]
pub trait RotationLock: Send + Sync {
    /// Wait up to `timeout` for the lock. `Ok(None)` means it stayed taken.
    async fn acquire(&self, key_type: KeyType, timeout: StdDuration) -> Result<Option<LockLease>>;

    /// Release a lease. Releasing a lease that already expired and was taken
    /// over by someone else is a no-op.
    async fn release(&self, lease: &LockLease) -> Result<()>;
}

/// Lease rows in the shared database; serializes rotations across nodes.
pub struct SqlxRotationLock {
    pool: DbPool,
    clock: SharedClock,
    lease: Duration,
}

impl SqlxRotationLock {
    pub fn new(pool: DbPool, clock: SharedClock, lease: Duration) -> Self {
        Self { pool, clock, lease }
    }

    async fn try_acquire(&self, key_type: KeyType, holder: &str) -> Result<Option<LockLease>> {
        let now = self.clock.now();
        let expires_at = now + self.lease;
        let result = sqlx::query(
            "INSERT INTO rotation_locks (key_type, holder, acquired_at, expires_at) VALUES ($1, $2, $3, $4) \
             ON CONFLICT(key_type) DO UPDATE SET holder = excluded.holder, acquired_at = excluded.acquired_at, expires_at = excluded.expires_at \
             WHERE rotation_locks.expires_at <= $3",
        )
        .bind(key_type.as_str())
        .bind(holder)
        .bind(to_millis(now))
        .bind(to_millis(expires_at))
        .execute(&self.pool)
        .await
        .map_err(|e| Error::database(e, format!("Failed to acquire rotation lock '{}'", key_type)))?;

        if result.rows_affected() == 1 {
            Ok(Some(LockLease { key_type, holder: holder.to_string(), expires_at }))
        } else {
            Ok(None)
        }
    }
}

#[async_trait]
impl RotationLock for SqlxRotationLock {
    async fn acquire(&self, key_type: KeyType, timeout: StdDuration) -> Result<Option<LockLease>> {
        let holder = Uuid::new_v4().to_string();
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(lease) = self.try_acquire(key_type, &holder).await? {
                debug!(key_type = %key_type, holder = %holder, "Acquired rotation lock");
                return Ok(Some(lease));
            }
            if tokio::time::Instant::now() + POLL_INTERVAL > deadline {
                return Ok(None);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn release(&self, lease: &LockLease) -> Result<()> {
        let result = sqlx::query("DELETE FROM rotation_locks WHERE key_type = $1 AND holder = $2")
            .bind(lease.key_type.as_str())
            .bind(&lease.holder)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::database(e, format!("Failed to release rotation lock '{}'", lease.key_type))
            })?;
        if result.rows_affected() == 0 {
            warn!(key_type = %lease.key_type, "Rotation lock lease had already been taken over");
        }
        Ok(())
    }
}

/// In-process lock for single-node deployments and tests.
pub struct LocalRotationLock {
    clock: SharedClock,
    lease: Duration,
    held: Mutex<HashMap<KeyType, LockLease>>,
}

impl LocalRotationLock {
    pub fn new(clock: SharedClock, lease: Duration) -> Self {
        Self { clock, lease, held: Mutex::new(HashMap::new()) }
    }

    fn try_acquire(&self, key_type: KeyType) -> Option<LockLease> {
        let now = self.clock.now();
        let mut held = self.held.lock().unwrap_or_else(|p| p.into_inner());
        if held.get(&key_type).is_some_and(|lease| lease.expires_at > now) {
            return None;
        }
        let lease =
            LockLease { key_type, holder: Uuid::new_v4().to_string(), expires_at: now + self.lease };
        held.insert(key_type, lease.clone());
        Some(lease)
    }
}

#[async_trait]
impl RotationLock for LocalRotationLock {
    async fn acquire(&self, key_type: KeyType, timeout: StdDuration) -> Result<Option<LockLease>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(lease) = self.try_acquire(key_type) {
                return Ok(Some(lease));
            }
            if tokio::time::Instant::now() + POLL_INTERVAL > deadline {
                return Ok(None);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn release(&self, lease: &LockLease) -> Result<()> {
        let mut held = self.held.lock().unwrap_or_else(|p| p.into_inner());
        if held.get(&lease.key_type).is_some_and(|current| current.holder == lease.holder) {
            held.remove(&lease.key_type);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::storage::create_memory_pool;

    #[tokio::test]
    async fn test_sqlx_lock_excludes_second_holder() {
        let pool = create_memory_pool().await.unwrap();
        let clock = ManualClock::starting_now();
        let lock = SqlxRotationLock::new(pool, clock.clone(), Duration::seconds(60));

        let lease = lock.acquire(KeyType::Signing, StdDuration::from_millis(10)).await.unwrap();
        assert!(lease.is_some());
        assert!(lock.acquire(KeyType::Signing, StdDuration::from_millis(10)).await.unwrap().is_none());
        assert!(lock.acquire(KeyType::Encryption, StdDuration::from_millis(10)).await.unwrap().is_some());

        lock.release(&lease.unwrap()).await.unwrap();
        assert!(lock.acquire(KeyType::Signing, StdDuration::from_millis(10)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_sqlx_lock_expired_lease_is_taken_over() {
        let pool = create_memory_pool().await.unwrap();
        let clock = ManualClock::starting_now();
        let lock = SqlxRotationLock::new(pool, clock.clone(), Duration::seconds(60));

        let stale = lock.acquire(KeyType::Signing, StdDuration::from_millis(10)).await.unwrap().unwrap();
        clock.advance(Duration::seconds(61));
        let fresh = lock.acquire(KeyType::Signing, StdDuration::from_millis(10)).await.unwrap().unwrap();
        assert_ne!(stale.holder, fresh.holder);

        // The stale holder cannot release the new lease.
        lock.release(&stale).await.unwrap();
        assert!(lock.acquire(KeyType::Signing, StdDuration::from_millis(10)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_local_lock() {
        let clock = ManualClock::starting_now();
        let lock = LocalRotationLock::new(clock.clone(), Duration::seconds(60));
        let lease = lock.acquire(KeyType::Encryption, StdDuration::from_millis(10)).await.unwrap().unwrap();
        assert!(lock.acquire(KeyType::Encryption, StdDuration::from_millis(10)).await.unwrap().is_none());
        lock.release(&lease).await.unwrap();
        assert!(lock.acquire(KeyType::Encryption, StdDuration::from_millis(10)).await.unwrap().is_some());
    }
}
