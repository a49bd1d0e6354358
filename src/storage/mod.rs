//! # Storage and Persistence
//!
//! SQLite connectivity shared by the refresh session store, the rotation
//! lock and the security event writer.

pub mod migrations;
pub mod pool;

pub use migrations::{get_migration_version, run_migrations};
pub use pool::{create_memory_pool, create_pool, DbPool};

use crate::errors::{Error, Result};

/// Check database connectivity
pub async fn check_connection(pool: &DbPool) -> Result<()> {
    sqlx::query("SELECT 1")
        .fetch_one(pool)
        .await
        .map_err(|e| Error::database(e, "Database connectivity check failed"))?;

    Ok(())
}

/// Epoch milliseconds, the column format of every timestamp.
pub(crate) fn to_millis(ts: chrono::DateTime<chrono::Utc>) -> i64 {
    ts.timestamp_millis()
}

pub(crate) fn from_millis(ms: i64) -> chrono::DateTime<chrono::Utc> {
    chrono::DateTime::from_timestamp_millis(ms).unwrap_or_default()
}
