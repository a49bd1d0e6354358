//! # Database Migration Management
//!
//! Schema migrations are embedded into the binary from `migrations/` and
//! applied on startup when `auto_migrate` is enabled.

use crate::errors::Result;
use crate::storage::DbPool;
use sqlx::migrate::Migrator;
use tracing::info;

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Apply all pending migrations.
pub async fn run_migrations(pool: &DbPool) -> Result<()> {
    MIGRATOR.run(pool).await?;
    info!(migrations = MIGRATOR.iter().count(), "Database migrations applied");
    Ok(())
}

/// Highest applied migration version, if any.
pub async fn get_migration_version(pool: &DbPool) -> Result<Option<i64>> {
    let version: Option<i64> =
        sqlx::query_scalar("SELECT MAX(version) FROM _sqlx_migrations WHERE success = 1")
            .fetch_one(pool)
            .await?;
    Ok(version)
}
