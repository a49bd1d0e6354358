//! # Database Connection Pool Management
//!
//! SQLite pool creation. File databases run in WAL mode; an in-memory
//! database is pinned to one long-lived connection so every query sees the
//! same schema.

use crate::config::DatabaseConfig;
use crate::errors::{Error, Result};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    Pool, Sqlite,
};
use std::{str::FromStr, time::Duration};

/// Type alias for the database connection pool
pub type DbPool = Pool<Sqlite>;

const SQLITE_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

fn is_in_memory(url: &str) -> bool {
    url.contains(":memory:") || url.contains("mode=memory")
}

/// Create a database connection pool with the specified configuration
pub async fn create_pool(config: &DatabaseConfig) -> Result<DbPool> {
    if config.url.is_empty() {
        return Err(Error::validation("database URL cannot be empty"));
    }

    let in_memory = is_in_memory(&config.url);

    let mut connect_options = SqliteConnectOptions::from_str(&config.url)
        .map_err(|e| Error::database(e, "Invalid SQLite connection string"))?
        .create_if_missing(true)
        .busy_timeout(SQLITE_BUSY_TIMEOUT);
    if !in_memory {
        connect_options = connect_options.journal_mode(SqliteJournalMode::Wal);
    }

    let pool_options = if in_memory {
        SqlitePoolOptions::new().max_connections(1).idle_timeout(None).max_lifetime(None)
    } else {
        SqlitePoolOptions::new().max_connections(config.max_connections)
    };

    let pool = pool_options
        .acquire_timeout(config.connect_timeout())
        .connect_with(connect_options)
        .await
        .map_err(|e| {
            tracing::error!(
                error = %e,
                url = %config.url,
                busy_timeout_ms = SQLITE_BUSY_TIMEOUT.as_millis(),
                "Failed to create SQLite database pool"
            );
            Error::database(e, "Failed to connect to database")
        })?;

    tracing::info!(
        in_memory,
        max_connections = if in_memory { 1 } else { config.max_connections },
        connect_timeout_ms = config.connect_timeout().as_millis(),
        "Database connection pool created"
    );

    if config.auto_migrate {
        crate::storage::migrations::run_migrations(&pool).await?;
    }

    Ok(pool)
}

/// In-memory pool with migrations applied.
pub async fn create_memory_pool() -> Result<DbPool> {
    let config = DatabaseConfig { url: "sqlite::memory:".to_string(), ..Default::default() };
    create_pool(&config).await
}
