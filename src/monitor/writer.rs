//! Persistence of security events.
//!
//! [`SecurityLog`](super::SecurityLog) hands events to a bounded channel;
//! [`SecurityEventWriter`] drains it into the `security_events` table on a
//! background task. [`SecurityEventRepository`] answers the read side.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, Sqlite};
use std::collections::BTreeMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::events::{SecurityEvent, SecurityEventKind, Severity};
use crate::errors::{Error, Result};
use crate::storage::{from_millis, to_millis, DbPool};

#[derive(Debug, Clone, FromRow)]
struct SecurityEventRow {
    id: String,
    kind: String,
    severity: String,
    occurred_at: i64,
    metadata: String,
}

impl TryFrom<SecurityEventRow> for SecurityEvent {
    type Error = Error;

    fn try_from(row: SecurityEventRow) -> Result<Self> {
        Ok(SecurityEvent {
            id: row
                .id
                .parse()
                .map_err(|_| Error::internal(format!("invalid event id '{}'", row.id)))?,
            kind: row.kind.parse().map_err(|e| Error::internal(format!("{}", e)))?,
            severity: row.severity.parse().map_err(|e| Error::internal(format!("{}", e)))?,
            timestamp: from_millis(row.occurred_at),
            metadata: serde_json::from_str(&row.metadata)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct SecurityEventRepository {
    pool: DbPool,
}

impl SecurityEventRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, event: &SecurityEvent) -> Result<()> {
        let metadata = serde_json::to_string(&event.metadata)?;
        sqlx::query(
            "INSERT INTO security_events (id, kind, severity, occurred_at, metadata) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(event.id.to_string())
        .bind(event.kind.as_str())
        .bind(event.severity.as_str())
        .bind(to_millis(event.timestamp))
        .bind(metadata)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::database(e, format!("Failed to persist security event {}", event.id)))?;
        Ok(())
    }

    /// Events at or after `since`, newest first.
    pub async fn list_since(&self, since: DateTime<Utc>, limit: i64) -> Result<Vec<SecurityEvent>> {
        let rows = sqlx::query_as::<Sqlite, SecurityEventRow>(
            "SELECT id, kind, severity, occurred_at, metadata FROM security_events WHERE occurred_at >= $1 ORDER BY occurred_at DESC LIMIT $2",
        )
        .bind(to_millis(since))
        .bind(limit.clamp(1, 1000))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::database(e, "Failed to list security events"))?;

        rows.into_iter().map(SecurityEvent::try_from).collect()
    }

    pub async fn count_by_severity(&self, since: DateTime<Utc>) -> Result<BTreeMap<Severity, u64>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT severity, COUNT(*) FROM security_events WHERE occurred_at >= $1 GROUP BY severity",
        )
        .bind(to_millis(since))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::database(e, "Failed to count security events"))?;

        let mut counts: BTreeMap<Severity, u64> = Severity::ALL.iter().map(|s| (*s, 0)).collect();
        for (severity, count) in rows {
            let severity: Severity =
                severity.parse().map_err(|e| Error::internal(format!("{}", e)))?;
            counts.insert(severity, count.max(0) as u64);
        }
        Ok(counts)
    }

    pub async fn count_kind(&self, kind: SecurityEventKind) -> Result<u64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM security_events WHERE kind = $1")
            .bind(kind.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| Error::database(e, "Failed to count security events"))?;
        Ok(count.max(0) as u64)
    }
}

pub struct SecurityEventWriter {
    repository: SecurityEventRepository,
    receiver: mpsc::Receiver<SecurityEvent>,
}

impl SecurityEventWriter {
    /// Create a writer and the sender to attach to the security log.
    pub fn channel(pool: DbPool, buffer: usize) -> (mpsc::Sender<SecurityEvent>, Self) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (tx, Self { repository: SecurityEventRepository::new(pool), receiver: rx })
    }

    /// Drain the queue until cancelled or every sender is gone. Pending
    /// events are flushed before returning.
    pub fn spawn(mut self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    next = self.receiver.recv() => match next {
                        Some(event) => self.persist(event).await,
                        None => break,
                    },
                    _ = shutdown.cancelled() => {
                        self.receiver.close();
                        while let Some(event) = self.receiver.recv().await {
                            self.persist(event).await;
                        }
                        break;
                    }
                }
            }
            info!("Security event writer stopped");
        })
    }

    async fn persist(&self, event: SecurityEvent) {
        match self.repository.insert(&event).await {
            Ok(()) => debug!(event_id = %event.id, kind = %event.kind, "Persisted security event"),
            Err(e) => error!(event_id = %event.id, error = %e, "Failed to persist security event"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::create_memory_pool;
    use chrono::Duration;

    #[tokio::test]
    async fn test_insert_and_query() {
        let pool = create_memory_pool().await.unwrap();
        let repo = SecurityEventRepository::new(pool);
        let now = Utc::now();

        let old = SecurityEvent::new(SecurityEventKind::CircuitOpened, now - Duration::days(2));
        let recent =
            SecurityEvent::new(SecurityEventKind::RefreshTokenReuse, now).with("session_id", "s1");
        repo.insert(&old).await.unwrap();
        repo.insert(&recent).await.unwrap();

        let listed = repo.list_since(now - Duration::hours(1), 10).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, recent.id);
        assert_eq!(listed[0].metadata.get("session_id").map(String::as_str), Some("s1"));

        let counts = repo.count_by_severity(now - Duration::days(3)).await.unwrap();
        assert_eq!(counts[&Severity::Critical], 1);
        assert_eq!(counts[&Severity::Medium], 1);
        assert_eq!(repo.count_kind(SecurityEventKind::CircuitOpened).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_writer_flushes_on_shutdown() {
        let pool = create_memory_pool().await.unwrap();
        let (tx, writer) = SecurityEventWriter::channel(pool.clone(), 8);
        let shutdown = CancellationToken::new();
        let handle = writer.spawn(shutdown.clone());

        for _ in 0..3 {
            tx.send(SecurityEvent::new(SecurityEventKind::KeyRotated, Utc::now())).await.unwrap();
        }
        shutdown.cancel();
        handle.await.unwrap();

        let repo = SecurityEventRepository::new(pool);
        assert_eq!(repo.count_kind(SecurityEventKind::KeyRotated).await.unwrap(), 3);
    }
}
