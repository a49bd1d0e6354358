//! SQLite persistence for refresh sessions.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, Sqlite};

use super::models::{ClientMetadata, RefreshSession};
use crate::errors::{Error, Result};
use crate::storage::{from_millis, to_millis, DbPool};

#[derive(Debug, Clone, FromRow)]
struct RefreshSessionRow {
    session_id: String,
    user_id: String,
    rotation_hash: String,
    previous_rotation_hash: Option<String>,
    scopes: String,
    client_metadata: String,
    issued_at: i64,
    last_rotated_at: i64,
    expires_at: i64,
    revoked_at: Option<i64>,
    revoke_reason: Option<String>,
    version: i64,
}

impl TryFrom<RefreshSessionRow> for RefreshSession {
    type Error = Error;

    fn try_from(row: RefreshSessionRow) -> Result<Self> {
        Ok(Self {
            session_id: row.session_id,
            user_id: row.user_id,
            rotation_hash: row.rotation_hash,
            previous_rotation_hash: row.previous_rotation_hash,
            scopes: row.scopes.split_whitespace().map(str::to_string).collect(),
            client_metadata: serde_json::from_str::<ClientMetadata>(&row.client_metadata)?,
            issued_at: from_millis(row.issued_at),
            last_rotated_at: from_millis(row.last_rotated_at),
            expires_at: from_millis(row.expires_at),
            revoked_at: row.revoked_at.map(from_millis),
            revoke_reason: row.revoke_reason,
            version: row.version,
        })
    }
}

const SELECT_COLUMNS: &str = "SELECT session_id, user_id, rotation_hash, previous_rotation_hash, scopes, client_metadata, issued_at, last_rotated_at, expires_at, revoked_at, revoke_reason, version FROM refresh_sessions";

#[derive(Debug, Clone)]
pub struct RefreshSessionRepository {
    pool: DbPool,
}

impl RefreshSessionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, session: &RefreshSession) -> Result<()> {
        let metadata = serde_json::to_string(&session.client_metadata)?;
        sqlx::query(
            "INSERT INTO refresh_sessions (session_id, user_id, rotation_hash, previous_rotation_hash, scopes, client_metadata, issued_at, last_rotated_at, expires_at, version) \
             VALUES ($1, $2, $3, NULL, $4, $5, $6, $7, $8, 1)",
        )
        .bind(&session.session_id)
        .bind(&session.user_id)
        .bind(&session.rotation_hash)
        .bind(session.scopes.join(" "))
        .bind(metadata)
        .bind(to_millis(session.issued_at))
        .bind(to_millis(session.last_rotated_at))
        .bind(to_millis(session.expires_at))
        .execute(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, user_id = %session.user_id, "Failed to create refresh session");
            Error::database(e, "Failed to create refresh session")
        })?;
        Ok(())
    }

    pub async fn get(&self, session_id: &str) -> Result<Option<RefreshSession>> {
        let row = sqlx::query_as::<Sqlite, RefreshSessionRow>(&format!(
            "{} WHERE session_id = $1",
            SELECT_COLUMNS
        ))
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::database(e, format!("Failed to load refresh session '{}'", session_id)))?;

        row.map(RefreshSession::try_from).transpose()
    }

    /// Replace the rotation hash only if `expected_hash` is still current and
    /// the session is live, and remember `expected_hash` as consumed. The
    /// update is a single statement, so two callers presenting the same hash
    /// can never both succeed.
    pub async fn compare_and_rotate(
        &self,
        session_id: &str,
        expected_hash: &str,
        new_hash: &str,
        now: DateTime<Utc>,
        new_expires_at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Error::database(e, "Failed to begin refresh rotation"))?;

        let result = sqlx::query(
            "UPDATE refresh_sessions \
             SET previous_rotation_hash = rotation_hash, rotation_hash = $1, last_rotated_at = $2, expires_at = $3, version = version + 1 \
             WHERE session_id = $4 AND rotation_hash = $5 AND revoked_at IS NULL AND expires_at > $2",
        )
        .bind(new_hash)
        .bind(to_millis(now))
        .bind(to_millis(new_expires_at))
        .bind(session_id)
        .bind(expected_hash)
        .execute(&mut *tx)
        .await
        .map_err(|e| Error::database(e, format!("Failed to rotate refresh session '{}'", session_id)))?;

        if result.rows_affected() != 1 {
            return Ok(false);
        }

        sqlx::query(
            "INSERT OR IGNORE INTO refresh_rotation_history (session_id, rotation_hash, consumed_at) VALUES ($1, $2, $3)",
        )
        .bind(session_id)
        .bind(expected_hash)
        .bind(to_millis(now))
        .execute(&mut *tx)
        .await
        .map_err(|e| Error::database(e, format!("Failed to record consumed refresh token of '{}'", session_id)))?;

        tx.commit()
            .await
            .map_err(|e| Error::database(e, format!("Failed to commit refresh rotation of '{}'", session_id)))?;
        Ok(true)
    }

    /// Whether `rotation_hash` was once current for the session and has
    /// since been consumed.
    pub async fn was_consumed(&self, session_id: &str, rotation_hash: &str) -> Result<bool> {
        let found: Option<i64> = sqlx::query_scalar(
            "SELECT 1 FROM refresh_rotation_history WHERE session_id = $1 AND rotation_hash = $2",
        )
        .bind(session_id)
        .bind(rotation_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::database(e, format!("Failed to look up refresh history of '{}'", session_id)))?;
        Ok(found.is_some())
    }

    /// Revoke a live session. Returns false if it was already revoked or
    /// does not exist.
    pub async fn revoke(&self, session_id: &str, reason: &str, now: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE refresh_sessions SET revoked_at = $1, revoke_reason = $2, version = version + 1 \
             WHERE session_id = $3 AND revoked_at IS NULL",
        )
        .bind(to_millis(now))
        .bind(reason)
        .bind(session_id)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::database(e, format!("Failed to revoke refresh session '{}'", session_id)))?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn revoke_user(&self, user_id: &str, reason: &str, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE refresh_sessions SET revoked_at = $1, revoke_reason = $2, version = version + 1 \
             WHERE user_id = $3 AND revoked_at IS NULL",
        )
        .bind(to_millis(now))
        .bind(reason)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::database(e, format!("Failed to revoke sessions of user '{}'", user_id)))?;

        Ok(result.rows_affected())
    }

    /// Delete sessions that expired or were revoked before `cutoff`.
    pub async fn delete_finished_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let cutoff = to_millis(cutoff);
        let result = sqlx::query(
            "DELETE FROM refresh_sessions WHERE expires_at < $1 OR (revoked_at IS NOT NULL AND revoked_at < $1)",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::database(e, "Failed to delete finished refresh sessions"))?;

        sqlx::query(
            "DELETE FROM refresh_rotation_history WHERE session_id NOT IN (SELECT session_id FROM refresh_sessions)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| Error::database(e, "Failed to delete refresh history of finished sessions"))?;

        Ok(result.rows_affected())
    }

    pub async fn count_active_for_user(&self, user_id: &str, now: DateTime<Utc>) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM refresh_sessions WHERE user_id = $1 AND revoked_at IS NULL AND expires_at > $2",
        )
        .bind(user_id)
        .bind(to_millis(now))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| Error::database(e, "Failed to count refresh sessions"))?;
        Ok(count)
    }
}
