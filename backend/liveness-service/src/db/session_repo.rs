use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{AppError, Result};
use crate::models::{BackendKind, LiveSession, LiveSessionRow};
use crate::services::liveness_key::LivenessKey;

/// Durable session records owned by the CRUD layer.
#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Live sessions of `backend` created more than `threshold` ago.
    async fn find_sessions_older_than(
        &self,
        backend: BackendKind,
        threshold: Duration,
    ) -> Result<Vec<LiveSession>>;

    /// Ids of live sessions matching a liveness key identity.
    async fn find_session_ids(&self, key: &LivenessKey) -> Result<Vec<i64>>;

    /// Set `remark` on the sessions, then remove them from the live set.
    ///
    /// Rows already removed are skipped; returns how many were removed now.
    async fn mark_and_delete(&self, ids: &[i64], remark: &str) -> Result<u64>;

    /// Add `secs` to the recorded duration of the parent record.
    async fn extend_duration(&self, record_id: i64, secs: u64) -> Result<()>;
}

pub struct PgSessionRepository {
    pool: PgPool,
}

impl PgSessionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionRepository for PgSessionRepository {
    async fn find_sessions_older_than(
        &self,
        backend: BackendKind,
        threshold: Duration,
    ) -> Result<Vec<LiveSession>> {
        let threshold = chrono::Duration::from_std(threshold)
            .map_err(|e| AppError::Internal(format!("staleness threshold out of range: {}", e)))?;
        let cutoff = Utc::now() - threshold;

        let rows = sqlx::query_as::<_, LiveSessionRow>(
            "SELECT id, room_id, record_id, stream_id, backend, remark, created_at
             FROM live_sessions
             WHERE backend = $1 AND created_at < $2 AND deleted_at IS NULL
             ORDER BY id",
        )
        .bind(backend.as_str())
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        let mut sessions = Vec::with_capacity(rows.len());
        for row in rows {
            let id = row.id;
            match LiveSession::try_from(row) {
                Ok(session) => sessions.push(session),
                Err(e) => warn!(session_id = id, error = %e, "Skipping unreadable session row"),
            }
        }
        Ok(sessions)
    }

    async fn find_session_ids(&self, key: &LivenessKey) -> Result<Vec<i64>> {
        let ids: Vec<i64> = sqlx::query_scalar(
            "SELECT id FROM live_sessions
             WHERE room_id = $1 AND record_id = $2 AND stream_id = $3
               AND backend = $4 AND deleted_at IS NULL",
        )
        .bind(key.room_id)
        .bind(key.record_id)
        .bind(key.stream_id)
        .bind(key.backend.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }

    async fn mark_and_delete(&self, ids: &[i64], remark: &str) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        // The remark must be committed before removal.
        sqlx::query(
            "UPDATE live_sessions SET remark = $2, updated_at = NOW()
             WHERE id = ANY($1) AND deleted_at IS NULL",
        )
        .bind(ids)
        .bind(remark)
        .execute(&self.pool)
        .await?;

        let removed = sqlx::query(
            "UPDATE live_sessions SET deleted_at = NOW()
             WHERE id = ANY($1) AND deleted_at IS NULL",
        )
        .bind(ids)
        .execute(&self.pool)
        .await?
        .rows_affected();

        debug!(requested = ids.len(), removed, remark, "sessions marked and removed");
        Ok(removed)
    }

    async fn extend_duration(&self, record_id: i64, secs: u64) -> Result<()> {
        let secs = i64::try_from(secs)
            .map_err(|_| AppError::Internal(format!("duration extension too large: {}", secs)))?;

        let updated = sqlx::query(
            "UPDATE live_records SET duration_secs = duration_secs + $2, updated_at = NOW()
             WHERE id = $1",
        )
        .bind(record_id)
        .bind(secs)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 0 {
            debug!(record_id, "no live record to extend");
        }
        Ok(())
    }
}
