//! Job types and store operations for the delivery queue.
//!
//! Each row in `jobs` is one outbound message, keyed by a caller-supplied
//! dedupe key. Jobs move through `pending` -> `processing` -> deleted on
//! success, or back to `retrying` with an advanced `next_attempt_at` on a
//! recoverable failure, or to terminal `failed` once the attempt budget is
//! exhausted.
//!
//! All mutation of a claimed job is guarded by the claiming worker's lease:
//! updates match on `locked_by` so a reclaimed job cannot be resolved by a
//! worker whose lease already expired.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use sqlx::{prelude::FromRow, types::Json, SqliteConnection};

/// Current status of a job in the active queue.
///
/// `Pending` and `Retrying` rows are claimable once their `next_attempt_at`
/// has passed. `Processing` rows are owned by the worker named in
/// `locked_by` until `lock_expires_at`. `Failed` is terminal; only an
/// operator reset returns such a row to `Pending`.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, strum::Display)]
#[sqlx(type_name = "text")]
#[strum(serialize_all = "lowercase")]
pub enum JobStatus {
    #[serde(rename = "pending")]
    #[sqlx(rename = "pending")]
    Pending,
    #[serde(rename = "processing")]
    #[sqlx(rename = "processing")]
    Processing,
    #[serde(rename = "retrying")]
    #[sqlx(rename = "retrying")]
    Retrying,
    #[serde(rename = "failed")]
    #[sqlx(rename = "failed")]
    Failed,
}

/// Secondary notification content, delivered over the push channel when the
/// primary destination is unusable.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct FallbackPayload {
    /// Entity whose registered device tokens receive the notification.
    pub entity_id: String,
    pub title: String,
    pub body: String,
    /// Routing data forwarded verbatim to the push provider.
    #[serde(default)]
    pub data: HashMap<String, String>,
}

/// One outbound message job.
///
/// Timestamps are unix milliseconds. `to_addr` is stored exactly as given;
/// destination normalization happens before enqueue.
#[derive(Serialize, Deserialize, Debug, Clone, FromRow)]
pub struct Job {
    /// Caller-chosen dedupe key, immutable and globally unique.
    pub id: String,
    pub to_addr: Option<String>,
    pub body: String,
    pub fallback: Option<Json<FallbackPayload>>,

    pub status: JobStatus,
    /// Delivery attempts made so far. Monotonically non-decreasing.
    pub attempts: i64,

    pub created_at: i64,
    pub next_attempt_at: i64,

    pub locked_by: Option<String>,
    pub locked_at: Option<i64>,
    pub lock_expires_at: Option<i64>,

    pub last_error: Option<String>,
}

/// Outcome of an enqueue call. A duplicate key is a no-op, not an error.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Enqueue {
    Queued,
    Duplicate,
}

impl Job {
    /// Conditional insert keyed by the dedupe key. Returns [`Enqueue::Duplicate`]
    /// when a row with this key already exists, leaving the first payload
    /// untouched.
    pub async fn insert_if_absent(
        db: &mut SqliteConnection,
        id: &str,
        to_addr: Option<&str>,
        body: &str,
        fallback: Option<&FallbackPayload>,
        now: i64,
    ) -> eyre::Result<Enqueue> {
        let fallback = fallback
            .map(serde_json::to_string)
            .transpose()?;

        let result = sqlx::query(
            "INSERT INTO jobs (id, to_addr, body, fallback, status, attempts, created_at, next_attempt_at)
             VALUES ($1, $2, $3, $4, 'pending', 0, $5, $5)
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(id)
        .bind(to_addr)
        .bind(body)
        .bind(fallback)
        .bind(now)
        .execute(db)
        .await?;

        if result.rows_affected() == 0 {
            Ok(Enqueue::Duplicate)
        } else {
            Ok(Enqueue::Queued)
        }
    }

    /// Ids of jobs eligible for claiming, oldest due first.
    pub async fn claimable(
        db: &mut SqliteConnection,
        limit: u32,
        now: i64,
    ) -> eyre::Result<Vec<String>> {
        Ok(sqlx::query_scalar(
            "SELECT id FROM jobs
             WHERE status IN ('pending', 'retrying') AND next_attempt_at <= $1
             ORDER BY next_attempt_at ASC
             LIMIT $2",
        )
        .bind(now)
        .bind(limit)
        .fetch_all(db)
        .await?)
    }

    /// Atomically claims a job for `worker_id` until `now + lease_ms`.
    ///
    /// The update matches only claimable state, so of any number of
    /// concurrent callers exactly one gets the row back; the rest get `None`.
    /// Losing the race is an expected outcome, not an error.
    pub async fn try_claim(
        db: &mut SqliteConnection,
        id: &str,
        worker_id: &str,
        lease_ms: i64,
        now: i64,
    ) -> eyre::Result<Option<Job>> {
        Ok(sqlx::query_as(
            "UPDATE jobs
             SET status = 'processing', locked_by = $1, locked_at = $2, lock_expires_at = $3
             WHERE id = $4 AND status IN ('pending', 'retrying') AND next_attempt_at <= $2
             RETURNING *",
        )
        .bind(worker_id)
        .bind(now)
        .bind(now + lease_ms)
        .bind(id)
        .fetch_optional(db)
        .await?)
    }

    pub async fn find(db: &mut SqliteConnection, id: &str) -> eyre::Result<Option<Job>> {
        Ok(sqlx::query_as("SELECT * FROM jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(db)
            .await?)
    }

    pub async fn list(db: &mut SqliteConnection) -> eyre::Result<Vec<Job>> {
        Ok(sqlx::query_as("SELECT * FROM jobs ORDER BY created_at ASC")
            .fetch_all(db)
            .await?)
    }

    /// Reschedules a claimed job after a recoverable failure. Matches on the
    /// caller's lease; returns false if the lease was lost in the meantime.
    pub async fn mark_retrying(
        db: &mut SqliteConnection,
        id: &str,
        worker_id: &str,
        attempts: i64,
        next_attempt_at: i64,
        last_error: &str,
    ) -> eyre::Result<bool> {
        let result = sqlx::query(
            "UPDATE jobs
             SET status = 'retrying', attempts = $1, next_attempt_at = $2, last_error = $3,
                 locked_by = NULL, locked_at = NULL, lock_expires_at = NULL
             WHERE id = $4 AND status = 'processing' AND locked_by = $5",
        )
        .bind(attempts)
        .bind(next_attempt_at)
        .bind(last_error)
        .bind(id)
        .bind(worker_id)
        .execute(db)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Terminal failure. The row stays in the store for operator inspection.
    pub async fn mark_failed(
        db: &mut SqliteConnection,
        id: &str,
        worker_id: &str,
        attempts: i64,
        last_error: &str,
    ) -> eyre::Result<bool> {
        let result = sqlx::query(
            "UPDATE jobs
             SET status = 'failed', attempts = $1, last_error = $2,
                 locked_by = NULL, locked_at = NULL, lock_expires_at = NULL
             WHERE id = $3 AND status = 'processing' AND locked_by = $4",
        )
        .bind(attempts)
        .bind(last_error)
        .bind(id)
        .bind(worker_id)
        .execute(db)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn delete(db: &mut SqliteConnection, id: &str) -> eyre::Result<()> {
        sqlx::query("DELETE FROM jobs WHERE id = $1")
            .bind(id)
            .execute(db)
            .await?;

        Ok(())
    }

    /// Returns every job whose lease expired without resolution to the
    /// claimable pool. Attempts and schedule are left untouched.
    pub async fn reclaim_expired(db: &mut SqliteConnection, now: i64) -> eyre::Result<u64> {
        let result = sqlx::query(
            "UPDATE jobs
             SET status = 'pending', locked_by = NULL, locked_at = NULL, lock_expires_at = NULL
             WHERE status = 'processing' AND lock_expires_at < $1",
        )
        .bind(now)
        .execute(db)
        .await?;

        Ok(result.rows_affected())
    }

    /// Operator reset of a terminal-failed job back into the claimable pool.
    pub async fn reset_failed(db: &mut SqliteConnection, id: &str, now: i64) -> eyre::Result<bool> {
        let result = sqlx::query(
            "UPDATE jobs
             SET status = 'pending', attempts = 0, next_attempt_at = $1, last_error = NULL
             WHERE id = $2 AND status = 'failed'",
        )
        .bind(now)
        .bind(id)
        .execute(db)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}
