//! Append-only delivery log.
//!
//! A row is written here for every successfully resolved job, in the same
//! transaction that removes the job from the active queue. Rows are never
//! updated or deleted.

use serde::{Deserialize, Serialize};
use sqlx::{prelude::FromRow, types::Json, SqliteConnection};

use crate::job::{FallbackPayload, Job};

/// How a job left the active queue.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, strum::Display)]
#[sqlx(type_name = "text")]
#[strum(serialize_all = "snake_case")]
pub enum DeliveryOutcome {
    /// Delivered through the primary transport.
    #[serde(rename = "sent")]
    #[sqlx(rename = "sent")]
    Sent,
    /// Primary destination missing; resolved through the push channel.
    #[serde(rename = "sent_via_fallback")]
    #[sqlx(rename = "sent_via_fallback")]
    SentViaFallback,
}

/// Full snapshot of a job at the moment it was resolved, so the audit trail
/// stands on its own after the queue row is gone. For fallback resolutions
/// this includes the pushed notification content.
#[derive(Serialize, Deserialize, Debug, Clone, FromRow)]
pub struct DeliveryRecord {
    pub id: i64,
    pub job_id: String,
    pub to_addr: Option<String>,
    pub body: String,
    pub fallback: Option<Json<FallbackPayload>>,
    pub attempts: i64,
    pub outcome: DeliveryOutcome,
    pub last_error: Option<String>,
    pub created_at: i64,
    pub processed_at: i64,
}

impl DeliveryRecord {
    pub async fn append(
        db: &mut SqliteConnection,
        job: &Job,
        outcome: DeliveryOutcome,
        now: i64,
    ) -> eyre::Result<()> {
        sqlx::query(
            "INSERT INTO delivery_log (job_id, to_addr, body, fallback, attempts, outcome, last_error, created_at, processed_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(&job.id)
        .bind(&job.to_addr)
        .bind(&job.body)
        .bind(&job.fallback)
        .bind(job.attempts)
        .bind(outcome)
        .bind(&job.last_error)
        .bind(job.created_at)
        .bind(now)
        .execute(db)
        .await?;

        Ok(())
    }

    /// Most recent entries first.
    pub async fn list(db: &mut SqliteConnection, limit: u32) -> eyre::Result<Vec<DeliveryRecord>> {
        Ok(
            sqlx::query_as("SELECT * FROM delivery_log ORDER BY processed_at DESC, id DESC LIMIT $1")
                .bind(limit)
                .fetch_all(db)
                .await?,
        )
    }
}
