use chrono::Utc;
use sqlx::{
    sqlite::{
        SqliteAutoVacuum, SqliteConnectOptions, SqliteJournalMode, SqliteLockingMode,
        SqlitePoolOptions,
    },
    Acquire, SqlitePool,
};

use crate::{
    config::Config,
    history::{DeliveryOutcome, DeliveryRecord},
    job::{Enqueue, FallbackPayload, Job},
    retry::{RetryDecision, RetryPolicy},
};

/// What became of a claimed job after a failed delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureDisposition {
    Retrying { next_attempt_at: i64 },
    Failed,
    /// The lease was lost before the transition could be applied; some other
    /// actor (the reclaimer) owns the job's fate now.
    LeaseLost,
}

pub struct Service {
    db: SqlitePool,
    config: Config,
    policy: RetryPolicy,
}

impl Service {
    pub async fn connect() -> eyre::Result<Self> {
        Self::connect_with(Config::default()).await
    }

    pub async fn connect_with(config: Config) -> eyre::Result<Self> {
        let (opts, pool_opts) = if let Some(path) = config.db_path() {
            (
                SqliteConnectOptions::new()
                    .filename(path)
                    .create_if_missing(true),
                SqlitePoolOptions::new(),
            )
        } else {
            // A private in-memory database exists per connection, so the
            // pool must not open more than one.
            (
                SqliteConnectOptions::new().in_memory(true),
                SqlitePoolOptions::new().max_connections(1),
            )
        };

        let opts = opts
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .locking_mode(SqliteLockingMode::Normal)
            .optimize_on_close(true, None)
            .auto_vacuum(SqliteAutoVacuum::Full);

        let pool = pool_opts.connect_with(opts).await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        let policy = RetryPolicy {
            max_attempts: config.max_attempts(),
            base_delay: config.base_backoff(),
            ..RetryPolicy::default()
        };

        Ok(Self {
            db: pool,
            config,
            policy,
        })
    }

    pub fn db(&self) -> &SqlitePool {
        &self.db
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    fn now(&self) -> i64 {
        Utc::now().timestamp_millis()
    }

    /// Idempotent enqueue keyed by the caller's dedupe key. A second call
    /// with the same key is a no-op reported as [`Enqueue::Duplicate`]; only
    /// real store failures propagate.
    pub async fn enqueue(
        &self,
        dedupe_key: impl AsRef<str>,
        to_addr: Option<&str>,
        body: impl AsRef<str>,
        fallback: Option<&FallbackPayload>,
    ) -> eyre::Result<Enqueue> {
        let dedupe_key = dedupe_key.as_ref();

        if dedupe_key.is_empty() {
            eyre::bail!("dedupe key must not be empty");
        }

        let mut tx = self.db.begin().await?;

        let outcome = Job::insert_if_absent(
            tx.acquire().await?,
            dedupe_key,
            to_addr,
            body.as_ref(),
            fallback,
            self.now(),
        )
        .await?;

        tx.commit().await?;

        Ok(outcome)
    }

    /// Ids of currently claimable jobs, oldest due first.
    pub async fn claimable(&self, limit: u32) -> eyre::Result<Vec<String>> {
        let mut conn = self.db.acquire().await?;
        Job::claimable(conn.acquire().await?, limit, self.now()).await
    }

    /// Attempts to take the lease on one job. `None` means the claim was
    /// lost to a concurrent worker or the job left the claimable pool.
    pub async fn try_claim(&self, id: &str, worker_id: &str) -> eyre::Result<Option<Job>> {
        let lease_ms = self.config.lease_duration().as_millis() as i64;

        let mut conn = self.db.acquire().await?;
        Job::try_claim(conn.acquire().await?, id, worker_id, lease_ms, self.now()).await
    }

    /// Resolves a delivered job: appends the audit record and removes the
    /// row from the active queue, in that order, in one transaction.
    pub async fn complete(&self, job: &Job, outcome: DeliveryOutcome) -> eyre::Result<()> {
        let mut tx = self.db.begin().await?;

        DeliveryRecord::append(tx.acquire().await?, job, outcome, self.now()).await?;
        Job::delete(tx.acquire().await?, &job.id).await?;

        tx.commit().await?;

        Ok(())
    }

    /// Applies the retry policy to a claimed job that just failed delivery.
    pub async fn record_failure(
        &self,
        job: &Job,
        worker_id: &str,
        error: &str,
    ) -> eyre::Result<FailureDisposition> {
        let attempts = job.attempts + 1;
        let now = self.now();

        let mut tx = self.db.begin().await?;

        let disposition = match self.policy.decide(attempts as u32) {
            RetryDecision::GiveUp => {
                if Job::mark_failed(tx.acquire().await?, &job.id, worker_id, attempts, error)
                    .await?
                {
                    FailureDisposition::Failed
                } else {
                    FailureDisposition::LeaseLost
                }
            }
            RetryDecision::Retry { delay } => {
                // Never schedule in the past, whatever the jitter math says.
                let next_attempt_at = (now + delay.as_millis() as i64).max(now + 1);

                if Job::mark_retrying(
                    tx.acquire().await?,
                    &job.id,
                    worker_id,
                    attempts,
                    next_attempt_at,
                    error,
                )
                .await?
                {
                    FailureDisposition::Retrying { next_attempt_at }
                } else {
                    FailureDisposition::LeaseLost
                }
            }
        };

        tx.commit().await?;

        Ok(disposition)
    }

    /// Returns expired-lease jobs to the claimable pool. Idempotent; safe to
    /// run on any schedule.
    pub async fn reclaim_expired(&self) -> eyre::Result<u64> {
        let mut conn = self.db.acquire().await?;
        Job::reclaim_expired(conn.acquire().await?, self.now()).await
    }

    /// Operator reset of a terminal-failed job. Returns false when the job
    /// does not exist or is not in the failed state.
    pub async fn reset_failed(&self, id: &str) -> eyre::Result<bool> {
        let mut conn = self.db.acquire().await?;
        Job::reset_failed(conn.acquire().await?, id, self.now()).await
    }

    pub async fn get_job(&self, id: &str) -> eyre::Result<Option<Job>> {
        let mut conn = self.db.acquire().await?;
        Job::find(conn.acquire().await?, id).await
    }

    pub async fn list_jobs(&self) -> eyre::Result<Vec<Job>> {
        let mut conn = self.db.acquire().await?;
        Job::list(conn.acquire().await?).await
    }

    pub async fn history(&self, limit: u32) -> eyre::Result<Vec<DeliveryRecord>> {
        let mut conn = self.db.acquire().await?;
        DeliveryRecord::list(conn.acquire().await?, limit).await
    }
}
