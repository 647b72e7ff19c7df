//! Delivery worker loop.
//!
//! Polls the store on a fixed interval, claims due jobs one at a time
//! through the lease protocol, and pushes each claimed job through the
//! primary transport. Failures become state transitions, never panics: the
//! loop survives store and provider outages and simply tries again next
//! tick. Any number of workers may run against the same store.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    history::DeliveryOutcome,
    job::Job,
    service::{FailureDisposition, Service},
    transport::{PushChannel, Transport},
};

pub struct Worker<T, P> {
    service: Arc<Service>,
    transport: T,
    push: P,
    id: String,
}

impl<T: Transport, P: PushChannel> Worker<T, P> {
    pub fn new(service: Arc<Service>, transport: T, push: P, id: impl Into<String>) -> Self {
        Self {
            service,
            transport,
            push,
            id: id.into(),
        }
    }

    pub async fn run(self, token: CancellationToken) {
        let mut interval = tokio::time::interval(self.service.config().poll_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        info!(worker = %self.id, "delivery worker started");

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(e) = self.tick().await {
                        warn!(worker = %self.id, error = %e, "poll tick failed");
                    }
                }
            }
        }

        info!(worker = %self.id, "delivery worker stopped");
    }

    /// One poll iteration: claim and process up to `batch_size` due jobs.
    pub async fn tick(&self) -> eyre::Result<()> {
        let candidates = self
            .service
            .claimable(self.service.config().batch_size())
            .await?;

        for id in candidates {
            let Some(job) = self.service.try_claim(&id, &self.id).await? else {
                debug!(worker = %self.id, job = %id, "claim lost");
                continue;
            };

            self.deliver(job).await?;
        }

        Ok(())
    }

    async fn deliver(&self, job: Job) -> eyre::Result<()> {
        let Some(to) = job.to_addr.as_deref().filter(|to| !to.is_empty()) else {
            return self.resolve_via_fallback(job).await;
        };

        match self.transport.send(to, &job.body).await {
            Ok(()) => {
                self.service.complete(&job, DeliveryOutcome::Sent).await?;
                info!(worker = %self.id, job = %job.id, "delivered");
            }
            Err(e) => {
                let disposition = self
                    .service
                    .record_failure(&job, &self.id, &e.to_string())
                    .await?;

                match disposition {
                    FailureDisposition::Retrying { next_attempt_at } => {
                        warn!(worker = %self.id, job = %job.id, error = %e, next_attempt_at, "delivery failed, rescheduled");
                    }
                    FailureDisposition::Failed => {
                        warn!(worker = %self.id, job = %job.id, error = %e, "delivery failed terminally");
                    }
                    FailureDisposition::LeaseLost => {
                        debug!(worker = %self.id, job = %job.id, "lease lost before failure was recorded");
                    }
                }
            }
        }

        Ok(())
    }

    /// A job with no usable destination is terminal success for the queue:
    /// fire the fallback notification (best-effort) and remove the job. It
    /// must never enter the retry path.
    async fn resolve_via_fallback(&self, job: Job) -> eyre::Result<()> {
        match &job.fallback {
            Some(fallback) => {
                if let Err(e) = self.push.notify(fallback).await {
                    warn!(worker = %self.id, job = %job.id, error = %e, "fallback notification failed");
                }
            }
            None => {
                warn!(worker = %self.id, job = %job.id, "no destination and no fallback payload");
            }
        }

        self.service
            .complete(&job, DeliveryOutcome::SentViaFallback)
            .await?;

        info!(worker = %self.id, job = %job.id, "resolved via fallback");

        Ok(())
    }
}
