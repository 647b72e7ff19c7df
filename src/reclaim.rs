//! Stuck-job reclaimer.
//!
//! A worker that dies after claiming a job leaves it in `processing` with a
//! lease nobody will ever release. This sweep runs on its own schedule,
//! decoupled from the delivery workers, and returns every expired-lease job
//! to the claimable pool. It is the sole safety net against worker death.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::service::Service;

pub struct Reclaimer {
    service: Arc<Service>,
}

impl Reclaimer {
    pub fn new(service: Arc<Service>) -> Self {
        Self { service }
    }

    pub async fn run(self, token: CancellationToken) {
        let mut interval = tokio::time::interval(self.service.config().reclaim_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        info!("reclaimer started");

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = interval.tick() => {
                    match self.service.reclaim_expired().await {
                        Ok(0) => {}
                        Ok(n) => info!(count = n, "reclaimed stuck jobs"),
                        // Next sweep retries; orphans are never lost.
                        Err(e) => warn!(error = %e, "reclaim sweep failed"),
                    }
                }
            }
        }

        info!("reclaimer stopped");
    }
}
