//! Exponential backoff policy for failed deliveries.
//!
//! Delay doubles with every attempt, with additive jitter so that many jobs
//! failing in sync do not retry in sync. Once the attempt budget is spent
//! the job is terminally failed and left for operator inspection.

use std::time::Duration;

use rand::Rng;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum delivery attempts before a job is terminally failed.
    pub max_attempts: u32,
    /// Base delay for the exponential backoff calculation.
    pub base_delay: Duration,
    /// Fraction of the computed delay added as uniform random jitter.
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(30),
            jitter_factor: 0.20,
        }
    }
}

/// Decision for a job that just failed its `attempts`-th delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { delay: Duration },
    GiveUp,
}

impl RetryPolicy {
    /// Backoff delay before jitter: `base * 2^attempts`.
    pub fn backoff_delay(&self, attempts: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempts)
    }

    /// Decides the fate of a job whose attempt counter (already incremented
    /// for the failure being handled) is `attempts`.
    pub fn decide(&self, attempts: u32) -> RetryDecision {
        if attempts >= self.max_attempts {
            return RetryDecision::GiveUp;
        }

        let base = self.backoff_delay(attempts);
        let jitter = if self.jitter_factor > 0.0 {
            base.mul_f64(rand::thread_rng().gen_range(0.0..self.jitter_factor))
        } else {
            Duration::ZERO
        };

        RetryDecision::Retry {
            delay: base + jitter,
        }
    }
}
