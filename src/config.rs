use std::time::Duration;

use serde::Deserialize;

#[derive(Clone, Deserialize)]
pub struct Config {
    pub db_path: Option<String>,
    pub bind_addr: Option<String>,

    pub access_token: Option<String>,
    pub sender_id: Option<String>,
    pub api_base: Option<String>,
    pub verify_token: Option<String>,
    pub push_url: Option<String>,

    pub worker_id: Option<String>,
    pub poll_interval_secs: Option<u64>,
    pub batch_size: Option<u32>,
    pub max_attempts: Option<u32>,
    pub base_backoff_secs: Option<u64>,
    pub lease_duration_secs: Option<u64>,
    pub reclaim_interval_secs: Option<u64>,
}

impl Config {
    pub fn load() -> eyre::Result<Self> {
        Ok(envy::prefixed("RELAYQ_").from_env::<Self>()?)
    }

    pub fn db_path(&self) -> Option<&str> {
        self.db_path.as_deref()
    }

    pub fn bind_addr(&self) -> &str {
        self.bind_addr.as_deref().unwrap_or("127.0.0.1:8080")
    }

    /// Provider credentials are required to start the delivery worker, not to
    /// open the store. Missing values fail at startup, never per-tick.
    pub fn access_token(&self) -> eyre::Result<&str> {
        self.access_token
            .as_deref()
            .ok_or_else(|| eyre::eyre!("RELAYQ_ACCESS_TOKEN is required"))
    }

    pub fn sender_id(&self) -> eyre::Result<&str> {
        self.sender_id
            .as_deref()
            .ok_or_else(|| eyre::eyre!("RELAYQ_SENDER_ID is required"))
    }

    pub fn api_base(&self) -> &str {
        self.api_base
            .as_deref()
            .unwrap_or("https://graph.facebook.com/v19.0")
    }

    pub fn verify_token(&self) -> eyre::Result<&str> {
        self.verify_token
            .as_deref()
            .ok_or_else(|| eyre::eyre!("RELAYQ_VERIFY_TOKEN is required"))
    }

    pub fn push_url(&self) -> Option<String> {
        self.push_url.clone()
    }

    pub fn worker_id(&self) -> String {
        self.worker_id
            .clone()
            .unwrap_or_else(|| format!("worker-{}", std::process::id()))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.unwrap_or(5))
    }

    pub fn batch_size(&self) -> u32 {
        self.batch_size.unwrap_or(1)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts.unwrap_or(3)
    }

    pub fn base_backoff(&self) -> Duration {
        Duration::from_secs(self.base_backoff_secs.unwrap_or(30))
    }

    pub fn lease_duration(&self) -> Duration {
        Duration::from_secs(self.lease_duration_secs.unwrap_or(120))
    }

    pub fn reclaim_interval(&self) -> Duration {
        Duration::from_secs(self.reclaim_interval_secs.unwrap_or(300))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: None,
            bind_addr: None,
            access_token: None,
            sender_id: None,
            api_base: None,
            verify_token: None,
            push_url: None,
            worker_id: None,
            poll_interval_secs: None,
            batch_size: None,
            max_attempts: None,
            base_backoff_secs: None,
            lease_duration_secs: None,
            reclaim_interval_secs: None,
        }
    }
}
