//! Outbound delivery channels.
//!
//! [`Transport`] is the primary channel (WhatsApp text messages over the
//! provider's HTTP API). [`PushChannel`] is the best-effort fallback used
//! when a job has no usable destination. Both are seams: the worker is
//! generic over them so tests can script outcomes without a network.

use std::future::Future;
use std::time::Duration;

use snafu::Snafu;

use crate::job::FallbackPayload;

/// A failed delivery attempt. The display string ends up in the job's
/// `last_error` column.
#[derive(Debug, Snafu)]
pub enum TransportError {
    #[snafu(display("provider returned status {status}: {detail}"))]
    Provider { status: u16, detail: String },

    #[snafu(display("request failed: {source}"))]
    Network { source: reqwest::Error },
}

pub trait Transport: Send + Sync + 'static {
    fn send(
        &self,
        to: &str,
        body: &str,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;
}

pub trait PushChannel: Send + Sync + 'static {
    fn notify(&self, payload: &FallbackPayload) -> impl Future<Output = eyre::Result<()>> + Send;
}

/// WhatsApp Cloud API text-message sender.
pub struct WhatsAppTransport {
    client: reqwest::Client,
    api_base: String,
    sender_id: String,
    access_token: String,
}

impl WhatsAppTransport {
    pub fn new(
        api_base: impl Into<String>,
        sender_id: impl Into<String>,
        access_token: impl Into<String>,
    ) -> eyre::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            api_base: api_base.into(),
            sender_id: sender_id.into(),
            access_token: access_token.into(),
        })
    }
}

impl Transport for WhatsAppTransport {
    async fn send(&self, to: &str, body: &str) -> Result<(), TransportError> {
        let url = format!("{}/{}/messages", self.api_base, self.sender_id);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(&serde_json::json!({
                "messaging_product": "whatsapp",
                "recipient_type": "individual",
                "to": to,
                "type": "text",
                "text": { "body": body },
            }))
            .send()
            .await
            .map_err(|source| TransportError::Network { source })?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let detail = response.text().await.unwrap_or_default();

        Err(TransportError::Provider {
            status: status.as_u16(),
            detail,
        })
    }
}

/// Posts fallback notifications to the push collaborator, if one is
/// configured. Without a configured endpoint notifications are dropped with
/// a warning; push is best-effort either way.
pub struct HttpPushChannel {
    client: reqwest::Client,
    url: Option<String>,
}

impl HttpPushChannel {
    pub fn new(url: Option<String>) -> eyre::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self { client, url })
    }
}

impl PushChannel for HttpPushChannel {
    async fn notify(&self, payload: &FallbackPayload) -> eyre::Result<()> {
        let Some(url) = &self.url else {
            tracing::warn!(entity_id = %payload.entity_id, "no push endpoint configured, dropping fallback notification");
            return Ok(());
        };

        let response = self.client.post(url).json(payload).send().await?;

        if !response.status().is_success() {
            eyre::bail!("push endpoint returned status {}", response.status());
        }

        Ok(())
    }
}
