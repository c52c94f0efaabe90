//! Webhook sink for HTTP delivery.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::debug;

use ledger_database::OutboxRow;

use crate::sink::{DeliveryError, DeliverySink};

/// Webhook sink configuration.
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    /// Endpoint that receives event POSTs.
    pub url: String,
    /// Request timeout.
    pub timeout: Duration,
}

impl WebhookConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Delivers events as JSON POSTs to a single webhook endpoint.
///
/// One request per event, no internal retry; the dispatcher schedules
/// retries from the returned [`DeliveryError`] classification.
pub struct WebhookSink {
    config: WebhookConfig,
    client: Client,
}

impl WebhookSink {
    pub fn new(config: WebhookConfig) -> Self {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .expect("Failed to create HTTP client");

        Self { config, client }
    }
}

fn event_body(row: &OutboxRow) -> serde_json::Value {
    serde_json::json!({
        "event_type": row.event_type,
        "aggregate_id": row.aggregate_id,
        "payload": row.payload,
    })
}

#[async_trait]
impl DeliverySink for WebhookSink {
    async fn deliver(&self, row: &OutboxRow) -> Result<(), DeliveryError> {
        debug!(
            url = %self.config.url,
            id = row.id,
            event_type = %row.event_type,
            "Posting event"
        );

        let response = self
            .client
            .post(&self.config.url)
            .json(&event_body(row))
            .send()
            .await
            .map_err(|e| DeliveryError::Retryable(format!("request failed: {e}")))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        let message = format!("HTTP {status}: {body}");

        // A 4xx means the receiver rejected this event and always will,
        // except 429 which asks us to come back later.
        if status.is_client_error() && status != StatusCode::TOO_MANY_REQUESTS {
            Err(DeliveryError::Permanent(message))
        } else {
            Err(DeliveryError::Retryable(message))
        }
    }
}
