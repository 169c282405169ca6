use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::json;

use super::{DeliveryError, DeliveryProvider, DeliveryReceipt, OutboundMessage};

/// Primary channel: JSON POST to a transactional email HTTP API.
pub struct HttpEmailProvider {
    client: Client,
    endpoint: String,
    api_key: String,
}

impl HttpEmailProvider {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key: api_key.into(),
        })
    }
}

/// Map an HTTP status to the delivery error taxonomy.
///
/// 400/422 mean the provider rejected the payload as invalid; everything
/// else (429, 5xx, ...) is worth retrying.
fn classify_status(status: StatusCode, body: &str) -> DeliveryError {
    match status {
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
            DeliveryError::Permanent(format!("provider rejected message ({status}): {body}"))
        }
        _ => DeliveryError::Transient(format!("provider returned {status}: {body}")),
    }
}

#[async_trait]
impl DeliveryProvider for HttpEmailProvider {
    fn name(&self) -> &str {
        "email-api"
    }

    async fn send(&self, message: &OutboundMessage) -> Result<DeliveryReceipt, DeliveryError> {
        let payload = json!({
            "to": message.to,
            "subject": message.subject,
            "html": message.html,
            "text": message.text,
        });

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| DeliveryError::Transient(format!("request failed: {e}")))?;

        let status = response.status();
        if status.is_success() {
            let provider_id = response
                .json::<serde_json::Value>()
                .await
                .ok()
                .and_then(|v| v.get("id").and_then(|id| id.as_str()).map(str::to_owned));
            return Ok(DeliveryReceipt { provider_id });
        }

        let body = response.text().await.unwrap_or_default();
        Err(classify_status(status, &body))
    }
}

/// Failover channel: POST the whole message as JSON to a generic webhook.
pub struct WebhookProvider {
    client: Client,
    url: String,
}

impl WebhookProvider {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl DeliveryProvider for WebhookProvider {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn send(&self, message: &OutboundMessage) -> Result<DeliveryReceipt, DeliveryError> {
        let response = self
            .client
            .post(&self.url)
            .json(message)
            .send()
            .await
            .map_err(|e| DeliveryError::Transient(format!("webhook request failed: {e}")))?;

        let status = response.status();
        if status.is_success() {
            return Ok(DeliveryReceipt::default());
        }

        let body = response.text().await.unwrap_or_default();
        Err(classify_status(status, &body))
    }
}
