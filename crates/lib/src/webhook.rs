//! Webhook action: POST the alert as JSON to a configured URL.

use crate::config::WebhookSettings;
use crate::ntfy::InboundMessage;
use async_trait::async_trait;
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("webhook request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("webhook returned {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },
}

/// Body posted to the webhook target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WebhookPayload<'a> {
    pub title: &'a str,
    pub message: &'a str,
    pub priority: u8,
}

impl<'a> From<&'a InboundMessage> for WebhookPayload<'a> {
    fn from(msg: &'a InboundMessage) -> Self {
        Self {
            title: msg.title.as_deref().unwrap_or(""),
            message: &msg.message,
            priority: msg.priority,
        }
    }
}

/// Delivers an alert to an external endpoint. Implemented by [`HttpWebhook`]; tests inject fakes.
#[async_trait]
pub trait WebhookSender: Send + Sync {
    async fn send(&self, msg: &InboundMessage) -> Result<(), WebhookError>;
}

/// reqwest-backed webhook sender. Single attempt, no retries.
#[derive(Clone)]
pub struct HttpWebhook {
    url: String,
    client: reqwest::Client,
}

impl HttpWebhook {
    pub fn new(settings: &WebhookSettings) -> Self {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()
            .unwrap_or_else(|e| {
                log::warn!("webhook client builder failed ({}), using defaults", e);
                reqwest::Client::new()
            });
        Self {
            url: settings.url.clone(),
            client,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl WebhookSender for HttpWebhook {
    async fn send(&self, msg: &InboundMessage) -> Result<(), WebhookError> {
        let res = self
            .client
            .post(&self.url)
            .json(&WebhookPayload::from(msg))
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(WebhookError::Status { status, body });
        }
        log::debug!("webhook delivered to {} ({})", self.url, res.status());
        Ok(())
    }
}
