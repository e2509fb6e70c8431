use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::warn;
use uuid::Uuid;

/// Delivery for the `started`/`page`/`completed`/`failed` crawl events.
/// The concrete `HttpWebhookSender` POSTs JSON with a signature header,
/// hashing (`sha2::Sha256`) the body against a shared secret per request.
#[async_trait]
pub trait WebhookSender: Send + Sync {
    async fn send(&self, url: &str, crawl_id: Uuid, event: &str, payload: serde_json::Value);
}

#[derive(Serialize)]
struct WebhookEnvelope {
    success: bool,
    #[serde(rename = "type")]
    event: String,
    id: Uuid,
    data: serde_json::Value,
    error: Option<String>,
}

pub struct HttpWebhookSender {
    client: reqwest::Client,
    secret: Option<String>,
}

impl HttpWebhookSender {
    pub fn new(secret: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            secret,
        }
    }

    fn signature(&self, body: &str) -> Option<String> {
        let secret = self.secret.as_ref()?;
        let mut hasher = Sha256::new();
        hasher.update(secret.as_bytes());
        hasher.update(body.as_bytes());
        Some(format!("{:x}", hasher.finalize()))
    }
}

#[async_trait]
impl WebhookSender for HttpWebhookSender {
    async fn send(&self, url: &str, crawl_id: Uuid, event: &str, payload: serde_json::Value) {
        let envelope = WebhookEnvelope {
            success: event != "failed",
            event: event.to_string(),
            id: crawl_id,
            data: payload,
            error: None,
        };

        let body = match serde_json::to_string(&envelope) {
            Ok(b) => b,
            Err(e) => {
                warn!(crawl_id = %crawl_id, error = %e, "failed to serialize webhook payload");
                return;
            }
        };

        let mut request = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .header("X-Crawl-Timestamp", Utc::now().to_rfc3339());

        if let Some(signature) = self.signature(&body) {
            request = request.header("X-Crawl-Signature", signature);
        }

        if let Err(e) = request.body(body).send().await {
            warn!(crawl_id = %crawl_id, %event, error = %e, "webhook delivery failed");
        }
    }
}

/// Test double that records events instead of performing HTTP.
#[derive(Default)]
pub struct NoopWebhookSender;

#[async_trait]
impl WebhookSender for NoopWebhookSender {
    async fn send(&self, _url: &str, _crawl_id: Uuid, _event: &str, _payload: serde_json::Value) {}
}
