use async_trait::async_trait;
use shared::AppError;

use crate::markdown::html_to_markdown;
use crate::types::{EngineId, EngineMeta, EngineResult};

/// One scraping backend (browser automation, plain HTTP fetch, PDF
/// parsing, ...), kept opaque behind this trait. This crate ships one
/// concrete, always-available implementation (`HttpEngine`) and a
/// `FakeEngine` test double, keeping the fallback pipeline itself
/// engine-agnostic.
#[async_trait]
pub trait Engine: Send + Sync {
    fn id(&self) -> EngineId;
    async fn scrape(&self, meta: &EngineMeta) -> Result<EngineResult, AppError>;
}

/// Plain HTTP fetch engine: `reqwest::get` plus a hand-rolled HTML→markdown
/// reducer. The one engine that needs no browser, proxy, or PDF backend, so
/// it is always registered.
pub struct HttpEngine {
    client: reqwest::Client,
}

impl HttpEngine {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Engine for HttpEngine {
    fn id(&self) -> EngineId {
        EngineId::Http
    }

    async fn scrape(&self, meta: &EngineMeta) -> Result<EngineResult, AppError> {
        let response = self
            .client
            .get(&meta.url)
            .timeout(meta.timeout)
            .send()
            .await;

        let response = match response {
            Ok(r) => r,
            Err(e) if e.is_timeout() => return Err(AppError::ScrapeTimeout(meta.timeout.as_millis() as u64)),
            Err(e) => {
                return Ok(EngineResult {
                    html: None,
                    markdown: None,
                    status_code: 0,
                    error: Some(e.to_string()),
                })
            }
        };

        let status_code = response.status().as_u16();
        let html = response.text().await.unwrap_or_default();
        let markdown = html_to_markdown(&html);

        Ok(EngineResult {
            html: Some(html),
            markdown: Some(markdown),
            status_code,
            error: None,
        })
    }
}

/// Test double: returns a scripted result regardless of URL, used by the
/// pipeline's own unit tests and by consumers (`crawl`, `search`, `extract`)
/// that need a deterministic engine without network access.
pub struct FakeEngine {
    id: EngineId,
    result: EngineResult,
    fails_with: Option<String>,
    times_out: Option<u64>,
}

impl FakeEngine {
    pub fn ok(id: EngineId, markdown: impl Into<String>, status_code: u16) -> Self {
        Self {
            id,
            result: EngineResult {
                html: Some(format!("<html><body>{}</body></html>", "placeholder")),
                markdown: Some(markdown.into()),
                status_code,
                error: None,
            },
            fails_with: None,
            times_out: None,
        }
    }

    pub fn engine_error(id: EngineId, message: impl Into<String>) -> Self {
        Self {
            id,
            result: EngineResult::default(),
            fails_with: Some(message.into()),
            times_out: None,
        }
    }

    pub fn timeout(id: EngineId, ms: u64) -> Self {
        Self {
            id,
            result: EngineResult::default(),
            fails_with: None,
            times_out: Some(ms),
        }
    }
}

#[async_trait]
impl Engine for FakeEngine {
    fn id(&self) -> EngineId {
        self.id
    }

    async fn scrape(&self, _meta: &EngineMeta) -> Result<EngineResult, AppError> {
        if let Some(ms) = self.times_out {
            return Err(AppError::ScrapeTimeout(ms));
        }
        if let Some(message) = &self.fails_with {
            return Err(AppError::EngineError(message.clone()));
        }
        Ok(self.result.clone())
    }
}
