//! The opaque external collaborators this service calls through rather
//! than implements: engines, LLM extraction, billing, and job logging.
//! Centralizing the trait definitions here (rather than duplicating them
//! per consuming crate) keeps `engine`, `search`, and `extract` talking to
//! the same shape.

use async_trait::async_trait;
use serde_json::Value;

use crate::AppError;

/// Schema-guided extraction and schema authoring, performed by an LLM,
/// kept opaque behind this trait.
#[async_trait]
pub trait LlmExtractor: Send + Sync {
    /// Extracts data matching `schema` from the concatenated document
    /// content. `schema` is `None` for free-form extraction.
    async fn extract(&self, content: &str, schema: Option<&Value>) -> Result<Value, AppError>;

    /// Generates a JSON Schema from a natural-language prompt.
    async fn generate_schema_from_prompt(&self, prompt: &str) -> Result<Value, AppError>;

    /// Classifies a schema as single-answer vs multi-entity.
    async fn classify_multi_entity(&self, schema: &Value) -> Result<MultiEntityClassification, AppError>;

    /// Rephrases a free-text search prompt before it is issued to the
    /// search-engine client.
    async fn rephrase_query(&self, prompt: &str) -> Result<String, AppError> {
        Ok(prompt.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultiEntityClassification {
    pub is_multi_entity: bool,
    pub multi_entity_keys: Vec<String>,
    pub reasoning: String,
}

/// Credit accounting; billing persistence lives behind `Billing::charge`
/// as an opaque collaborator.
#[async_trait]
pub trait Billing: Send + Sync {
    async fn charge(&self, team_id: uuid::Uuid, credits: f64) -> Result<(), AppError>;

    /// Factors formats, PDF page count, proxy type, ZDR, and agent usage
    /// into a credit cost for one scrape.
    fn calculate_credits_to_be_billed(&self, request: &BillableScrape) -> f64;
}

/// The inputs `Billing::calculate_credits_to_be_billed` needs, captured as
/// a plain struct so callers don't have to pass a full `Document`.
#[derive(Debug, Clone, Default)]
pub struct BillableScrape {
    pub formats: Vec<String>,
    pub num_pages: Option<u32>,
    pub used_stealth_proxy: bool,
    pub zero_data_retention: bool,
    pub used_agent: bool,
}

/// Append-only scrape/crawl activity logging; logging sinks live behind
/// `JobLog::record` as an opaque collaborator.
#[async_trait]
pub trait JobLog: Send + Sync {
    async fn record(&self, team_id: uuid::Uuid, event: &str, detail: Value);
}

/// No-op `JobLog`, used in tests and as a safe default when no
/// observability sink is wired up.
pub struct NoopJobLog;

#[async_trait]
impl JobLog for NoopJobLog {
    async fn record(&self, _team_id: uuid::Uuid, _event: &str, _detail: Value) {}
}

/// Default `JobLog` for a running deployment: routes activity into the
/// same `tracing` pipeline as everything else, rather than a bespoke
/// analytics client. A real analytics warehouse sink can be layered in
/// later as another `JobLog` implementation without touching call sites.
pub struct TracingJobLog;

#[async_trait]
impl JobLog for TracingJobLog {
    async fn record(&self, team_id: uuid::Uuid, event: &str, detail: Value) {
        tracing::info!(%team_id, event, detail = %detail, "job activity");
    }
}
