use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractRequest {
    pub team_id: Uuid,
    pub urls: Vec<String>,
    pub prompt: Option<String>,
    pub schema: Option<Value>,
    #[serde(default)]
    pub allow_external_links: bool,
    pub request_timeout_ms: Option<u64>,
}

/// Per-request status, persisted under `extract:<id>` with a 6h TTL,
/// mirroring how `StoredCrawl` is the durable record a client polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractStatus {
    Processing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredExtract {
    pub id: Uuid,
    pub team_id: Uuid,
    pub status: ExtractStatus,
    pub created_at: DateTime<Utc>,
    pub data: Option<Value>,
    pub warning: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractAnalysis {
    pub is_multi_entity: bool,
    pub multi_entity_keys: Vec<String>,
    pub reasoning: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractResult {
    pub id: Uuid,
    pub data: Value,
    pub sources: std::collections::HashMap<String, Vec<String>>,
    pub warning: Option<String>,
    pub cost_tokens: u64,
}
