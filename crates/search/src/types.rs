use serde::{Deserialize, Serialize};
use shared::models::{DocumentMetadata, ScrapeOptions};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchCategory {
    Web,
    Images,
    News,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    pub team_id: Uuid,
    pub query: String,
    #[serde(default)]
    pub categories: Vec<SearchCategory>,
    pub limit: Option<u32>,
    #[serde(default)]
    pub rephrase_prompt: bool,
    #[serde(default)]
    pub bypass_queue: bool,
    #[serde(default)]
    pub scrape_options: ScrapeOptions,
}

/// A single item returned by the opaque search-engine client, before (E)
/// has had a chance to scrape it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResultItem {
    pub url: String,
    pub title: String,
    pub description: String,
    pub category: SearchCategory,
    #[serde(default)]
    pub markdown: Option<String>,
    #[serde(default)]
    pub html: Option<String>,
    #[serde(default)]
    pub links: Vec<String>,
    #[serde(default)]
    pub metadata: Option<DocumentMetadata>,
    #[serde(default)]
    pub scrape_error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub query: String,
    pub results: Vec<SearchResultItem>,
    pub credits_used: f64,
}
