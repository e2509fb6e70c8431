use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Status of a queue_scrape row. Variant names and `rename_all` match the
/// bit-exact `job_status` Postgres enum from the external interfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "job_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Active,
    Completed,
    Failed,
}

/// A row of `queue_scrape`. `data` carries the opaque job payload (a
/// `JobPayload` once deserialized by a worker); `lock` is the worker nonce.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Job {
    pub id: Uuid,
    pub status: JobStatus,
    pub data: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub lock: Option<String>,
    pub locked_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub returnvalue: Option<serde_json::Value>,
    pub failedreason: Option<String>,
}

/// The payload shape carried in `Job::data`. Fixed schema by design — this
/// is not a general-purpose task queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobPayload {
    Scrape {
        url: String,
        team_id: Uuid,
        scrape_options: ScrapeOptions,
        crawl_id: Option<Uuid>,
        current_discovery_depth: u32,
    },
    CrawlKickoff {
        crawl_id: Uuid,
    },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScrapeOptions {
    #[serde(default)]
    pub formats: Vec<String>,
    #[serde(default)]
    pub mobile: bool,
    #[serde(default)]
    pub stealth_proxy: bool,
    #[serde(default)]
    pub only_main_content: bool,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CrawlerOptions {
    #[serde(default)]
    pub include_paths: Vec<String>,
    #[serde(default)]
    pub exclude_paths: Vec<String>,
    pub limit: Option<u64>,
    pub max_discovery_depth: Option<u32>,
    #[serde(default)]
    pub allow_subdomains: bool,
    #[serde(default)]
    pub allow_backward_crawling: bool,
    #[serde(default)]
    pub ignore_robots_txt: bool,
    pub sitemap: Option<SitemapPolicy>,
    pub delay_ms: Option<u64>,
    /// Destination for the `started`/`page`/`completed`/`failed` webhook
    /// events. Not named in the distilled data model, but the
    /// external-interfaces section requires it; added here rather than as
    /// a bare top-level request field since it travels with the rest of
    /// the crawl's configuration.
    pub webhook: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SitemapPolicy {
    Include,
    Skip,
    Only,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InternalOptions {
    #[serde(default)]
    pub zero_data_retention: bool,
    pub team_id: Option<Uuid>,
}

/// Per-crawl metadata, persisted as JSON under `crawl:<id>` with a TTL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredCrawl {
    pub id: Uuid,
    pub origin_url: String,
    pub crawler_options: CrawlerOptions,
    pub scrape_options: ScrapeOptions,
    pub internal_options: InternalOptions,
    pub team_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub robots: Option<String>,
    pub max_concurrency: Option<u32>,
    pub cancelled: bool,
    pub zero_data_retention: bool,
    /// Set when the kickoff job itself fails. A crawl with some failed
    /// children is still `completed`; a crawl is only ever `failed` if the
    /// kickoff fails.
    #[serde(default)]
    pub kickoff_failed: bool,
}

impl StoredCrawl {
    pub fn new(
        id: Uuid,
        origin_url: String,
        crawler_options: CrawlerOptions,
        scrape_options: ScrapeOptions,
        internal_options: InternalOptions,
        team_id: Uuid,
    ) -> Self {
        let zero_data_retention = internal_options.zero_data_retention;
        Self {
            id,
            origin_url,
            crawler_options,
            scrape_options,
            internal_options,
            team_id,
            created_at: Utc::now(),
            robots: None,
            max_concurrency: None,
            cancelled: false,
            zero_data_retention,
            kickoff_failed: false,
        }
    }
}

/// Per-request identity / auth-credit-usage chunk (ACUC).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub team_id: Uuid,
    pub sub_id: Option<Uuid>,
    pub price_credits: i64,
    pub credits_used: i64,
    pub adjusted_credits_used: i64,
    pub concurrency: u32,
    pub rate_limits: HashMap<String, u32>,
    pub flags: TeamFlags,
}

impl Identity {
    pub fn remaining_credits(&self) -> i64 {
        (self.price_credits - self.adjusted_credits_used).max(0)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TeamFlags {
    #[serde(default)]
    pub bypass_robots: bool,
    #[serde(default)]
    pub zero_data_retention: bool,
    pub crawl_ttl_override_seconds: Option<u64>,
}

/// Result of a single scrape, returned by the engine fallback pipeline and
/// surfaced to clients / downstream orchestrators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub markdown: Option<String>,
    pub html: Option<String>,
    pub raw_html: Option<String>,
    #[serde(default)]
    pub links: Vec<String>,
    pub screenshot: Option<String>,
    pub extract: Option<serde_json::Value>,
    pub metadata: DocumentMetadata,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub source_url: String,
    pub status_code: Option<u16>,
    pub proxy_used: Option<String>,
    pub num_pages: Option<u32>,
    pub credits_used: Option<f64>,
    pub engine_used: Option<String>,
    pub attempts: Vec<EngineAttempt>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineAttempt {
    pub engine: String,
    pub accepted: bool,
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remaining_credits_never_negative() {
        let identity = Identity {
            team_id: Uuid::nil(),
            sub_id: None,
            price_credits: 10,
            credits_used: 50,
            adjusted_credits_used: 50,
            concurrency: 5,
            rate_limits: HashMap::new(),
            flags: TeamFlags::default(),
        };
        assert_eq!(identity.remaining_credits(), 0);
    }
}
