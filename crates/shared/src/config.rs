use serde::{Deserialize, Serialize};
use std::env;

use crate::AppError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub queue: QueueConfig,
    pub kv: KvConfig,
    pub admission: AdmissionConfig,
    pub engine: EngineConfig,
    pub crawl: CrawlConfig,
    pub extract: ExtractConfig,
    pub search: SearchConfig,
    pub integrations: IntegrationsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Pooled connection string, used for ordinary CRUD (NUQ_DATABASE_URL).
    pub database_url: String,
    /// Dedicated, unpooled connection string for LISTEN/NOTIFY
    /// (NUQ_DATABASE_URL_LISTEN); falls back to `database_url` if unset.
    pub listen_url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_secs: u64,
    pub idle_timeout_secs: u64,
    /// How long a claimed row may go unrenewed before the reaper reclaims it.
    /// Open Question #3: not explicit in source; 60s chosen as the default.
    pub lease_seconds: u64,
    /// How often the reaper sweeps for expired leases.
    pub reap_interval_seconds: u64,
}

impl QueueConfig {
    /// Workers must renew at roughly a third of the lease.
    pub fn renew_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs((self.lease_seconds / 3).max(1))
    }

    pub fn lease(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.lease_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KvConfig {
    pub redis_url: String,
    pub pool_max_size: u32,
    pub connection_timeout_secs: u64,
    pub crawl_ttl_seconds: u64,
    pub extract_ttl_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionConfig {
    /// Time-to-live for the locally cached Identity/ACUC chunk.
    pub identity_cache_ttl_seconds: u64,
    /// Default per-team concurrency ceiling when identity carries none.
    pub default_concurrency: u32,
    /// Default per-minute rate limit per (team, mode) when identity carries none.
    pub default_rate_limit_per_minute: u32,
    /// Default estimated job duration used to score the active-jobs set.
    pub default_job_duration_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub default_timeout_ms: u64,
    pub min_markdown_length: usize,
    pub max_status_code_for_success: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlConfig {
    pub default_ttl_seconds: u64,
    pub max_concurrent_jobs: usize,
    /// Open Question #2: sitemap-only crawls with no explicit limit are
    /// treated as this many URLs ("unbounded" sentinel from source).
    pub sitemap_only_unbounded_cap: u64,
    /// Hard operator ceiling no crawl limit may exceed, regardless of the
    /// sentinel above.
    pub hard_limit_cap: u64,
    pub max_discovery_depth: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractConfig {
    pub multi_entity_chunk_size: usize,
    pub per_document_timeout_seconds: u64,
    pub request_timeout_fraction: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    pub default_web_result_limit: u32,
    pub default_image_result_limit: u32,
    pub default_news_result_limit: u32,
    pub image_flat_rate_credits: f64,
}

/// Wiring for the opaque upstream collaborators (`LlmExtractor`,
/// `Billing`): endpoints and credentials for the production
/// implementations in `shared::integrations`, plus the
/// `USE_DB_AUTHENTICATION` flag that gates whether `Billing::charge`
/// actually persists a debit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrationsConfig {
    pub llm_api_url: String,
    pub llm_api_key: Option<String>,
    pub llm_model: String,
    pub use_db_authentication: bool,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        Ok(Self {
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: parse_env("SERVER_PORT", 3002)?,
                cors_origins: env::var("CORS_ORIGINS")
                    .unwrap_or_else(|_| "http://localhost:3000".to_string())
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .collect(),
            },
            queue: QueueConfig {
                database_url: required_env("NUQ_DATABASE_URL")?,
                listen_url: env::var("NUQ_DATABASE_URL_LISTEN")
                    .or_else(|_| env::var("NUQ_DATABASE_URL"))
                    .map_err(|_| AppError::Config("NUQ_DATABASE_URL is required".to_string()))?,
                max_connections: env_or("NUQ_MAX_CONNECTIONS", 20),
                min_connections: env_or("NUQ_MIN_CONNECTIONS", 2),
                acquire_timeout_secs: env_or("NUQ_ACQUIRE_TIMEOUT_SECS", 10),
                idle_timeout_secs: env_or("NUQ_IDLE_TIMEOUT_SECS", 600),
                lease_seconds: env_or("NUQ_LEASE_SECONDS", 60),
                reap_interval_seconds: env_or("NUQ_REAP_INTERVAL_SECONDS", 20),
            },
            kv: KvConfig {
                redis_url: env::var("REDIS_URL")
                    .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
                pool_max_size: env_or("REDIS_MAX_CONNECTIONS", 50),
                connection_timeout_secs: env_or("REDIS_CONNECTION_TIMEOUT_SECS", 5),
                crawl_ttl_seconds: env_or("CRAWL_TTL_SECONDS", 24 * 3600),
                extract_ttl_seconds: env_or("EXTRACT_TTL_SECONDS", 6 * 3600),
            },
            admission: AdmissionConfig {
                identity_cache_ttl_seconds: env_or("ACUC_CACHE_TTL_SECONDS", 30),
                default_concurrency: env_or("DEFAULT_TEAM_CONCURRENCY", 10),
                default_rate_limit_per_minute: env_or("DEFAULT_RATE_LIMIT_PER_MINUTE", 100),
                default_job_duration_seconds: env_or("DEFAULT_JOB_DURATION_SECONDS", 120),
            },
            engine: EngineConfig {
                default_timeout_ms: env_or("ENGINE_DEFAULT_TIMEOUT_MS", 30_000),
                min_markdown_length: env_or("ENGINE_MIN_MARKDOWN_LENGTH", 100),
                max_status_code_for_success: env_or("ENGINE_MAX_GOOD_STATUS", 300),
            },
            crawl: CrawlConfig {
                default_ttl_seconds: env_or("CRAWL_DEFAULT_TTL_SECONDS", 24 * 3600),
                max_concurrent_jobs: env_or("CRAWL_MAX_CONCURRENT_JOBS", 50),
                sitemap_only_unbounded_cap: env_or("SITEMAP_ONLY_UNBOUNDED_CAP", 10_000_000),
                hard_limit_cap: env_or("CRAWL_HARD_LIMIT_CAP", 1_000_000),
                max_discovery_depth: env_or("CRAWL_MAX_DISCOVERY_DEPTH", 10),
            },
            extract: ExtractConfig {
                multi_entity_chunk_size: env_or("EXTRACT_MULTI_ENTITY_CHUNK_SIZE", 50),
                per_document_timeout_seconds: env_or("EXTRACT_PER_DOCUMENT_TIMEOUT_SECONDS", 45),
                request_timeout_fraction: env_or_f64("EXTRACT_REQUEST_TIMEOUT_FRACTION", 0.7),
            },
            search: SearchConfig {
                default_web_result_limit: env_or("SEARCH_DEFAULT_WEB_RESULT_LIMIT", 10),
                default_image_result_limit: env_or("SEARCH_DEFAULT_IMAGE_RESULT_LIMIT", 10),
                default_news_result_limit: env_or("SEARCH_DEFAULT_NEWS_RESULT_LIMIT", 10),
                image_flat_rate_credits: env_or_f64("SEARCH_IMAGE_FLAT_RATE_CREDITS", 1.0),
            },
            integrations: IntegrationsConfig {
                llm_api_url: env::var("LLM_API_URL")
                    .unwrap_or_else(|_| "https://api.openai.com/v1/chat/completions".to_string()),
                llm_api_key: env::var("LLM_API_KEY").ok(),
                llm_model: env::var("LLM_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
                use_db_authentication: env::var("USE_DB_AUTHENTICATION")
                    .map(|v| v == "true")
                    .unwrap_or(false),
            },
        })
    }
}

fn required_env(key: &str) -> Result<String, AppError> {
    env::var(key).map_err(|_| AppError::Config(format!("{key} is required")))
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T, AppError> {
    match env::var(key) {
        Ok(v) => v
            .parse()
            .map_err(|_| AppError::Config(format!("invalid {key}"))),
        Err(_) => Ok(default),
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_or_f64(key: &str, default: f64) -> f64 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renew_interval_is_roughly_a_third_of_lease() {
        let qc = QueueConfig {
            database_url: String::new(),
            listen_url: String::new(),
            max_connections: 1,
            min_connections: 1,
            acquire_timeout_secs: 1,
            idle_timeout_secs: 1,
            lease_seconds: 60,
            reap_interval_seconds: 20,
        };
        assert_eq!(qc.renew_interval(), std::time::Duration::from_secs(20));
    }
}
