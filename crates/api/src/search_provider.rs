use async_trait::async_trait;
use search::{SearchCategory, SearchProvider, SearchResultItem};
use serde::Deserialize;
use shared::AppError;

/// The concrete `SearchProvider` for a running deployment. Lives in `api`
/// rather than `shared` alongside `HttpLlmExtractor`/`ConfiguredBilling`:
/// `search` already depends on `shared`, so `shared` taking a dependency on
/// `search`'s `SearchProvider` trait to host the impl would be circular.
/// Follows `crawl::webhook::HttpWebhookSender`'s shape: a configurable
/// endpoint, a bearer key, one JSON POST.
pub struct HttpSearchProvider {
    http: reqwest::Client,
    api_url: String,
    api_key: Option<String>,
}

impl HttpSearchProvider {
    pub fn new(api_url: String, api_key: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_url,
            api_key,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ProviderResponse {
    #[serde(default)]
    results: Vec<SearchResultItem>,
}

#[async_trait]
impl SearchProvider for HttpSearchProvider {
    async fn search(&self, query: &str, categories: &[SearchCategory], limit: u32) -> Result<Vec<SearchResultItem>, AppError> {
        let mut request = self.http.post(&self.api_url).json(&serde_json::json!({
            "query": query,
            "categories": categories,
            "limit": limit,
        }));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?.error_for_status()?;
        let parsed: ProviderResponse = response.json().await?;
        Ok(parsed.results)
    }
}
