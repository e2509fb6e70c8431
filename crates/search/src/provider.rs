use async_trait::async_trait;
use shared::AppError;

use crate::types::{SearchCategory, SearchResultItem};

/// The search-engine client itself, kept opaque behind this trait. This
/// crate only needs to issue a query and get back unscraped result items.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(
        &self,
        query: &str,
        categories: &[SearchCategory],
        limit: u32,
    ) -> Result<Vec<SearchResultItem>, AppError>;
}

/// Test double returning a fixed, query-tagged result set.
pub struct FakeSearchProvider {
    pub results: Vec<SearchResultItem>,
}

impl FakeSearchProvider {
    pub fn new(results: Vec<SearchResultItem>) -> Self {
        Self { results }
    }
}

#[async_trait]
impl SearchProvider for FakeSearchProvider {
    async fn search(&self, _query: &str, categories: &[SearchCategory], limit: u32) -> Result<Vec<SearchResultItem>, AppError> {
        let filtered: Vec<SearchResultItem> = self
            .results
            .iter()
            .filter(|r| categories.is_empty() || categories.contains(&r.category))
            .take(limit as usize)
            .cloned()
            .collect();
        Ok(filtered)
    }
}
