pub mod orchestrator;
pub mod provider;
pub mod types;

pub use orchestrator::SearchOrchestrator;
pub use provider::{FakeSearchProvider, SearchProvider};
pub use types::{SearchCategory, SearchRequest, SearchResponse, SearchResultItem};
