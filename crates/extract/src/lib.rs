pub mod expand;
pub mod merge;
pub mod orchestrator;
pub mod schema;
pub mod types;

pub use expand::{SitemapUrlExpander, UrlExpander};
pub use merge::{MergedEntities, MultiEntityMerger, SourcedItem};
pub use orchestrator::ExtractOrchestrator;
pub use schema::SchemaNode;
pub use types::{ExtractAnalysis, ExtractRequest, ExtractResult, ExtractStatus, StoredExtract};
