pub mod engine;
pub mod fallback;
pub mod judge;
pub mod markdown;
pub mod pipeline;
pub mod transform;
pub mod types;

pub use engine::{Engine, FakeEngine, HttpEngine};
pub use fallback::build_fallback_list;
pub use judge::Judgement;
pub use pipeline::{scrape_url, EngineRegistry};
pub use transform::{run_transformers, JsonExtractionTransformer, LinkExtractionTransformer, MarkdownCleanupTransformer, Transformer};
pub use types::{EngineCapabilities, EngineId, EngineLogEntry, EngineMeta, EngineResult, ScrapeOutcome};
