use admission::{AdmissionController, CachingIdentitySource};
use crawl::CrawlOrchestrator;
use engine::{EngineRegistry, Transformer};
use extract::{ExtractOrchestrator, UrlExpander};
use kv::KvStore;
use queue::Queue;
use search::SearchOrchestrator;
use shared::config::{Config, EngineConfig};
use shared::Billing;
use std::sync::Arc;

/// Everything an HTTP handler needs, bundled the same way
/// `worker::context::WorkerContext` bundles the claim loop's collaborators.
#[derive(Clone)]
pub struct AppState {
    pub queue: Arc<dyn Queue>,
    pub kv: Arc<dyn KvStore>,
    pub admission: Arc<AdmissionController>,
    pub identity: Arc<CachingIdentitySource>,
    pub engines: Arc<EngineRegistry>,
    pub engine_config: EngineConfig,
    pub transformers: Vec<Arc<dyn Transformer>>,
    pub crawl: Arc<CrawlOrchestrator>,
    pub extract: Arc<ExtractOrchestrator>,
    pub search: Arc<SearchOrchestrator>,
    pub url_expander: Arc<dyn UrlExpander>,
    pub billing: Arc<dyn Billing>,
    pub jwt_secret: Arc<str>,
    pub config: Config,
}
