use admission::AdmissionController;
use crawl::CrawlOrchestrator;
use engine::{EngineRegistry, Transformer};
use queue::Queue;
use shared::config::{EngineConfig, QueueConfig};
use shared::{Billing, JobLog};
use std::sync::Arc;

/// Everything a claim-loop worker task needs to process one job, bundled so
/// `main` can `Arc` it once and hand out clones to every spawned task,
/// rather than threading a dozen arguments through the call chain.
pub struct WorkerContext {
    pub queue: Arc<dyn Queue>,
    pub admission: Arc<AdmissionController>,
    pub engines: Arc<EngineRegistry>,
    pub engine_config: EngineConfig,
    pub transformers: Vec<Arc<dyn Transformer>>,
    pub crawl: Arc<CrawlOrchestrator>,
    pub billing: Arc<dyn Billing>,
    pub job_log: Arc<dyn JobLog>,
    pub queue_config: QueueConfig,
}
