mod claim_loop;
mod context;
mod job;
mod promoter;
mod reaper;

use admission::{AdmissionController, CachingIdentitySource, PgIdentitySource};
use clap::Parser;
use crawl::{CrawlOrchestrator, HttpWebhookSender};
use engine::{EngineRegistry, HttpEngine, JsonExtractionTransformer, LinkExtractionTransformer, MarkdownCleanupTransformer, Transformer};
use kv::RedisKv;
use queue::PgQueue;
use shared::{Config, ConfiguredBilling, HttpLlmExtractor, TracingJobLog};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::context::WorkerContext;

/// Background worker for the scrape/crawl job pipeline: claims rows off
/// NuQ, runs the engine fallback pipeline, and reports terminal outcomes
/// back to the queue, the crawl orchestrator, and the admission controller.
#[derive(Parser)]
#[command(name = "worker")]
#[command(about = "Scrape/crawl job worker")]
struct Cli {
    /// Number of concurrent claim-loop tasks to run in this process.
    #[arg(long, default_value_t = 4)]
    concurrency: usize,

    /// How often an idle claim loop polls for a new job.
    #[arg(long, default_value_t = 1_000)]
    poll_interval_ms: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "worker=info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    let queue = Arc::new(PgQueue::connect(&config.queue).await?);
    queue.run_migrations().await?;

    let kv = Arc::new(RedisKv::new(&config.kv).await?);

    let identity_pool = PgIdentitySource::connect(&config.queue.database_url).await?;
    identity_pool.run_migrations().await?;
    let identity = Arc::new(CachingIdentitySource::new(
        Arc::new(identity_pool),
        kv.clone(),
        Duration::from_secs(config.admission.identity_cache_ttl_seconds),
    ));

    let admission = Arc::new(AdmissionController::new(kv.clone(), identity, config.admission.clone()));

    let mut engines = EngineRegistry::new();
    engines.register(Arc::new(HttpEngine::new()));
    let engines = Arc::new(engines);

    let llm = Arc::new(HttpLlmExtractor::new(config.integrations.clone()));
    let transformers: Vec<Arc<dyn Transformer>> = vec![
        Arc::new(MarkdownCleanupTransformer),
        Arc::new(LinkExtractionTransformer),
        Arc::new(JsonExtractionTransformer::new(llm, None)),
    ];

    let webhook = Arc::new(HttpWebhookSender::new(std::env::var("WEBHOOK_SIGNING_SECRET").ok()));
    let crawl = Arc::new(CrawlOrchestrator::new(kv.clone(), queue.clone(), webhook, config.crawl.clone()));

    let billing = Arc::new(ConfiguredBilling::new(config.integrations.clone(), std::env::var("BILLING_API_URL").ok()));
    let job_log = Arc::new(TracingJobLog);

    let ctx = Arc::new(WorkerContext {
        queue: queue.clone(),
        admission: admission.clone(),
        engines,
        engine_config: config.engine.clone(),
        transformers,
        crawl,
        billing,
        job_log,
        queue_config: config.queue.clone(),
    });

    let poll_interval = Duration::from_millis(cli.poll_interval_ms);
    let mut tasks = Vec::new();

    for _ in 0..cli.concurrency {
        let ctx = ctx.clone();
        tasks.push(tokio::spawn(async move { claim_loop::run(ctx, poll_interval).await }));
    }

    tasks.push(tokio::spawn({
        let ctx = ctx.clone();
        async move { reaper::run(ctx).await }
    }));

    tasks.push(tokio::spawn({
        let ctx = ctx.clone();
        async move { promoter::run(ctx, Duration::from_secs(5)).await }
    }));

    tracing::info!(concurrency = cli.concurrency, "worker started");

    for task in tasks {
        task.await?;
    }

    Ok(())
}
