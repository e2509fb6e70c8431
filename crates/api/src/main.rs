mod handlers;
mod middleware;
mod routes;
mod search_provider;
mod state;

use admission::{AdmissionController, CachingIdentitySource, PgIdentitySource};
use crawl::{CrawlOrchestrator, HttpWebhookSender};
use engine::{EngineRegistry, HttpEngine, JsonExtractionTransformer, LinkExtractionTransformer, MarkdownCleanupTransformer, Transformer};
use extract::{ExtractOrchestrator, SitemapUrlExpander, UrlExpander};
use kv::RedisKv;
use queue::PgQueue;
use search::SearchOrchestrator;
use shared::{Config, ConfiguredBilling, HttpLlmExtractor};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::search_provider::HttpSearchProvider;
use crate::state::AppState;

/// HTTP surface for the scrape/crawl/map/search/extract job-orchestration
/// service: admits requests through the same `AdmissionController` the
/// worker releases against, then either runs a request synchronously
/// (scrape, map, search) or hands it to a background orchestrator and
/// returns an id to poll (crawl, extract).
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "api=info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

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

    let admission = Arc::new(AdmissionController::new(kv.clone(), identity.clone(), config.admission.clone()));

    let mut engines = EngineRegistry::new();
    engines.register(Arc::new(HttpEngine::new()));
    let engines = Arc::new(engines);

    let llm = Arc::new(HttpLlmExtractor::new(config.integrations.clone()));
    let transformers: Vec<Arc<dyn Transformer>> = vec![
        Arc::new(MarkdownCleanupTransformer),
        Arc::new(LinkExtractionTransformer),
        Arc::new(JsonExtractionTransformer::new(llm.clone(), None)),
    ];

    let webhook = Arc::new(HttpWebhookSender::new(std::env::var("WEBHOOK_SIGNING_SECRET").ok()));
    let crawl = Arc::new(CrawlOrchestrator::new(kv.clone(), queue.clone(), webhook, config.crawl.clone()));

    let billing = Arc::new(ConfiguredBilling::new(config.integrations.clone(), std::env::var("BILLING_API_URL").ok()));

    let url_expander: Arc<dyn UrlExpander> = Arc::new(SitemapUrlExpander::new());
    let extract = Arc::new(ExtractOrchestrator::new(
        kv.clone(),
        engines.clone(),
        config.engine.clone(),
        llm.clone(),
        billing.clone(),
        url_expander.clone(),
        config.extract.clone(),
    ));

    let search_provider = Arc::new(HttpSearchProvider::new(
        std::env::var("SEARCH_PROVIDER_API_URL").unwrap_or_else(|_| "https://search.example.com/v1/search".to_string()),
        std::env::var("SEARCH_PROVIDER_API_KEY").ok(),
    ));
    let search = Arc::new(SearchOrchestrator::new(
        search_provider,
        queue.clone(),
        engines.clone(),
        config.engine.clone(),
        transformers.clone(),
        billing.clone(),
        Some(llm.clone()),
        config.search.clone(),
    ));

    let jwt_secret: Arc<str> = Arc::from(
        std::env::var("JWT_SECRET").unwrap_or_else(|_| "dev-secret-do-not-use-in-production".to_string()),
    );

    let state = AppState {
        queue,
        kv,
        admission,
        identity,
        engines,
        engine_config: config.engine.clone(),
        transformers,
        crawl,
        extract,
        search,
        url_expander,
        billing,
        jwt_secret,
        config: config.clone(),
    };

    let app = routes::build(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "api server listening");
    axum::serve(listener, app).await?;

    Ok(())
}
