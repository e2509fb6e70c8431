use engine::{scrape_url, EngineRegistry, ScrapeOutcome, Transformer};
use queue::{Queue, WaitOutcome};
use shared::config::{EngineConfig, SearchConfig};
use shared::models::{DocumentMetadata, InternalOptions, JobPayload};
use shared::traits::{Billing, BillableScrape, LlmExtractor};
use shared::AppError;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::warn;
use uuid::Uuid;

use crate::provider::SearchProvider;
use crate::types::{SearchCategory, SearchRequest, SearchResponse, SearchResultItem};

/// Issues a search query, fans scraping out to the engine fallback pipeline
/// (directly or via NuQ), reassembles results by stable input position, and
/// bills the team.
pub struct SearchOrchestrator {
    provider: Arc<dyn SearchProvider>,
    queue: Arc<dyn Queue>,
    engines: Arc<EngineRegistry>,
    engine_config: EngineConfig,
    transformers: Vec<Arc<dyn Transformer>>,
    billing: Arc<dyn Billing>,
    llm: Option<Arc<dyn LlmExtractor>>,
    config: SearchConfig,
}

impl SearchOrchestrator {
    pub fn new(
        provider: Arc<dyn SearchProvider>,
        queue: Arc<dyn Queue>,
        engines: Arc<EngineRegistry>,
        engine_config: EngineConfig,
        transformers: Vec<Arc<dyn Transformer>>,
        billing: Arc<dyn Billing>,
        llm: Option<Arc<dyn LlmExtractor>>,
        config: SearchConfig,
    ) -> Self {
        Self {
            provider,
            queue,
            engines,
            engine_config,
            transformers,
            billing,
            llm,
            config,
        }
    }

    pub async fn search(&self, request: SearchRequest, team_concurrency_ceiling: u32) -> Result<SearchResponse, AppError> {
        let query = if request.rephrase_prompt {
            match &self.llm {
                Some(llm) => llm.rephrase_query(&request.query).await?,
                None => request.query.clone(),
            }
        } else {
            request.query.clone()
        };

        let categories = if request.categories.is_empty() {
            vec![SearchCategory::Web]
        } else {
            request.categories.clone()
        };

        let limit = request.limit.unwrap_or(self.config.default_web_result_limit);
        let mut results = self.provider.search(&query, &categories, limit).await?;
        self.cap_per_category(&mut results);

        let concurrency = (team_concurrency_ceiling as usize).max(1).min(results.len().max(1));
        let semaphore = Arc::new(Semaphore::new(concurrency));

        let mut tasks = Vec::with_capacity(results.len());
        for (index, item) in results.into_iter().enumerate() {
            if item.category == SearchCategory::Images {
                tasks.push(tokio::spawn(async move { (index, item) }));
                continue;
            }

            let semaphore = semaphore.clone();
            let scrape_options = request.scrape_options.clone();
            let team_id = request.team_id;
            let bypass_queue = request.bypass_queue;
            let engines = self.engines.clone();
            let engine_config = self.engine_config.clone();
            let transformers = self.transformers.clone();
            let queue = self.queue.clone();

            tasks.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                let item = Self::scrape_item(
                    item,
                    team_id,
                    bypass_queue,
                    scrape_options,
                    &engines,
                    &engine_config,
                    &transformers,
                    queue.as_ref(),
                )
                .await;
                (index, item)
            }));
        }

        let mut ordered: Vec<(usize, SearchResultItem)> = Vec::with_capacity(tasks.len());
        for task in tasks {
            match task.await {
                Ok(pair) => ordered.push(pair),
                Err(e) => warn!(error = %e, "search scrape task panicked"),
            }
        }
        ordered.sort_by_key(|(index, _)| *index);
        let results: Vec<SearchResultItem> = ordered.into_iter().map(|(_, item)| item).collect();

        let mut credits_used = 0.0;
        for item in &results {
            credits_used += match item.category {
                SearchCategory::Images => self.config.image_flat_rate_credits,
                _ => self.billing.calculate_credits_to_be_billed(&BillableScrape {
                    formats: request.scrape_options.formats.clone(),
                    num_pages: item.metadata.as_ref().and_then(|m| m.num_pages),
                    used_stealth_proxy: request.scrape_options.stealth_proxy,
                    zero_data_retention: false,
                    used_agent: false,
                }),
            };
        }
        if credits_used > 0.0 {
            self.billing.charge(request.team_id, credits_used).await?;
        }

        Ok(SearchResponse { query, results, credits_used })
    }

    fn cap_per_category(&self, results: &mut Vec<SearchResultItem>) {
        let mut web = 0u32;
        let mut images = 0u32;
        let mut news = 0u32;
        results.retain(|item| {
            let (count, cap) = match item.category {
                SearchCategory::Web => (&mut web, self.config.default_web_result_limit),
                SearchCategory::Images => (&mut images, self.config.default_image_result_limit),
                SearchCategory::News => (&mut news, self.config.default_news_result_limit),
            };
            if *count >= cap {
                false
            } else {
                *count += 1;
                true
            }
        });
    }

    #[allow(clippy::too_many_arguments)]
    async fn scrape_item(
        mut item: SearchResultItem,
        team_id: Uuid,
        bypass_queue: bool,
        scrape_options: shared::models::ScrapeOptions,
        engines: &EngineRegistry,
        engine_config: &EngineConfig,
        transformers: &[Arc<dyn Transformer>],
        queue: &dyn Queue,
    ) -> SearchResultItem {
        if bypass_queue {
            let outcome = scrape_url(
                engines,
                engine_config,
                &item.url,
                &scrape_options,
                &InternalOptions::default(),
                transformers,
            )
            .await;
            match outcome {
                ScrapeOutcome::Success { document, .. } => {
                    item.markdown = document.markdown;
                    item.html = document.html;
                    item.links = document.links;
                    item.metadata = Some(document.metadata);
                }
                ScrapeOutcome::Failure { reason, .. } => item.scrape_error = Some(reason),
            }
            return item;
        }

        let job_id = Uuid::new_v4();
        let payload = JobPayload::Scrape {
            url: item.url.clone(),
            team_id,
            scrape_options: scrape_options.clone(),
            crawl_id: None,
            current_discovery_depth: 0,
        };
        let data = match serde_json::to_value(&payload) {
            Ok(v) => v,
            Err(e) => {
                item.scrape_error = Some(e.to_string());
                return item;
            }
        };

        if let Err(e) = queue.add(job_id, data).await {
            item.scrape_error = Some(e.to_string());
            return item;
        }

        let timeout = scrape_options
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| Duration::from_millis(engine_config.default_timeout_ms));

        match queue.wait_for_job(job_id, Some(timeout)).await {
            Ok(WaitOutcome::Completed(value)) => match serde_json::from_value::<shared::models::Document>(value) {
                Ok(document) => {
                    item.markdown = document.markdown;
                    item.html = document.html;
                    item.links = document.links;
                    item.metadata = Some(document.metadata);
                }
                Err(e) => item.scrape_error = Some(e.to_string()),
            },
            Ok(WaitOutcome::Failed(reason)) => item.scrape_error = Some(reason),
            Err(e) => item.scrape_error = Some(e.to_string()),
        }

        item
    }
}

#[allow(dead_code)]
fn unused_import_anchor(_: DocumentMetadata) {}
