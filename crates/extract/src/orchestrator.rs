use engine::{scrape_url, EngineRegistry, ScrapeOutcome};
use kv::{KvStore, KvStoreExt, Keys};
use serde_json::{json, Value};
use shared::config::{EngineConfig, ExtractConfig};
use shared::models::{InternalOptions, ScrapeOptions};
use shared::traits::{Billing, BillableScrape, LlmExtractor};
use shared::AppError;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::warn;
use url::Url;
use uuid::Uuid;

use crate::expand::{resolve_urls, UrlExpander};
use crate::merge::{MultiEntityMerger, SourcedItem};
use crate::schema::SchemaNode;
use crate::types::{ExtractRequest, ExtractResult, StoredExtract, ExtractStatus};

/// Bound on concurrent scrapes issued by one extract request: a bounded
/// worker pool rather than unbounded goroutine-style spawning.
const MAX_CONCURRENT_SCRAPES: usize = 10;

/// Plans, scrapes, and LLM-extracts a set of URLs, merging per-document
/// multi-entity results and mixing them with a single-answer pass.
/// Orchestrates synchronously inside `execute`; `submit` wraps that
/// in a background task and a KV-backed `StoredExtract` record so the HTTP
/// layer can offer both request/response and poll-by-id semantics.
pub struct ExtractOrchestrator {
    kv: Arc<dyn KvStore>,
    engines: Arc<EngineRegistry>,
    engine_config: EngineConfig,
    llm: Arc<dyn LlmExtractor>,
    billing: Arc<dyn Billing>,
    expander: Arc<dyn UrlExpander>,
    config: ExtractConfig,
}

impl ExtractOrchestrator {
    pub fn new(
        kv: Arc<dyn KvStore>,
        engines: Arc<EngineRegistry>,
        engine_config: EngineConfig,
        llm: Arc<dyn LlmExtractor>,
        billing: Arc<dyn Billing>,
        expander: Arc<dyn UrlExpander>,
        config: ExtractConfig,
    ) -> Self {
        Self {
            kv,
            engines,
            engine_config,
            llm,
            billing,
            expander,
            config,
        }
    }

    /// Persists an initial `Processing` record and spawns the pipeline in
    /// the background, returning the extract id immediately so the caller
    /// can poll `GET /v2/extract/:id`.
    pub async fn submit(self: &Arc<Self>, request: ExtractRequest) -> Result<Uuid, AppError> {
        let id = Uuid::new_v4();
        let stored = StoredExtract {
            id,
            team_id: request.team_id,
            status: ExtractStatus::Processing,
            created_at: chrono::Utc::now(),
            data: None,
            warning: None,
            error: None,
        };
        self.save(&stored).await?;

        let this = self.clone();
        tokio::spawn(async move {
            let outcome = this.execute(id, request).await;
            if let Err(e) = this.finalize(id, outcome).await {
                warn!(extract_id = %id, error = %e, "failed to persist extract outcome");
            }
        });

        Ok(id)
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<StoredExtract>, AppError> {
        self.kv.get_json(&Keys::extract(id)).await
    }

    async fn finalize(&self, id: Uuid, outcome: Result<ExtractResult, AppError>) -> Result<(), AppError> {
        let mut stored = self
            .get(id)
            .await?
            .ok_or_else(|| AppError::JobNotFound(id))?;

        match outcome {
            Ok(result) => {
                stored.status = ExtractStatus::Completed;
                stored.data = Some(result.data);
                stored.warning = result.warning;
            }
            Err(e) => {
                stored.status = ExtractStatus::Failed;
                stored.error = Some(e.to_string());
            }
        }
        self.save(&stored).await
    }

    async fn save(&self, stored: &StoredExtract) -> Result<(), AppError> {
        self.kv
            .set_json(&Keys::extract(stored.id), stored, Some(Duration::from_secs(6 * 3600)))
            .await
    }

    /// The full extract pipeline, run synchronously.
    pub async fn execute(&self, id: Uuid, request: ExtractRequest) -> Result<ExtractResult, AppError> {
        // Step 1: resolve URLs, applying the external-link policy against
        // the first URL's host.
        let resolved = resolve_urls(self.expander.as_ref(), &request.urls).await?;
        let resolved = apply_external_link_policy(resolved, request.allow_external_links);
        if resolved.is_empty() {
            return Err(AppError::BadRequest("no URLs resolved for extraction".to_string()));
        }

        // Step 2: optionally author a schema from a natural-language prompt.
        let schema_value = match (&request.schema, &request.prompt) {
            (Some(schema), _) => Some(schema.clone()),
            (None, Some(prompt)) => Some(self.llm.generate_schema_from_prompt(prompt).await?),
            (None, None) => None,
        };

        // Step 3: compile and classify the schema.
        let (single_schema, multi_schema, multi_entity_keys) = match &schema_value {
            Some(schema_value) => {
                let compiled = SchemaNode::compile(schema_value)?;
                let classification = self.llm.classify_multi_entity(schema_value).await?;
                let (single, multi) = compiled.split_multi_entity(&classification.multi_entity_keys);
                (Some(single), multi, classification.multi_entity_keys)
            }
            None => (None, None, Vec::new()),
        };

        // Step 4: scrape every resolved URL, bounded concurrency, per-URL
        // timeout = floor(request_timeout * 0.7).
        let per_url_timeout = request
            .request_timeout_ms
            .map(|ms| Duration::from_millis((ms as f64 * self.config.request_timeout_fraction).floor() as u64))
            .unwrap_or_else(|| Duration::from_millis(self.engine_config.default_timeout_ms));

        let documents = self.scrape_all(&resolved, per_url_timeout).await;
        let ok_documents: Vec<(&String, &String)> = documents
            .iter()
            .filter_map(|(url, markdown)| markdown.as_ref().map(|md| (url, md)))
            .collect();

        let mut warning = None;

        // Step 6: single-answer pass over the concatenated documents.
        let single_answer = if single_schema.is_some() || schema_value.is_none() {
            let concatenated = ok_documents
                .iter()
                .map(|(url, markdown)| format!("# {url}\n\n{markdown}"))
                .collect::<Vec<_>>()
                .join("\n\n---\n\n");
            // The compiled `single_schema` has no JSON Schema serializer of
            // its own; the LLM gets the full original schema and is trusted
            // to answer only its non-multi-entity fields here, since the
            // multi-entity fields are filled in separately below.
            Some(self.llm.extract(&concatenated, schema_value.as_ref()).await?)
        } else {
            None
        };

        // Step 5: multi-entity pass, chunked. Items are bucketed by the
        // schema key they were extracted under so two array fields (e.g.
        // "products" and "reviews") are merged independently rather than
        // pooled into one array.
        let merged_by_key: HashMap<String, crate::merge::MergedEntities> = if let Some(multi_schema) = &multi_schema {
            let schema_for_llm = schema_value.clone();
            let candidate_keys = multi_schema.multi_entity_candidates_or_self();
            let mut items_by_key: HashMap<String, Vec<SourcedItem>> =
                candidate_keys.iter().map(|k| (k.clone(), Vec::new())).collect();

            for chunk in ok_documents.chunks(self.config.multi_entity_chunk_size) {
                let mut tasks = Vec::with_capacity(chunk.len());
                for (url, markdown) in chunk {
                    let url = (*url).clone();
                    let markdown = (*markdown).clone();
                    let llm = self.llm.clone();
                    let schema_for_llm = schema_for_llm.clone();
                    let timeout = Duration::from_secs(self.config.per_document_timeout_seconds);
                    tasks.push(tokio::spawn(async move {
                        let result = tokio::time::timeout(timeout, llm.extract(&markdown, schema_for_llm.as_ref())).await;
                        (url, result)
                    }));
                }
                for task in tasks {
                    match task.await {
                        Ok((url, Ok(Ok(value)))) => {
                            push_multi_entity_items(&mut items_by_key, &value, &url);
                        }
                        Ok((url, Ok(Err(e)))) => warn!(%url, error = %e, "multi-entity extraction failed for document"),
                        Ok((url, Err(_))) => warn!(%url, "multi-entity extraction timed out"),
                        Err(e) => warn!(error = %e, "multi-entity extraction task panicked"),
                    }
                }
            }

            let merger = MultiEntityMerger::new(Vec::new());
            items_by_key
                .into_iter()
                .map(|(key, items)| (key, merger.merge(items)))
                .collect()
        } else {
            HashMap::new()
        };

        if ok_documents.len() < resolved.len() {
            warning = Some(format!(
                "{} of {} URLs failed to scrape and were excluded from extraction",
                resolved.len() - ok_documents.len(),
                resolved.len()
            ));
        }

        // Step 8: mix single + multi results into the final shape.
        let mut data = single_answer.unwrap_or_else(|| json!({}));
        let mut sources = HashMap::new();
        if let Some(obj) = data.as_object_mut() {
            for key in &multi_entity_keys {
                if let Some(merged) = merged_by_key.get(key) {
                    obj.insert(key.clone(), Value::Array(merged.items.clone()));
                    for (identity, urls) in &merged.sources {
                        sources.insert(format!("{key}:{identity}"), urls.clone());
                    }
                }
            }
        }

        let serialized = serde_json::to_string(&data).unwrap_or_default();
        let cost_tokens = (serialized.len() as u64).div_ceil(4) + 300;
        self.billing
            .charge(request.team_id, self.billing.calculate_credits_to_be_billed(&BillableScrape::default()))
            .await
            .unwrap_or_else(|e| warn!(extract_id = %id, error = %e, "billing charge failed for extract"));

        Ok(ExtractResult { id, data, sources, warning, cost_tokens })
    }

    async fn scrape_all(&self, urls: &[String], timeout: Duration) -> Vec<(String, Option<String>)> {
        let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENT_SCRAPES.min(urls.len().max(1))));
        let mut tasks = Vec::with_capacity(urls.len());

        for url in urls {
            let url = url.clone();
            let semaphore = semaphore.clone();
            let engines = self.engines.clone();
            let engine_config = self.engine_config.clone();
            let options = ScrapeOptions {
                timeout_ms: Some(timeout.as_millis() as u64),
                ..Default::default()
            };

            tasks.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                let outcome = scrape_url(&engines, &engine_config, &url, &options, &InternalOptions::default(), &[]).await;
                let markdown = match outcome {
                    ScrapeOutcome::Success { document, .. } => document.markdown,
                    ScrapeOutcome::Failure { .. } => None,
                };
                (url, markdown)
            }));
        }

        let mut results = Vec::with_capacity(tasks.len());
        for task in tasks {
            match task.await {
                Ok(pair) => results.push(pair),
                Err(e) => warn!(error = %e, "extract scrape task panicked"),
            }
        }
        results
    }
}

/// Rejects resolved URLs whose host differs from the first URL's host,
/// unless the caller opted into `allow_external_links`.
fn apply_external_link_policy(urls: Vec<String>, allow_external_links: bool) -> Vec<String> {
    if allow_external_links || urls.len() <= 1 {
        return urls;
    }
    let Some(origin_host) = urls.first().and_then(|u| Url::parse(u).ok()).and_then(|u| u.host_str().map(str::to_string)) else {
        return urls;
    };
    urls.into_iter()
        .filter(|u| Url::parse(u).ok().and_then(|u| u.host_str().map(str::to_string)).as_deref() == Some(origin_host.as_str()))
        .collect()
}

fn push_multi_entity_items(items_by_key: &mut HashMap<String, Vec<SourcedItem>>, value: &Value, source: &str) {
    let Some(obj) = value.as_object() else { return };
    for (key, bucket) in items_by_key.iter_mut() {
        let Some(Value::Array(array)) = obj.get(key) else { continue };
        for entry in array {
            bucket.push(SourcedItem { value: entry.clone(), source: source.to_string() });
        }
    }
}

impl SchemaNode {
    /// Helper for the orchestrator: the array-valued property names of a
    /// (possibly already-split) multi-entity side-schema, falling back to
    /// the node itself when it's a bare array rather than an object.
    fn multi_entity_candidates_or_self(&self) -> Vec<String> {
        match self {
            SchemaNode::Object { properties, .. } => properties.iter().map(|(name, _)| name.clone()).collect(),
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expand::FakeUrlExpander;
    use async_trait::async_trait;
    use engine::{EngineId, FakeEngine};
    use shared::traits::{BillableScrape, MultiEntityClassification};

    struct FakeLlm {
        schema: Value,
        multi_keys: Vec<String>,
    }

    #[async_trait]
    impl LlmExtractor for FakeLlm {
        async fn extract(&self, content: &str, _schema: Option<&Value>) -> Result<Value, AppError> {
            // The single-answer pass calls with a "# <url>\n\n"-prefixed
            // concatenation; the per-document multi-entity pass calls with
            // raw document markdown. Distinguish on that shape.
            if content.starts_with('#') || self.multi_keys.is_empty() {
                Ok(json!({"summary": "ok"}))
            } else {
                Ok(json!({"products": [{"name": "Widget", "price": 9.99}]}))
            }
        }

        async fn generate_schema_from_prompt(&self, _prompt: &str) -> Result<Value, AppError> {
            Ok(self.schema.clone())
        }

        async fn classify_multi_entity(&self, _schema: &Value) -> Result<MultiEntityClassification, AppError> {
            Ok(MultiEntityClassification {
                is_multi_entity: !self.multi_keys.is_empty(),
                multi_entity_keys: self.multi_keys.clone(),
                reasoning: "test".to_string(),
            })
        }
    }

    struct FakeBilling;

    #[async_trait]
    impl Billing for FakeBilling {
        async fn charge(&self, _team_id: Uuid, _credits: f64) -> Result<(), AppError> {
            Ok(())
        }
        fn calculate_credits_to_be_billed(&self, _request: &BillableScrape) -> f64 {
            1.0
        }
    }

    fn config() -> ExtractConfig {
        ExtractConfig {
            multi_entity_chunk_size: 50,
            per_document_timeout_seconds: 45,
            request_timeout_fraction: 0.7,
        }
    }

    fn engine_config() -> EngineConfig {
        EngineConfig {
            default_timeout_ms: 5_000,
            min_markdown_length: 1,
            max_status_code_for_success: 300,
        }
    }

    fn orchestrator(multi_keys: Vec<String>) -> ExtractOrchestrator {
        let mut registry = EngineRegistry::new();
        registry.register(Arc::new(FakeEngine::ok(EngineId::Http, "x".repeat(200), 200)));

        ExtractOrchestrator::new(
            Arc::new(kv::fake::InMemoryKv::new()),
            Arc::new(registry),
            engine_config(),
            Arc::new(FakeLlm {
                schema: json!({"type": "object", "properties": {"products": {"type": "array", "items": {"type": "string"}}}}),
                multi_keys,
            }),
            Arc::new(FakeBilling),
            Arc::new(FakeUrlExpander { urls: vec![] }),
            config(),
        )
    }

    #[tokio::test]
    async fn single_answer_request_returns_data_without_sources() {
        let orch = orchestrator(vec![]);
        let request = ExtractRequest {
            team_id: Uuid::new_v4(),
            urls: vec!["https://a.test/page".to_string()],
            prompt: None,
            schema: None,
            allow_external_links: false,
            request_timeout_ms: None,
        };
        let result = orch.execute(Uuid::new_v4(), request).await.unwrap();
        assert_eq!(result.data["summary"], "ok");
        assert!(result.sources.is_empty());
    }

    #[tokio::test]
    async fn multi_entity_request_merges_into_sources_map() {
        let orch = orchestrator(vec!["products".to_string()]);
        let request = ExtractRequest {
            team_id: Uuid::new_v4(),
            urls: vec!["https://a.test/page".to_string()],
            prompt: None,
            schema: Some(json!({
                "type": "object",
                "properties": {"products": {"type": "array", "items": {"type": "string"}}},
            })),
            allow_external_links: false,
            request_timeout_ms: None,
        };
        let result = orch.execute(Uuid::new_v4(), request).await.unwrap();
        assert!(!result.sources.is_empty());
        assert_eq!(result.data["products"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn submit_then_get_reaches_completed_status() {
        let orch = Arc::new(orchestrator(vec![]));
        let request = ExtractRequest {
            team_id: Uuid::new_v4(),
            urls: vec!["https://a.test/page".to_string()],
            prompt: None,
            schema: None,
            allow_external_links: false,
            request_timeout_ms: None,
        };
        let id = orch.submit(request).await.unwrap();

        for _ in 0..50 {
            if let Some(stored) = orch.get(id).await.unwrap() {
                if stored.status != ExtractStatus::Processing {
                    assert_eq!(stored.status, ExtractStatus::Completed);
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("extract did not complete in time");
    }
}
