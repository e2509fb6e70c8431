use shared::config::EngineConfig;
use shared::models::{Document, DocumentMetadata, EngineAttempt, InternalOptions, ScrapeOptions};
use shared::AppError;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::engine::Engine;
use crate::fallback::build_fallback_list;
use crate::judge::Judgement;
use crate::transform::{run_transformers, Transformer};
use crate::types::{EngineId, EngineLogEntry, EngineMeta, ScrapeOutcome};

/// The set of `Engine` implementations actually available in this
/// deployment, keyed by identifier. The fallback list is built from a
/// static catalogue but only engines registered here are
/// ever invoked — an unregistered catalogue entry is silently skipped,
/// matching "filtered by options" rather than treated as a hard failure.
#[derive(Default)]
pub struct EngineRegistry {
    engines: HashMap<EngineId, Arc<dyn Engine>>,
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, engine: Arc<dyn Engine>) {
        self.engines.insert(engine.id(), engine);
    }

    pub fn get(&self, id: EngineId) -> Option<Arc<dyn Engine>> {
        self.engines.get(&id).cloned()
    }
}

/// `scrapeURL`: builds the fallback list, tries each
/// registered engine in order, judges the result, and accepts the first
/// one that passes (or whose status code is authoritatively bad). Runs the
/// post-transformer pipeline over the accepted document before returning.
pub async fn scrape_url(
    registry: &EngineRegistry,
    config: &EngineConfig,
    url: &str,
    options: &ScrapeOptions,
    internal_options: &InternalOptions,
    transformers: &[Arc<dyn Transformer>],
) -> ScrapeOutcome {
    let fallback_list = build_fallback_list(options);
    let mut logs: Vec<EngineLogEntry> = Vec::new();

    for id in fallback_list {
        let Some(engine) = registry.get(id) else {
            debug!(engine = id.as_str(), "engine not registered, skipping");
            continue;
        };

        let timeout = options
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| Duration::from_millis(config.default_timeout_ms));

        let meta = EngineMeta {
            url: url.to_string(),
            options: options.clone(),
            internal_options: internal_options.clone(),
            timeout,
        };

        let result = match engine.scrape(&meta).await {
            Ok(result) => result,
            Err(AppError::ScrapeTimeout(ms)) => {
                logs.push(EngineLogEntry {
                    engine: id,
                    accepted: false,
                    is_long_enough: false,
                    is_good_status_code: false,
                    has_no_page_error: false,
                    reason: format!("timed out after {ms}ms"),
                    timed_out: true,
                });
                continue;
            }
            Err(e) => {
                warn!(engine = id.as_str(), error = %e, "engine error, trying next engine");
                logs.push(EngineLogEntry {
                    engine: id,
                    accepted: false,
                    is_long_enough: false,
                    is_good_status_code: false,
                    has_no_page_error: false,
                    reason: e.to_string(),
                    timed_out: false,
                });
                continue;
            }
        };

        let judgement = Judgement::evaluate(&result, config);
        let entry = EngineLogEntry {
            engine: id,
            accepted: judgement.accepted(),
            is_long_enough: judgement.is_long_enough,
            is_good_status_code: judgement.is_good_status_code,
            has_no_page_error: judgement.has_no_page_error,
            reason: judgement.reason(),
            timed_out: false,
        };
        logs.push(entry);

        if judgement.accepted() {
            let attempts: Vec<EngineAttempt> = logs
                .iter()
                .map(|l| EngineAttempt {
                    engine: l.engine.as_str().to_string(),
                    accepted: l.accepted,
                    reason: l.reason.clone(),
                })
                .collect();

            let document = Document {
                markdown: result.markdown,
                html: result.html.clone(),
                raw_html: result.html,
                links: vec![],
                screenshot: None,
                extract: None,
                metadata: DocumentMetadata {
                    source_url: url.to_string(),
                    status_code: Some(result.status_code),
                    proxy_used: None,
                    num_pages: None,
                    credits_used: None,
                    engine_used: Some(id.as_str().to_string()),
                    attempts,
                    error: result.error,
                },
            };

            return match run_transformers(document, transformers).await {
                Ok(document) => ScrapeOutcome::Success { document, logs },
                Err(e) => ScrapeOutcome::Failure {
                    reason: format!("post-transform failed: {e}"),
                    logs,
                },
            };
        }
    }

    ScrapeOutcome::Failure {
        reason: "no engine accepted a result".to_string(),
        logs,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::FakeEngine;

    fn config() -> EngineConfig {
        EngineConfig {
            default_timeout_ms: 5_000,
            min_markdown_length: 100,
            max_status_code_for_success: 300,
        }
    }

    #[tokio::test]
    async fn accepts_first_engine_that_passes_judgement() {
        let mut registry = EngineRegistry::new();
        registry.register(Arc::new(FakeEngine::ok(EngineId::Http, "x".repeat(200), 200)));

        let outcome = scrape_url(
            &registry,
            &config(),
            "https://example.com",
            &ScrapeOptions::default(),
            &InternalOptions::default(),
            &[],
        )
        .await;

        match outcome {
            ScrapeOutcome::Success { document, logs } => {
                assert_eq!(document.metadata.status_code, Some(200));
                assert_eq!(logs.len(), 1);
            }
            ScrapeOutcome::Failure { .. } => panic!("expected success"),
        }
    }

    #[tokio::test]
    async fn accepts_bad_status_code_without_trying_further_engines() {
        let mut registry = EngineRegistry::new();
        registry.register(Arc::new(FakeEngine::ok(EngineId::Http, "short", 404)));
        registry.register(Arc::new(FakeEngine::ok(EngineId::HeadlessBrowser, "x".repeat(200), 200)));

        let outcome = scrape_url(
            &registry,
            &config(),
            "https://example.com",
            &ScrapeOptions::default(),
            &InternalOptions::default(),
            &[],
        )
        .await;

        match outcome {
            ScrapeOutcome::Success { document, logs } => {
                assert_eq!(document.metadata.status_code, Some(404));
                assert_eq!(logs.len(), 1);
            }
            ScrapeOutcome::Failure { .. } => panic!("expected success from authoritative bad status"),
        }
    }

    #[tokio::test]
    async fn falls_back_to_next_engine_when_first_is_too_short() {
        let mut registry = EngineRegistry::new();
        registry.register(Arc::new(FakeEngine::ok(EngineId::Http, "short", 200)));
        registry.register(Arc::new(FakeEngine::ok(EngineId::HeadlessBrowser, "x".repeat(200), 200)));

        let outcome = scrape_url(
            &registry,
            &config(),
            "https://example.com",
            &ScrapeOptions::default(),
            &InternalOptions::default(),
            &[],
        )
        .await;

        match outcome {
            ScrapeOutcome::Success { document, logs } => {
                assert_eq!(document.metadata.engine_used.as_deref(), Some("headless_browser"));
                assert_eq!(logs.len(), 2);
            }
            ScrapeOutcome::Failure { .. } => panic!("expected fallback to succeed"),
        }
    }

    #[tokio::test]
    async fn fails_with_no_engines_left_when_all_reject() {
        let mut registry = EngineRegistry::new();
        registry.register(Arc::new(FakeEngine::ok(EngineId::Http, "short", 200)));

        let outcome = scrape_url(
            &registry,
            &config(),
            "https://example.com",
            &ScrapeOptions::default(),
            &InternalOptions::default(),
            &[],
        )
        .await;

        match outcome {
            ScrapeOutcome::Failure { logs, .. } => {
                assert_eq!(logs.len(), 1);
                assert!(!outcome_all_timed_out(&logs));
            }
            ScrapeOutcome::Success { .. } => panic!("expected failure"),
        }
    }

    #[tokio::test]
    async fn all_engines_timing_out_is_distinguishable_from_a_genuine_reject() {
        let mut registry = EngineRegistry::new();
        registry.register(Arc::new(FakeEngine::timeout(EngineId::Http, 500)));
        registry.register(Arc::new(FakeEngine::timeout(EngineId::HeadlessBrowser, 500)));

        let outcome = scrape_url(
            &registry,
            &config(),
            "https://example.com",
            &ScrapeOptions::default(),
            &InternalOptions::default(),
            &[],
        )
        .await;

        match outcome {
            ScrapeOutcome::Failure { ref logs, .. } => {
                assert_eq!(logs.len(), 2);
                assert!(outcome.all_attempts_timed_out());
            }
            ScrapeOutcome::Success { .. } => panic!("expected failure"),
        }
    }

    fn outcome_all_timed_out(logs: &[EngineLogEntry]) -> bool {
        !logs.is_empty() && logs.iter().all(|l| l.timed_out)
    }
}
