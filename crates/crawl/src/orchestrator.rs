use kv::{KvStore, KvStoreExt, Keys};
use queue::Queue;
use serde::{Deserialize, Serialize};
use serde_json::json;
use shared::config::CrawlConfig;
use shared::models::{CrawlerOptions, Document, InternalOptions, JobPayload, JobStatus, ScrapeOptions, SitemapPolicy, StoredCrawl};
use shared::{AppError, TransportableError};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use crate::canonicalize::canonicalize_url;
use crate::policy::PathPolicy;
use crate::robots;
use crate::sitemap;
use crate::webhook::WebhookSender;

/// Parameters for starting a new crawl.
pub struct CrawlSubmission {
    pub origin_url: String,
    pub crawler_options: CrawlerOptions,
    pub scrape_options: ScrapeOptions,
    pub internal_options: InternalOptions,
    pub team_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlStatusView {
    pub status: String,
    pub total: u64,
    pub completed: u64,
    pub job_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlErrorEntry {
    pub id: Uuid,
    pub url: Option<String>,
    pub code: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlErrorsView {
    pub errors: Vec<CrawlErrorEntry>,
    pub robots_blocked: Vec<String>,
}

/// Owns a crawl's lifecycle: submission, frontier admission, completion
/// detection, cancellation, and the errors view. All frontier state lives
/// in the KV store; this struct itself holds nothing mutable.
pub struct CrawlOrchestrator {
    kv: Arc<dyn KvStore>,
    queue: Arc<dyn Queue>,
    webhook: Arc<dyn WebhookSender>,
    http: reqwest::Client,
    config: CrawlConfig,
}

impl CrawlOrchestrator {
    pub fn new(kv: Arc<dyn KvStore>, queue: Arc<dyn Queue>, webhook: Arc<dyn WebhookSender>, config: CrawlConfig) -> Self {
        Self {
            kv,
            queue,
            webhook,
            http: reqwest::Client::new(),
            config,
        }
    }

    pub async fn submit(&self, submission: CrawlSubmission) -> Result<Uuid, AppError> {
        // validate the regex policy eagerly so a bad request fails before
        // any state is persisted.
        PathPolicy::compile(&submission.crawler_options)?;

        let id = Uuid::new_v4();
        let mut crawler_options = submission.crawler_options;

        crawler_options.limit = Some(match (crawler_options.sitemap, crawler_options.limit) {
            (Some(SitemapPolicy::Only), None) => self.config.sitemap_only_unbounded_cap.min(self.config.hard_limit_cap),
            (_, Some(limit)) => limit.min(self.config.hard_limit_cap),
            (_, None) => self.config.hard_limit_cap,
        });

        let robots = self.fetch_robots(&submission.origin_url).await;

        let mut stored = StoredCrawl::new(
            id,
            submission.origin_url,
            crawler_options,
            submission.scrape_options,
            submission.internal_options,
            submission.team_id,
        );
        stored.robots = robots;

        self.save(&stored).await?;

        let kickoff_id = Uuid::new_v4();
        let payload = JobPayload::CrawlKickoff { crawl_id: id };
        self.queue.add(kickoff_id, serde_json::to_value(&payload).map_err(|e| AppError::Json(e))?).await?;

        if let Some(webhook) = stored.crawler_options.webhook.clone() {
            self.webhook.send(&webhook, id, "started", json!({ "url": stored.origin_url })).await;
        }

        Ok(id)
    }

    async fn fetch_robots(&self, origin_url: &str) -> Option<String> {
        let robots_url = format!("{}/robots.txt", origin_url.trim_end_matches('/'));
        match self.http.get(&robots_url).timeout(Duration::from_secs(5)).send().await {
            Ok(response) if response.status().is_success() => response.text().await.ok(),
            Ok(response) => {
                info!(status = %response.status(), "no robots.txt, treating as unrestricted");
                None
            }
            Err(e) => {
                warn!(error = %e, "failed to fetch robots.txt, treating as unrestricted");
                None
            }
        }
    }

    /// Seeds the frontier from the origin URL and/or its sitemap. Called by
    /// the worker when it dequeues a `JobPayload::CrawlKickoff`.
    pub async fn process_kickoff(&self, crawl_id: Uuid) -> Result<(), AppError> {
        let stored = self
            .load(crawl_id)
            .await?
            .ok_or_else(|| AppError::JobNotFound(crawl_id))?;

        if stored.cancelled {
            return Ok(());
        }

        let sitemap_only = stored.crawler_options.sitemap == Some(SitemapPolicy::Only);
        let mut candidates = if sitemap_only { Vec::new() } else { vec![stored.origin_url.clone()] };

        if stored.crawler_options.sitemap != Some(SitemapPolicy::Skip) {
            match sitemap::fetch_sitemap(&self.http, &stored.origin_url).await {
                Ok(urls) => candidates.extend(urls),
                Err(e) => warn!(crawl_id = %crawl_id, error = %e, "sitemap fetch failed, continuing without it"),
            }
        }

        for url in candidates {
            self.admit_candidate(crawl_id, &stored, &url, 0).await?;
        }

        Ok(())
    }

    /// The crawl-wide dedup primitive; returns false past a zero-depth
    /// discovery limit.
    pub async fn try_admit_url(&self, crawl_id: Uuid, url: &str) -> Result<bool, AppError> {
        let stored = self
            .load(crawl_id)
            .await?
            .ok_or_else(|| AppError::JobNotFound(crawl_id))?;
        self.admit_candidate(crawl_id, &stored, url, 0).await
    }

    async fn admit_candidate(&self, crawl_id: Uuid, stored: &StoredCrawl, url: &str, depth: u32) -> Result<bool, AppError> {
        if stored.cancelled {
            return Ok(false);
        }

        let max_depth = stored.crawler_options.max_discovery_depth.unwrap_or(self.config.max_discovery_depth);
        if depth > max_depth {
            return Ok(false);
        }

        let policy = PathPolicy::compile(&stored.crawler_options)?;
        if !policy.allows(url) {
            return Ok(false);
        }

        if let Some(robots_txt) = &stored.robots {
            if !stored.crawler_options.ignore_robots_txt && robots::is_blocked(robots_txt, url) {
                self.kv.sadd(&Keys::crawl_robots_blocked(crawl_id), &[url.to_string()]).await?;
                return Ok(false);
            }
        }

        let canonical = canonicalize_url(url, false, true)?;

        let limit = stored.crawler_options.limit.unwrap_or(self.config.hard_limit_cap);
        let visited_key = Keys::crawl_visited(crawl_id);
        if self.kv.scard(&visited_key).await? >= limit {
            return Ok(false);
        }

        let added = self.kv.sadd(&visited_key, &[canonical.clone()]).await?;
        if added == 0 {
            return Ok(false);
        }

        let job_id = Uuid::new_v4();
        let payload = JobPayload::Scrape {
            url: canonical,
            team_id: stored.team_id,
            scrape_options: stored.scrape_options.clone(),
            crawl_id: Some(crawl_id),
            current_discovery_depth: depth,
        };
        self.queue.add(job_id, serde_json::to_value(&payload).map_err(|e| AppError::Json(e))?).await?;
        self.kv.sadd(&Keys::crawl_jobs(crawl_id), &[job_id.to_string()]).await?;

        Ok(true)
    }

    /// Records a child job's completion, recursively admits links it
    /// discovered, and runs the finish-lock election if the frontier is
    /// exhausted. Returns whether this call won the election (and should
    /// therefore fire the `completed` webhook).
    pub async fn record_completion(
        &self,
        crawl_id: Uuid,
        job_id: Uuid,
        current_depth: u32,
        document: Option<&Document>,
    ) -> Result<bool, AppError> {
        self.kv.sadd(&Keys::crawl_jobs_done(crawl_id), &[job_id.to_string()]).await?;
        self.kv.lpush(&Keys::crawl_jobs_done_ordered(crawl_id), &job_id.to_string()).await?;

        let stored = self
            .load(crawl_id)
            .await?
            .ok_or_else(|| AppError::JobNotFound(crawl_id))?;

        if !stored.cancelled {
            if let Some(document) = document {
                if let Some(webhook) = stored.crawler_options.webhook.clone() {
                    self.webhook
                        .send(&webhook, crawl_id, "page", json!({ "url": document.metadata.source_url }))
                        .await;
                }
                for link in &document.links {
                    self.admit_candidate(crawl_id, &stored, link, current_depth + 1).await?;
                }
            }
        }

        let jobs_count = self.kv.scard(&Keys::crawl_jobs(crawl_id)).await?;
        let done_count = self.kv.scard(&Keys::crawl_jobs_done(crawl_id)).await?;

        if done_count < jobs_count {
            return Ok(false);
        }

        let won_election = self.kv.set_nx(&Keys::crawl_finish(crawl_id), "yes", None).await?;
        if won_election {
            if let Some(webhook) = stored.crawler_options.webhook.clone() {
                self.webhook.send(&webhook, crawl_id, "completed", json!({ "total": jobs_count })).await;
            }
        }

        Ok(won_election)
    }

    /// Marks the crawl failed because its kickoff job could not seed the
    /// frontier.
    /// Child scrape jobs never call this; their individual failures are
    /// reported through `errors()` while the crawl itself stays `completed`.
    pub async fn fail_kickoff(&self, crawl_id: Uuid, reason: &str) -> Result<(), AppError> {
        let mut stored = self
            .load(crawl_id)
            .await?
            .ok_or_else(|| AppError::JobNotFound(crawl_id))?;
        stored.kickoff_failed = true;
        if let Some(webhook) = stored.crawler_options.webhook.clone() {
            self.webhook.send(&webhook, crawl_id, "failed", json!({ "error": reason })).await;
        }
        self.save(&stored).await
    }

    pub async fn cancel(&self, crawl_id: Uuid) -> Result<(), AppError> {
        let mut stored = self
            .load(crawl_id)
            .await?
            .ok_or_else(|| AppError::JobNotFound(crawl_id))?;
        stored.cancelled = true;
        self.save(&stored).await
    }

    pub async fn status(&self, crawl_id: Uuid, offset: i64, limit: i64) -> Result<CrawlStatusView, AppError> {
        let stored = self
            .load(crawl_id)
            .await?
            .ok_or_else(|| AppError::JobNotFound(crawl_id))?;

        let total = self.kv.scard(&Keys::crawl_jobs(crawl_id)).await?;
        let completed = self.kv.scard(&Keys::crawl_jobs_done(crawl_id)).await?;
        let finished = self.kv.exists(&Keys::crawl_finish(crawl_id)).await?;

        let status = if stored.kickoff_failed {
            "failed"
        } else if stored.cancelled {
            "cancelled"
        } else if finished {
            "completed"
        } else {
            "scraping"
        };

        let job_ids = self
            .kv
            .lrange(&Keys::crawl_jobs_done_ordered(crawl_id), offset, offset + limit - 1)
            .await?;

        Ok(CrawlStatusView {
            status: status.to_string(),
            total,
            completed,
            job_ids,
        })
    }

    pub async fn errors(&self, crawl_id: Uuid) -> Result<CrawlErrorsView, AppError> {
        let job_ids: Vec<Uuid> = self
            .kv
            .smembers(&Keys::crawl_jobs(crawl_id))
            .await?
            .iter()
            .filter_map(|s| Uuid::parse_str(s).ok())
            .collect();

        let failed = self.queue.get_jobs_with_statuses(&job_ids, &[JobStatus::Failed]).await?;

        let errors = failed
            .into_iter()
            .map(|job| {
                let url = serde_json::from_value::<JobPayload>(job.data)
                    .ok()
                    .and_then(|payload| match payload {
                        JobPayload::Scrape { url, .. } => Some(url),
                        JobPayload::CrawlKickoff { .. } => None,
                    });

                let (code, error) = match job.failedreason.as_deref().map(TransportableError::from_json) {
                    Some(transportable) => (transportable.code, transportable.message),
                    None => ("UNKNOWN".to_string(), String::new()),
                };

                CrawlErrorEntry {
                    id: job.id,
                    url,
                    code,
                    error,
                }
            })
            .collect();

        let robots_blocked = self.kv.smembers(&Keys::crawl_robots_blocked(crawl_id)).await?;

        Ok(CrawlErrorsView { errors, robots_blocked })
    }

    pub async fn load(&self, crawl_id: Uuid) -> Result<Option<StoredCrawl>, AppError> {
        self.kv.get_json(&Keys::crawl(crawl_id)).await
    }

    async fn save(&self, stored: &StoredCrawl) -> Result<(), AppError> {
        self.kv
            .set_json(&Keys::crawl(stored.id), stored, Some(Duration::from_secs(self.config.default_ttl_seconds)))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::webhook::NoopWebhookSender;
    use kv::fake::InMemoryKv;
    use shared::models::ScrapeOptions;

    // The fake Queue below only needs to support the handful of operations
    // the orchestrator calls; it keeps everything in a Mutex<Vec<Job>>.
    use async_trait::async_trait;
    use shared::models::Job;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration as StdDuration;

    struct FakeQueue {
        jobs: Mutex<HashMap<Uuid, Job>>,
    }

    impl FakeQueue {
        fn new() -> Self {
            Self { jobs: Mutex::new(HashMap::new()) }
        }
    }

    #[async_trait]
    impl Queue for FakeQueue {
        async fn add(&self, id: Uuid, data: serde_json::Value) -> Result<Job, AppError> {
            let job = Job {
                id,
                status: JobStatus::Queued,
                data,
                created_at: chrono::Utc::now(),
                lock: None,
                locked_at: None,
                finished_at: None,
                returnvalue: None,
                failedreason: None,
            };
            self.jobs.lock().unwrap().insert(id, job.clone());
            Ok(job)
        }

        async fn get_job(&self, id: Uuid) -> Result<Option<Job>, AppError> {
            Ok(self.jobs.lock().unwrap().get(&id).cloned())
        }

        async fn get_jobs(&self, ids: &[Uuid]) -> Result<Vec<Job>, AppError> {
            let jobs = self.jobs.lock().unwrap();
            Ok(ids.iter().filter_map(|id| jobs.get(id).cloned()).collect())
        }

        async fn get_jobs_with_statuses(&self, ids: &[Uuid], statuses: &[JobStatus]) -> Result<Vec<Job>, AppError> {
            let jobs = self.jobs.lock().unwrap();
            Ok(ids
                .iter()
                .filter_map(|id| jobs.get(id).cloned())
                .filter(|j| statuses.contains(&j.status))
                .collect())
        }

        async fn remove(&self, id: Uuid) -> Result<bool, AppError> {
            Ok(self.jobs.lock().unwrap().remove(&id).is_some())
        }

        async fn claim(&self, _worker_nonce: &str) -> Result<Option<Job>, AppError> {
            Ok(None)
        }

        async fn renew_lock(&self, _id: Uuid, _worker_nonce: &str) -> Result<bool, AppError> {
            Ok(false)
        }

        async fn finish(&self, _id: Uuid, _worker_nonce: &str, _return_value: serde_json::Value) -> Result<bool, AppError> {
            Ok(false)
        }

        async fn fail(&self, id: Uuid, _worker_nonce: &str, failed_reason: String) -> Result<bool, AppError> {
            if let Some(job) = self.jobs.lock().unwrap().get_mut(&id) {
                job.status = JobStatus::Failed;
                job.failedreason = Some(failed_reason);
                return Ok(true);
            }
            Ok(false)
        }

        async fn wait_for_job(&self, _id: Uuid, _timeout: Option<StdDuration>) -> Result<queue::WaitOutcome, AppError> {
            Ok(queue::WaitOutcome::Completed(serde_json::Value::Null))
        }

        async fn reclaim_expired(&self, _lease: StdDuration) -> Result<u64, AppError> {
            Ok(0)
        }

        async fn job_counts_by_status(&self) -> Result<HashMap<JobStatus, i64>, AppError> {
            Ok(HashMap::new())
        }
    }

    fn config() -> CrawlConfig {
        CrawlConfig {
            default_ttl_seconds: 3600,
            max_concurrent_jobs: 10,
            sitemap_only_unbounded_cap: 1000,
            hard_limit_cap: 1000,
            max_discovery_depth: 5,
        }
    }

    fn orchestrator() -> CrawlOrchestrator {
        CrawlOrchestrator::new(
            Arc::new(InMemoryKv::new()),
            Arc::new(FakeQueue::new()),
            Arc::new(NoopWebhookSender),
            config(),
        )
    }

    async fn seed_crawl(orch: &CrawlOrchestrator, crawler_options: CrawlerOptions) -> Uuid {
        let id = Uuid::new_v4();
        let stored = StoredCrawl::new(
            id,
            "https://a.test".to_string(),
            crawler_options,
            ScrapeOptions::default(),
            InternalOptions::default(),
            Uuid::new_v4(),
        );
        orch.save(&stored).await.unwrap();
        id
    }

    #[tokio::test]
    async fn duplicate_url_is_admitted_only_once() {
        let orch = orchestrator();
        let id = seed_crawl(&orch, CrawlerOptions::default()).await;

        assert!(orch.try_admit_url(id, "https://a.test/page").await.unwrap());
        assert!(!orch.try_admit_url(id, "https://a.test/page").await.unwrap());

        assert_eq!(orch.kv.scard(&Keys::crawl_jobs(id)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn admits_exactly_one_more_at_limit_minus_one() {
        let orch = orchestrator();
        let mut opts = CrawlerOptions::default();
        opts.limit = Some(2);
        let id = seed_crawl(&orch, opts).await;

        assert!(orch.try_admit_url(id, "https://a.test/one").await.unwrap());
        assert!(orch.try_admit_url(id, "https://a.test/two").await.unwrap());
        assert!(!orch.try_admit_url(id, "https://a.test/three").await.unwrap());
    }

    #[tokio::test]
    async fn exclude_regex_rejects_matching_paths() {
        let orch = orchestrator();
        let mut opts = CrawlerOptions::default();
        opts.exclude_paths = vec!["^https://a.test/admin".to_string()];
        let id = seed_crawl(&orch, opts).await;

        assert!(orch.try_admit_url(id, "https://a.test/blog").await.unwrap());
        assert!(!orch.try_admit_url(id, "https://a.test/admin/x").await.unwrap());
    }

    #[tokio::test]
    async fn completion_election_fires_once_all_jobs_done() {
        let orch = orchestrator();
        let id = seed_crawl(&orch, CrawlerOptions::default()).await;

        assert!(orch.try_admit_url(id, "https://a.test/one").await.unwrap());
        let job_ids = orch.kv.smembers(&Keys::crawl_jobs(id)).await.unwrap();
        let job_id: Uuid = job_ids[0].parse().unwrap();

        let won = orch.record_completion(id, job_id, 0, None).await.unwrap();
        assert!(won);

        // a second call (e.g. a racing worker) must not win again.
        let other_job_id = Uuid::new_v4();
        orch.kv.sadd(&Keys::crawl_jobs(id), &[other_job_id.to_string()]).await.unwrap();
        let won_again = orch.record_completion(id, other_job_id, 0, None).await.unwrap();
        assert!(!won_again);
    }

    #[tokio::test]
    async fn cancel_stops_further_admission() {
        let orch = orchestrator();
        let id = seed_crawl(&orch, CrawlerOptions::default()).await;
        orch.cancel(id).await.unwrap();

        assert!(!orch.try_admit_url(id, "https://a.test/late").await.unwrap());
    }

    #[tokio::test]
    async fn discovered_links_are_admitted_recursively() {
        let orch = orchestrator();
        let id = seed_crawl(&orch, CrawlerOptions::default()).await;

        let document = Document {
            markdown: Some("x".to_string()),
            html: None,
            raw_html: None,
            links: vec!["https://a.test/child".to_string()],
            screenshot: None,
            extract: None,
            metadata: shared::models::DocumentMetadata::default(),
        };

        let seed_job = Uuid::new_v4();
        orch.kv.sadd(&Keys::crawl_jobs(id), &[seed_job.to_string()]).await.unwrap();
        orch.record_completion(id, seed_job, 0, Some(&document)).await.unwrap();

        assert!(orch.kv.sismember(&Keys::crawl_visited(id), "https://a.test/child").await.unwrap());
    }
}
