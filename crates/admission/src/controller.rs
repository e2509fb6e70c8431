use chrono::Utc;
use kv::{KvStore, KvStoreExt, Keys};
use serde_json::Value;
use shared::{config::AdmissionConfig, AppError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use crate::identity::CachingIdentitySource;
use crate::rate_limit::RateLimiterRegistry;
use crate::Mode;

/// A well-known key holding the set of team ids that currently have at
/// least one job sitting in their `concurrency-limit-queue:<teamId>` zset.
/// The admin-metrics endpoint needs to scan a well-known set of
/// concurrency-limit-queue keys; since the KV trait has no `SCAN`/`KEYS`
/// primitive, this index set is the concrete mechanism that scan walks.
const DEFERRED_TEAMS_INDEX: &str = "concurrency-limit-queue:index";

/// Proof that `admit` succeeded for a given `(team_id, job_id)`. Must be
/// released via `AdmissionController::release` once the job reaches a
/// terminal state; the `Drop` impl only logs a warning on a forgotten
/// ticket; it cannot perform the async ZREM itself.
pub struct AdmissionTicket {
    pub team_id: Uuid,
    pub job_id: Uuid,
    released: AtomicBool,
}

impl AdmissionTicket {
    fn new(team_id: Uuid, job_id: Uuid) -> Self {
        Self {
            team_id,
            job_id,
            released: AtomicBool::new(false),
        }
    }

    fn mark_released(&self) {
        self.released.store(true, Ordering::SeqCst);
    }

    /// Hands the ticket off across a process boundary: a worker process
    /// doesn't hold the `AdmissionController` that admitted the job, so it
    /// can't call `release(&ticket)` on this value directly. Marks the
    /// ticket released (silencing the drop warning here, in the admitting
    /// process) and returns the `(team_id, job_id)` pair the worker needs
    /// to call `AdmissionController::release_job` once the job terminates.
    pub fn into_parts(self) -> (Uuid, Uuid) {
        self.mark_released();
        (self.team_id, self.job_id)
    }
}

impl Drop for AdmissionTicket {
    fn drop(&mut self) {
        if !self.released.load(Ordering::SeqCst) {
            tracing::warn!(
                team_id = %self.team_id,
                job_id = %self.job_id,
                "admission ticket dropped without release; caller forgot to release it"
            );
        }
    }
}

/// The single entry point every HTTP handler and worker path calls before
/// a job is enqueued.
pub struct AdmissionController {
    kv: Arc<dyn KvStore>,
    identity: Arc<CachingIdentitySource>,
    rate_limiter: RateLimiterRegistry,
    config: AdmissionConfig,
}

impl AdmissionController {
    pub fn new(kv: Arc<dyn KvStore>, identity: Arc<CachingIdentitySource>, config: AdmissionConfig) -> Self {
        Self {
            kv,
            identity,
            rate_limiter: RateLimiterRegistry::new(),
            config,
        }
    }

    /// Gate 1 + gate 2, in order: rate limit, then credit
    /// balance. On success, registers `job_id` in the team's active-jobs
    /// sorted set (score = now + max_job_duration) and returns a ticket the
    /// caller must later `release`.
    pub async fn admit(
        &self,
        team_id: Uuid,
        mode: Mode,
        job_id: Uuid,
        minimum_requested: Option<i64>,
    ) -> Result<AdmissionTicket, AppError> {
        let identity = self.identity.fetch(team_id, mode).await?;

        let limit = identity
            .rate_limits
            .get(mode.as_str())
            .copied()
            .unwrap_or(self.config.default_rate_limit_per_minute);
        if !self.rate_limiter.check(team_id, mode.as_str(), limit) {
            return Err(AppError::RateLimited);
        }

        let minimum = minimum_requested.unwrap_or(1).max(1);
        let remaining = identity.remaining_credits();
        if remaining < minimum {
            return Err(AppError::InsufficientCredits {
                needed: minimum,
                available: remaining,
            });
        }

        let expiry = (Utc::now().timestamp_millis() as f64)
            + (self.config.default_job_duration_seconds as f64 * 1000.0);
        self.kv
            .zadd(&Keys::concurrency_limiter(team_id), &job_id.to_string(), expiry)
            .await?;

        Ok(AdmissionTicket::new(team_id, job_id))
    }

    /// Releases a ticket's slot in the active-jobs register. Safe to call
    /// more than once; the second call is a no-op ZREM.
    pub async fn release(&self, ticket: &AdmissionTicket) -> Result<(), AppError> {
        self.release_job(ticket.team_id, ticket.job_id).await?;
        ticket.mark_released();
        Ok(())
    }

    /// The same active-jobs-register ZREM `release` performs, addressed by
    /// id rather than by ticket. Used by the worker process after a job
    /// reaches a terminal state, once the ticket handed off via
    /// `AdmissionTicket::into_parts` has crossed the queue boundary.
    pub async fn release_job(&self, team_id: Uuid, job_id: Uuid) -> Result<(), AppError> {
        self.kv
            .zrem(&Keys::concurrency_limiter(team_id), &job_id.to_string())
            .await
    }

    /// `concurrency(team) = ZRANGEBYSCORE(key, now, +∞).length`: members
    /// scored at or before now are stale and excluded, which is how the
    /// sorted set self-prunes without an explicit sweep.
    pub async fn concurrency(&self, team_id: Uuid) -> Result<u64, AppError> {
        let now = Utc::now().timestamp_millis() as f64;
        self.kv.zcount(&Keys::concurrency_limiter(team_id), now, f64::MAX).await
    }

    /// `max(acuc.concurrency, otherACUC.concurrency)` (Open Question #1 in
    /// DESIGN.md): combines the ceiling for `mode` with the ceiling for its
    /// complementary mode so crawl and extract share capacity.
    pub async fn ceiling(&self, team_id: Uuid, mode: Mode) -> Result<u32, AppError> {
        let primary = self.identity.fetch(team_id, mode).await?;
        let other = self.identity.fetch(team_id, mode.complement()).await?;
        Ok(primary.concurrency.max(other.concurrency))
    }

    /// Whether a new job for `team_id`/`mode` would exceed the team's
    /// concurrency ceiling and should be deferred rather than enqueued.
    pub async fn should_defer(&self, team_id: Uuid, mode: Mode) -> Result<bool, AppError> {
        let ceiling = self.ceiling(team_id, mode).await?;
        let current = self.concurrency(team_id).await?;
        Ok(current >= ceiling as u64)
    }

    /// Parks `job_id`/`data` in `concurrency-limit-queue:<teamId>`, scored
    /// by enqueue time, for the promoter to pick up later.
    pub async fn defer(&self, team_id: Uuid, job_id: Uuid, data: Value) -> Result<(), AppError> {
        let now = Utc::now().timestamp_millis() as f64;
        self.kv
            .zadd(&Keys::concurrency_limit_queue(team_id), &job_id.to_string(), now)
            .await?;
        self.kv
            .set_json(&Self::payload_key(team_id, job_id), &data, None)
            .await?;
        self.kv
            .sadd(DEFERRED_TEAMS_INDEX, &[team_id.to_string()])
            .await?;
        Ok(())
    }

    /// Pops the oldest deferred job for `team_id` if the team now has
    /// spare concurrency. Returns `None` if nothing is deferred or the
    /// team is still at its ceiling.
    pub async fn take_ready(&self, team_id: Uuid, mode: Mode) -> Result<Option<(Uuid, Value)>, AppError> {
        if self.should_defer(team_id, mode).await? {
            return Ok(None);
        }
        let key = Keys::concurrency_limit_queue(team_id);
        let oldest = self.kv.zrangebyscore(&key, f64::MIN, f64::MAX).await?;
        let Some(raw_id) = oldest.into_iter().next() else {
            return Ok(None);
        };
        let job_id: Uuid = raw_id
            .parse()
            .map_err(|_| AppError::Internal(format!("corrupt deferred job id: {raw_id}")))?;
        let payload_key = Self::payload_key(team_id, job_id);
        let data = self
            .kv
            .get_json::<Value>(&payload_key)
            .await?
            .ok_or_else(|| AppError::Internal(format!("missing deferred payload for {job_id}")))?;
        self.kv.zrem(&key, &raw_id).await?;
        self.kv.delete(&payload_key).await?;
        Ok(Some((job_id, data)))
    }

    /// Team ids with at least one deferred job, for the promoter loop and
    /// for `GET /admin/metrics`'s `concurrency_limit_queue_job_count`.
    pub async fn deferred_teams(&self) -> Result<Vec<Uuid>, AppError> {
        let raw = self.kv.smembers(DEFERRED_TEAMS_INDEX).await?;
        Ok(raw.into_iter().filter_map(|s| s.parse().ok()).collect())
    }

    pub async fn deferred_count(&self, team_id: Uuid) -> Result<u64, AppError> {
        self.kv.zcard(&Keys::concurrency_limit_queue(team_id)).await
    }

    fn payload_key(team_id: Uuid, job_id: Uuid) -> String {
        format!("concurrency-limit-queue:payload:{team_id}:{job_id}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::FakeIdentitySource;
    use kv::fake::InMemoryKv;
    use shared::models::TeamFlags;
    use std::collections::HashMap;
    use std::time::Duration;

    fn config() -> AdmissionConfig {
        AdmissionConfig {
            identity_cache_ttl_seconds: 30,
            default_concurrency: 10,
            default_rate_limit_per_minute: 100,
            default_job_duration_seconds: 120,
        }
    }

    fn build(identity: shared::models::Identity) -> (AdmissionController, Arc<dyn KvStore>) {
        let fake = Arc::new(FakeIdentitySource::new());
        fake.insert(identity);
        let kv: Arc<dyn KvStore> = Arc::new(InMemoryKv::new());
        let source = Arc::new(CachingIdentitySource::new(fake, kv.clone(), Duration::from_secs(30)));
        (AdmissionController::new(kv.clone(), source, config()), kv)
    }

    fn identity(team_id: Uuid, concurrency: u32, price_credits: i64) -> shared::models::Identity {
        shared::models::Identity {
            team_id,
            sub_id: None,
            price_credits,
            credits_used: 0,
            adjusted_credits_used: 0,
            concurrency,
            rate_limits: HashMap::new(),
            flags: TeamFlags::default(),
        }
    }

    #[tokio::test]
    async fn admit_rejects_when_credits_are_insufficient() {
        let team_id = Uuid::new_v4();
        let (controller, _kv) = build(identity(team_id, 10, 0));
        let err = controller
            .admit(team_id, Mode::Scrape, Uuid::new_v4(), Some(1))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InsufficientCredits { .. }));
    }

    #[tokio::test]
    async fn admit_registers_job_in_active_set_and_release_removes_it() {
        let team_id = Uuid::new_v4();
        let (controller, _kv) = build(identity(team_id, 10, 100));
        let job_id = Uuid::new_v4();
        let ticket = controller.admit(team_id, Mode::Scrape, job_id, Some(1)).await.unwrap();
        assert_eq!(controller.concurrency(team_id).await.unwrap(), 1);
        controller.release(&ticket).await.unwrap();
        assert_eq!(controller.concurrency(team_id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn ceiling_combines_crawl_and_extract_with_max() {
        // Crawl mode for this team is capped at 2, but since Crawl pairs
        // with Extract and the identity store returns the same chunk for
        // any mode in this fake, max(2, 2) == 2; verify the call succeeds
        // and exercises both lookups without erroring.
        let team_id = Uuid::new_v4();
        let (controller, _kv) = build(identity(team_id, 2, 100));
        assert_eq!(controller.ceiling(team_id, Mode::Crawl).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn should_defer_once_ceiling_is_reached() {
        let team_id = Uuid::new_v4();
        let (controller, _kv) = build(identity(team_id, 1, 100));
        let job_a = Uuid::new_v4();
        controller.admit(team_id, Mode::Scrape, job_a, Some(1)).await.unwrap();
        assert!(controller.should_defer(team_id, Mode::Scrape).await.unwrap());
    }

    #[tokio::test]
    async fn deferred_job_is_promoted_once_capacity_frees() {
        let team_id = Uuid::new_v4();
        let (controller, _kv) = build(identity(team_id, 1, 100));
        let job_a = Uuid::new_v4();
        let ticket_a = controller.admit(team_id, Mode::Scrape, job_a, Some(1)).await.unwrap();

        let job_b = Uuid::new_v4();
        controller
            .defer(team_id, job_b, serde_json::json!({"url": "https://example.com"}))
            .await
            .unwrap();
        assert_eq!(controller.deferred_count(team_id).await.unwrap(), 1);
        assert!(controller.take_ready(team_id, Mode::Scrape).await.unwrap().is_none());

        controller.release(&ticket_a).await.unwrap();
        let (ready_id, data) = controller.take_ready(team_id, Mode::Scrape).await.unwrap().unwrap();
        assert_eq!(ready_id, job_b);
        assert_eq!(data["url"], "https://example.com");
        assert_eq!(controller.deferred_count(team_id).await.unwrap(), 0);
    }
}
