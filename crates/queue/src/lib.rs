pub mod pg;

use async_trait::async_trait;
use serde_json::Value;
use shared::{AppError, models::{Job, JobStatus}};
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

pub use pg::PgQueue;

#[derive(Debug, Clone)]
pub enum WaitOutcome {
    Completed(Value),
    Failed(String),
}

/// NuQ: the persistent scrape job queue. One table, one
/// notification channel, at-most-one-consumer dispatch via nonce fencing.
#[async_trait]
pub trait Queue: Send + Sync {
    async fn add(&self, id: Uuid, data: Value) -> Result<Job, AppError>;
    async fn get_job(&self, id: Uuid) -> Result<Option<Job>, AppError>;
    async fn get_jobs(&self, ids: &[Uuid]) -> Result<Vec<Job>, AppError>;
    async fn get_jobs_with_statuses(
        &self,
        ids: &[Uuid],
        statuses: &[JobStatus],
    ) -> Result<Vec<Job>, AppError>;
    async fn remove(&self, id: Uuid) -> Result<bool, AppError>;

    /// Atomically claim the oldest queued job, ordered by `created_at`,
    /// skipping rows locked by a concurrent claimer.
    async fn claim(&self, worker_nonce: &str) -> Result<Option<Job>, AppError>;
    async fn renew_lock(&self, id: Uuid, worker_nonce: &str) -> Result<bool, AppError>;
    async fn finish(&self, id: Uuid, worker_nonce: &str, return_value: Value) -> Result<bool, AppError>;
    async fn fail(&self, id: Uuid, worker_nonce: &str, failed_reason: String) -> Result<bool, AppError>;

    /// Subscribes to the notification channel *before* reading current
    /// state, eliminating the classic subscribe/state race.
    async fn wait_for_job(&self, id: Uuid, timeout: Option<Duration>) -> Result<WaitOutcome, AppError>;

    /// Reaper sweep: resets `active` rows whose lease has expired back to
    /// `queued`. Returns the number of rows reclaimed.
    async fn reclaim_expired(&self, lease: Duration) -> Result<u64, AppError>;

    async fn job_counts_by_status(&self) -> Result<HashMap<JobStatus, i64>, AppError>;
}
