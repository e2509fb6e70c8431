use async_trait::async_trait;
use serde_json::Value;
use shared::{
    config::QueueConfig,
    models::{Job, JobStatus},
    AppError,
};
use sqlx::postgres::{PgListener, PgPoolOptions};
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{Queue, WaitOutcome};

const CHANNEL: &str = "queue_scrape";

/// Postgres-backed implementation of NuQ. Owns one pooled connection for
/// CRUD/claim traffic and opens dedicated `PgListener` connections for
/// `wait_for_job`, following the `NUQ_DATABASE_URL` / `NUQ_DATABASE_URL_LISTEN`
/// split.
#[derive(Clone)]
pub struct PgQueue {
    pool: PgPool,
    listen_url: String,
}

impl PgQueue {
    pub async fn connect(config: &QueueConfig) -> Result<Self, AppError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
            .connect(&config.database_url)
            .await?;

        Ok(Self {
            pool,
            listen_url: config.listen_url.clone(),
        })
    }

    pub fn from_pool(pool: PgPool, listen_url: String) -> Self {
        Self { pool, listen_url }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Opens a dedicated listener on the `queue_scrape` channel. Used by
    /// the worker binary's notification-listener task to wake
    /// idle claim loops as soon as a job finishes or fails, rather than
    /// waiting out their poll interval.
    pub async fn subscribe(&self) -> Result<PgListener, AppError> {
        let mut listener = PgListener::connect(&self.listen_url).await.map_err(sqlx::Error::from)?;
        listener.listen(CHANNEL).await.map_err(sqlx::Error::from)?;
        Ok(listener)
    }

    pub async fn run_migrations(&self) -> Result<(), AppError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::Internal(format!("migration failed: {e}")))
    }

    fn row_to_job(row: sqlx::postgres::PgRow) -> Result<Job, AppError> {
        use sqlx::Row as _;
        Ok(Job {
            id: row.try_get("id")?,
            status: row.try_get("status")?,
            data: row.try_get("data")?,
            created_at: row.try_get("created_at")?,
            lock: row.try_get("lock")?,
            locked_at: row.try_get("locked_at")?,
            finished_at: row.try_get("finished_at")?,
            returnvalue: row.try_get("returnvalue")?,
            failedreason: row.try_get("failedreason")?,
        })
    }
}

#[async_trait]
impl Queue for PgQueue {
    async fn add(&self, id: Uuid, data: Value) -> Result<Job, AppError> {
        let row = sqlx::query(
            r#"
            INSERT INTO queue_scrape (id, status, data, created_at)
            VALUES ($1, 'queued', $2, now())
            RETURNING id, status, data, created_at, lock, locked_at, finished_at, returnvalue, failedreason
            "#,
        )
        .bind(id)
        .bind(&data)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.code().as_deref() == Some("23505") => {
                AppError::BadRequest(format!("job {id} already exists"))
            }
            _ => AppError::Database(e.into()),
        })?;

        Self::row_to_job(row)
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<Job>, AppError> {
        let row = sqlx::query(
            r#"SELECT id, status, data, created_at, lock, locked_at, finished_at, returnvalue, failedreason
               FROM queue_scrape WHERE id = $1"#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_job).transpose()
    }

    async fn get_jobs(&self, ids: &[Uuid]) -> Result<Vec<Job>, AppError> {
        let rows = sqlx::query(
            r#"SELECT id, status, data, created_at, lock, locked_at, finished_at, returnvalue, failedreason
               FROM queue_scrape WHERE id = ANY($1)"#,
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_job).collect()
    }

    async fn get_jobs_with_statuses(
        &self,
        ids: &[Uuid],
        statuses: &[JobStatus],
    ) -> Result<Vec<Job>, AppError> {
        let rows = sqlx::query(
            r#"SELECT id, status, data, created_at, lock, locked_at, finished_at, returnvalue, failedreason
               FROM queue_scrape WHERE id = ANY($1) AND status = ANY($2)"#,
        )
        .bind(ids)
        .bind(statuses)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_job).collect()
    }

    async fn remove(&self, id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM queue_scrape WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn claim(&self, worker_nonce: &str) -> Result<Option<Job>, AppError> {
        let row = sqlx::query(
            r#"
            WITH claimable AS (
                SELECT id
                FROM queue_scrape
                WHERE status = 'queued'
                ORDER BY created_at ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE queue_scrape
            SET status = 'active',
                lock = $1,
                locked_at = now()
            WHERE id IN (SELECT id FROM claimable)
            RETURNING id, status, data, created_at, lock, locked_at, finished_at, returnvalue, failedreason
            "#,
        )
        .bind(worker_nonce)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_job).transpose()
    }

    async fn renew_lock(&self, id: Uuid, worker_nonce: &str) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"UPDATE queue_scrape SET locked_at = now()
               WHERE id = $1 AND lock = $2 AND status = 'active'"#,
        )
        .bind(id)
        .bind(worker_nonce)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn finish(&self, id: Uuid, worker_nonce: &str, return_value: Value) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"UPDATE queue_scrape
               SET status = 'completed', finished_at = now(), returnvalue = $3
               WHERE id = $1 AND lock = $2 AND status = 'active'"#,
        )
        .bind(id)
        .bind(worker_nonce)
        .bind(&return_value)
        .execute(&self.pool)
        .await?;

        let finished = result.rows_affected() > 0;
        if finished {
            notify(&self.pool, id, "completed").await?;
        }
        Ok(finished)
    }

    async fn fail(&self, id: Uuid, worker_nonce: &str, failed_reason: String) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"UPDATE queue_scrape
               SET status = 'failed', finished_at = now(), failedreason = $3
               WHERE id = $1 AND lock = $2 AND status = 'active'"#,
        )
        .bind(id)
        .bind(worker_nonce)
        .bind(&failed_reason)
        .execute(&self.pool)
        .await?;

        let failed = result.rows_affected() > 0;
        if failed {
            notify(&self.pool, id, "failed").await?;
        }
        Ok(failed)
    }

    async fn wait_for_job(&self, id: Uuid, timeout: Option<Duration>) -> Result<WaitOutcome, AppError> {
        let wait = async {
            // Subscribe before reading current state: a notification fired
            // between the read and the subscribe would otherwise be missed.
            let mut listener = PgListener::connect(&self.listen_url)
                .await
                .map_err(sqlx::Error::from)?;
            listener.listen(CHANNEL).await.map_err(sqlx::Error::from)?;

            if let Some(outcome) = self.terminal_outcome(id).await? {
                return Ok(outcome);
            }

            loop {
                match listener.recv().await {
                    Ok(notification) => {
                        if notification_matches(notification.payload(), id) {
                            // The notification payload only carries
                            // "<id>|status"; the authoritative return value
                            // or failure reason lives on the row itself.
                            if let Some(outcome) = self.terminal_outcome(id).await? {
                                return Ok(outcome);
                            }
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, %id, "notification listener dropped, reconnecting");
                        listener = PgListener::connect(&self.listen_url)
                            .await
                            .map_err(sqlx::Error::from)?;
                        listener.listen(CHANNEL).await.map_err(sqlx::Error::from)?;
                        // Re-check current state after reconnecting in case
                        // the terminal notification was missed mid-drop.
                        if let Some(outcome) = self.terminal_outcome(id).await? {
                            return Ok(outcome);
                        }
                    }
                }
            }
        };

        match timeout {
            Some(d) => tokio::time::timeout(d, wait)
                .await
                .map_err(|_| AppError::ScrapeTimeout(d.as_millis() as u64))?,
            None => wait.await,
        }
    }

    async fn reclaim_expired(&self, lease: Duration) -> Result<u64, AppError> {
        let result = sqlx::query(
            r#"UPDATE queue_scrape
               SET status = 'queued', lock = NULL, locked_at = NULL
               WHERE status = 'active' AND locked_at < now() - $1::interval"#,
        )
        .bind(format!("{} seconds", lease.as_secs()))
        .execute(&self.pool)
        .await?;

        let reclaimed = result.rows_affected();
        if reclaimed > 0 {
            debug!(reclaimed, "reaper reset expired leases back to queued");
        }
        Ok(reclaimed)
    }

    async fn job_counts_by_status(&self) -> Result<HashMap<JobStatus, i64>, AppError> {
        let rows = sqlx::query("SELECT status, COUNT(*) as count FROM queue_scrape GROUP BY status")
            .fetch_all(&self.pool)
            .await?;

        let mut counts = HashMap::new();
        for row in rows {
            let status: JobStatus = row.try_get("status")?;
            let count: i64 = row.try_get("count")?;
            counts.insert(status, count);
        }
        Ok(counts)
    }
}

impl PgQueue {
    async fn terminal_outcome(&self, id: Uuid) -> Result<Option<WaitOutcome>, AppError> {
        let job = self.get_job(id).await?;
        Ok(job.and_then(|job| match job.status {
            JobStatus::Completed => Some(WaitOutcome::Completed(job.returnvalue.unwrap_or(Value::Null))),
            JobStatus::Failed => Some(WaitOutcome::Failed(
                job.failedreason.unwrap_or_else(|| "unknown error".to_string()),
            )),
            JobStatus::Queued | JobStatus::Active => None,
        }))
    }
}

async fn notify(pool: &PgPool, id: Uuid, status: &str) -> Result<(), AppError> {
    let payload = format!("{id}|{status}");
    sqlx::query("SELECT pg_notify($1, $2)")
        .bind(CHANNEL)
        .bind(payload)
        .execute(pool)
        .await?;
    Ok(())
}

fn notification_matches(payload: &str, expected_id: Uuid) -> bool {
    let Some((id_str, _status)) = payload.split_once('|') else {
        return false;
    };
    id_str.parse::<Uuid>().map(|id| id == expected_id).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notification_matches_checks_id_prefix() {
        let id = Uuid::new_v4();
        let other = Uuid::new_v4();
        assert!(!notification_matches(&format!("{id}|completed"), other));
        assert!(notification_matches(&format!("{id}|completed"), id));
        assert!(notification_matches(&format!("{id}|failed"), id));
        assert!(!notification_matches("not-a-valid-payload", id));
    }
}
