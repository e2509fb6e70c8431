pub mod fake;
pub mod redis_kv;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use shared::AppError;
use std::time::Duration;

pub use redis_kv::RedisKv;

/// The key-value store abstraction backing the crawl frontier and the
/// admission controller's concurrency registers, extended past a plain
/// cache trait with the set/sorted-set/list primitives those two
/// subsystems need.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get_raw(&self, key: &str) -> Result<Option<String>, AppError>;
    async fn set_raw(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<(), AppError>;
    async fn delete(&self, key: &str) -> Result<(), AppError>;
    async fn exists(&self, key: &str) -> Result<bool, AppError>;

    /// Set the key only if absent. Returns true iff this call set it
    /// (the frontier's finish-lock relies on this primitive).
    async fn set_nx(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<bool, AppError>;

    /// Add members to a set, returning the number of members that were
    /// newly added (the crawl dedup primitive relies on this count).
    async fn sadd(&self, key: &str, members: &[String]) -> Result<u64, AppError>;
    async fn scard(&self, key: &str) -> Result<u64, AppError>;
    async fn smembers(&self, key: &str) -> Result<Vec<String>, AppError>;
    async fn sismember(&self, key: &str, member: &str) -> Result<bool, AppError>;

    async fn lpush(&self, key: &str, value: &str) -> Result<(), AppError>;
    async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>, AppError>;
    async fn llen(&self, key: &str) -> Result<u64, AppError>;

    /// Sorted set operations, used by the admission controller's active-jobs
    /// register and concurrency-limit-queue.
    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<(), AppError>;
    async fn zrem(&self, key: &str, member: &str) -> Result<(), AppError>;
    async fn zcard(&self, key: &str) -> Result<u64, AppError>;
    /// Count of members scored in `[min, max]`.
    async fn zcount(&self, key: &str, min: f64, max: f64) -> Result<u64, AppError>;
    /// Members scored in `[min, max]`, ascending.
    async fn zrangebyscore(&self, key: &str, min: f64, max: f64) -> Result<Vec<String>, AppError>;

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), AppError>;
}

/// Convenience typed wrappers layered on the raw string-keyed trait: generic
/// `get`/`set` methods over JSON-serializable values.
#[async_trait]
pub trait KvStoreExt: KvStore {
    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, AppError> {
        match self.get_raw(key).await? {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| AppError::Kv(format!("deserializing key {key}: {e}"))),
            None => Ok(None),
        }
    }

    async fn set_json<T: Serialize + Sync>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<(), AppError> {
        let raw = serde_json::to_string(value)
            .map_err(|e| AppError::Kv(format!("serializing key {key}: {e}")))?;
        self.set_raw(key, raw, ttl).await
    }
}

impl<T: KvStore + ?Sized> KvStoreExt for T {}

/// Centralized key-naming for every subsystem sharing this KV store.
pub struct Keys;

impl Keys {
    pub fn crawl(id: uuid::Uuid) -> String {
        format!("crawl:{id}")
    }
    pub fn crawl_visited(id: uuid::Uuid) -> String {
        format!("crawl:{id}:visited")
    }
    pub fn crawl_jobs(id: uuid::Uuid) -> String {
        format!("crawl:{id}:jobs")
    }
    pub fn crawl_jobs_done(id: uuid::Uuid) -> String {
        format!("crawl:{id}:jobs_done")
    }
    pub fn crawl_jobs_done_ordered(id: uuid::Uuid) -> String {
        format!("crawl:{id}:jobs_done_ordered")
    }
    pub fn crawl_robots_blocked(id: uuid::Uuid) -> String {
        format!("crawl:{id}:robots_blocked")
    }
    pub fn crawl_finish(id: uuid::Uuid) -> String {
        format!("crawl:{id}:finish")
    }
    pub fn concurrency_limiter(team_id: uuid::Uuid) -> String {
        format!("concurrency-limiter:{team_id}")
    }
    pub fn concurrency_limit_queue(team_id: uuid::Uuid) -> String {
        format!("concurrency-limit-queue:{team_id}")
    }
    pub fn extract(id: uuid::Uuid) -> String {
        format!("extract:{id}")
    }
    pub fn acuc(team_id: uuid::Uuid, mode: &str) -> String {
        format!("acuc:{team_id}:{mode}")
    }
}
