use async_trait::async_trait;
use bb8_redis::{bb8, redis::AsyncCommands, RedisConnectionManager};
use shared::{config::KvConfig, AppError};
use std::time::Duration;
use tracing::debug;

use crate::KvStore;

pub type RedisPool = bb8::Pool<RedisConnectionManager>;

/// Redis-backed `KvStore`, pooled via `bb8` with per-call timing logged at
/// debug level.
#[derive(Clone)]
pub struct RedisKv {
    pool: RedisPool,
}

impl RedisKv {
    pub async fn new(config: &KvConfig) -> Result<Self, AppError> {
        let manager = RedisConnectionManager::new(config.redis_url.clone())
            .map_err(|e| AppError::Kv(format!("failed to create redis manager: {e}")))?;

        let pool = bb8::Pool::builder()
            .max_size(config.pool_max_size)
            .min_idle(Some((config.pool_max_size / 4).max(1)))
            .connection_timeout(Duration::from_secs(config.connection_timeout_secs))
            .build(manager)
            .await
            .map_err(|e| AppError::Kv(format!("failed to build redis pool: {e}")))?;

        {
            let mut conn = pool
                .get()
                .await
                .map_err(|e| AppError::Kv(format!("failed to get connection: {e}")))?;
            let _: String = redis::cmd("PING")
                .query_async(&mut *conn)
                .await
                .map_err(|e| AppError::Kv(e.to_string()))?;
        }

        debug!(max_connections = config.pool_max_size, "redis kv store initialized");
        Ok(Self { pool })
    }

    async fn conn(
        &self,
    ) -> Result<bb8::PooledConnection<'_, RedisConnectionManager>, AppError> {
        self.pool
            .get()
            .await
            .map_err(|e| AppError::Kv(format!("failed to get connection: {e}")))
    }
}

#[async_trait]
impl KvStore for RedisKv {
    async fn get_raw(&self, key: &str) -> Result<Option<String>, AppError> {
        let mut conn = self.conn().await?;
        conn.get(key).await.map_err(|e| AppError::Kv(e.to_string()))
    }

    async fn set_raw(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<(), AppError> {
        let mut conn = self.conn().await?;
        match ttl {
            Some(ttl) => {
                let _: () = conn
                    .set_ex(key, value, ttl.as_secs())
                    .await
                    .map_err(|e| AppError::Kv(e.to_string()))?;
            }
            None => {
                let _: () = conn.set(key, value).await.map_err(|e| AppError::Kv(e.to_string()))?;
            }
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), AppError> {
        let mut conn = self.conn().await?;
        let _: () = conn.del(key).await.map_err(|e| AppError::Kv(e.to_string()))?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, AppError> {
        let mut conn = self.conn().await?;
        conn.exists(key).await.map_err(|e| AppError::Kv(e.to_string()))
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<bool, AppError> {
        let mut conn = self.conn().await?;
        let set: bool = match ttl {
            Some(ttl) => redis::cmd("SET")
                .arg(key)
                .arg(value)
                .arg("NX")
                .arg("EX")
                .arg(ttl.as_secs())
                .query_async::<_, Option<String>>(&mut *conn)
                .await
                .map_err(|e| AppError::Kv(e.to_string()))?
                .is_some(),
            None => conn.set_nx(key, value).await.map_err(|e| AppError::Kv(e.to_string()))?,
        };
        Ok(set)
    }

    async fn sadd(&self, key: &str, members: &[String]) -> Result<u64, AppError> {
        let mut conn = self.conn().await?;
        conn.sadd(key, members).await.map_err(|e| AppError::Kv(e.to_string()))
    }

    async fn scard(&self, key: &str) -> Result<u64, AppError> {
        let mut conn = self.conn().await?;
        conn.scard(key).await.map_err(|e| AppError::Kv(e.to_string()))
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, AppError> {
        let mut conn = self.conn().await?;
        conn.smembers(key).await.map_err(|e| AppError::Kv(e.to_string()))
    }

    async fn sismember(&self, key: &str, member: &str) -> Result<bool, AppError> {
        let mut conn = self.conn().await?;
        conn.sismember(key, member).await.map_err(|e| AppError::Kv(e.to_string()))
    }

    async fn lpush(&self, key: &str, value: &str) -> Result<(), AppError> {
        let mut conn = self.conn().await?;
        let _: () = conn.lpush(key, value).await.map_err(|e| AppError::Kv(e.to_string()))?;
        Ok(())
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>, AppError> {
        let mut conn = self.conn().await?;
        conn.lrange(key, start as isize, stop as isize)
            .await
            .map_err(|e| AppError::Kv(e.to_string()))
    }

    async fn llen(&self, key: &str) -> Result<u64, AppError> {
        let mut conn = self.conn().await?;
        conn.llen(key).await.map_err(|e| AppError::Kv(e.to_string()))
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<(), AppError> {
        let mut conn = self.conn().await?;
        let _: () = conn
            .zadd(key, member, score)
            .await
            .map_err(|e| AppError::Kv(e.to_string()))?;
        Ok(())
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<(), AppError> {
        let mut conn = self.conn().await?;
        let _: () = conn.zrem(key, member).await.map_err(|e| AppError::Kv(e.to_string()))?;
        Ok(())
    }

    async fn zcard(&self, key: &str) -> Result<u64, AppError> {
        let mut conn = self.conn().await?;
        conn.zcard(key).await.map_err(|e| AppError::Kv(e.to_string()))
    }

    async fn zcount(&self, key: &str, min: f64, max: f64) -> Result<u64, AppError> {
        let mut conn = self.conn().await?;
        conn.zcount(key, min, max).await.map_err(|e| AppError::Kv(e.to_string()))
    }

    async fn zrangebyscore(&self, key: &str, min: f64, max: f64) -> Result<Vec<String>, AppError> {
        let mut conn = self.conn().await?;
        conn.zrangebyscore(key, min, max)
            .await
            .map_err(|e| AppError::Kv(e.to_string()))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), AppError> {
        let mut conn = self.conn().await?;
        let _: () = conn
            .expire(key, ttl.as_secs() as i64)
            .await
            .map_err(|e| AppError::Kv(e.to_string()))?;
        Ok(())
    }
}
