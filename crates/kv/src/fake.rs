use async_trait::async_trait;
use shared::AppError;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use crate::KvStore;

#[derive(Default)]
struct Inner {
    strings: HashMap<String, String>,
    sets: HashMap<String, BTreeSet<String>>,
    lists: HashMap<String, VecDeque<String>>,
    zsets: HashMap<String, Vec<(String, f64)>>,
}

/// In-memory `KvStore`, used by `#[tokio::test]` suites across the crawl,
/// admission, and extract crates so they don't need a live Redis instance.
#[derive(Default)]
pub struct InMemoryKv {
    inner: Mutex<Inner>,
}

impl InMemoryKv {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for InMemoryKv {
    async fn get_raw(&self, key: &str) -> Result<Option<String>, AppError> {
        Ok(self.inner.lock().unwrap().strings.get(key).cloned())
    }

    async fn set_raw(&self, key: &str, value: String, _ttl: Option<Duration>) -> Result<(), AppError> {
        self.inner.lock().unwrap().strings.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), AppError> {
        let mut inner = self.inner.lock().unwrap();
        inner.strings.remove(key);
        inner.sets.remove(key);
        inner.lists.remove(key);
        inner.zsets.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, AppError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.strings.contains_key(key)
            || inner.sets.contains_key(key)
            || inner.lists.contains_key(key)
            || inner.zsets.contains_key(key))
    }

    async fn set_nx(&self, key: &str, value: &str, _ttl: Option<Duration>) -> Result<bool, AppError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.strings.contains_key(key) {
            Ok(false)
        } else {
            inner.strings.insert(key.to_string(), value.to_string());
            Ok(true)
        }
    }

    async fn sadd(&self, key: &str, members: &[String]) -> Result<u64, AppError> {
        let mut inner = self.inner.lock().unwrap();
        let set = inner.sets.entry(key.to_string()).or_default();
        let mut added = 0u64;
        for m in members {
            if set.insert(m.clone()) {
                added += 1;
            }
        }
        Ok(added)
    }

    async fn scard(&self, key: &str) -> Result<u64, AppError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.sets.get(key).map(|s| s.len() as u64).unwrap_or(0))
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, AppError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.sets.get(key).map(|s| s.iter().cloned().collect()).unwrap_or_default())
    }

    async fn sismember(&self, key: &str, member: &str) -> Result<bool, AppError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.sets.get(key).map(|s| s.contains(member)).unwrap_or(false))
    }

    async fn lpush(&self, key: &str, value: &str) -> Result<(), AppError> {
        let mut inner = self.inner.lock().unwrap();
        inner.lists.entry(key.to_string()).or_default().push_front(value.to_string());
        Ok(())
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>, AppError> {
        let inner = self.inner.lock().unwrap();
        let Some(list) = inner.lists.get(key) else {
            return Ok(vec![]);
        };
        let len = list.len() as i64;
        let norm = |i: i64| -> i64 {
            if i < 0 {
                (len + i).max(0)
            } else {
                i.min(len)
            }
        };
        let (s, e) = (norm(start), norm(stop));
        if s > e || s >= len {
            return Ok(vec![]);
        }
        Ok(list.iter().skip(s as usize).take((e - s + 1) as usize).cloned().collect())
    }

    async fn llen(&self, key: &str) -> Result<u64, AppError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.lists.get(key).map(|l| l.len() as u64).unwrap_or(0))
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<(), AppError> {
        let mut inner = self.inner.lock().unwrap();
        let set = inner.zsets.entry(key.to_string()).or_default();
        set.retain(|(m, _)| m != member);
        set.push((member.to_string(), score));
        Ok(())
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<(), AppError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(set) = inner.zsets.get_mut(key) {
            set.retain(|(m, _)| m != member);
        }
        Ok(())
    }

    async fn zcard(&self, key: &str) -> Result<u64, AppError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.zsets.get(key).map(|s| s.len() as u64).unwrap_or(0))
    }

    async fn zcount(&self, key: &str, min: f64, max: f64) -> Result<u64, AppError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .zsets
            .get(key)
            .map(|s| s.iter().filter(|(_, score)| *score >= min && *score <= max).count() as u64)
            .unwrap_or(0))
    }

    async fn zrangebyscore(&self, key: &str, min: f64, max: f64) -> Result<Vec<String>, AppError> {
        let inner = self.inner.lock().unwrap();
        let Some(set) = inner.zsets.get(key) else {
            return Ok(vec![]);
        };
        let mut matches: Vec<_> = set.iter().filter(|(_, s)| *s >= min && *s <= max).cloned().collect();
        matches.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap());
        Ok(matches.into_iter().map(|(m, _)| m).collect())
    }

    async fn expire(&self, _key: &str, _ttl: Duration) -> Result<(), AppError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sadd_returns_newly_added_count() {
        let kv = InMemoryKv::new();
        assert_eq!(kv.sadd("s", &["a".into(), "b".into()]).await.unwrap(), 2);
        assert_eq!(kv.sadd("s", &["a".into(), "c".into()]).await.unwrap(), 1);
        assert_eq!(kv.scard("s").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn set_nx_only_succeeds_once() {
        let kv = InMemoryKv::new();
        assert!(kv.set_nx("lock", "1", None).await.unwrap());
        assert!(!kv.set_nx("lock", "1", None).await.unwrap());
    }

    #[tokio::test]
    async fn zrangebyscore_is_sorted_ascending() {
        let kv = InMemoryKv::new();
        kv.zadd("z", "b", 2.0).await.unwrap();
        kv.zadd("z", "a", 1.0).await.unwrap();
        kv.zadd("z", "c", 3.0).await.unwrap();
        let members = kv.zrangebyscore("z", 0.0, 10.0).await.unwrap();
        assert_eq!(members, vec!["a", "b", "c"]);
    }
}
