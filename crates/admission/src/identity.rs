use async_trait::async_trait;
use kv::{KvStore, KvStoreExt, Keys};
use shared::{models::Identity, AppError};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::Mode;

/// The opaque upstream collaborator that owns authoritative team identity /
/// credit-usage data; billing persistence lives behind this trait as an
/// external collaborator. The admission controller only ever talks through this
/// trait, the same seam pattern the fallback pipeline uses for `Engine`
/// and the extract orchestrator uses for `LlmExtractor`.
#[async_trait]
pub trait IdentitySource: Send + Sync {
    async fn fetch_identity(&self, team_id: Uuid, mode: Mode) -> Result<Identity, AppError>;
}

/// Wraps an `IdentitySource` with a short KV-backed TTL cache under
/// `acuc:<team_id>:<mode>`, so the admission controller does
/// not hit the billing store on every request.
pub struct CachingIdentitySource {
    inner: Arc<dyn IdentitySource>,
    kv: Arc<dyn KvStore>,
    ttl: Duration,
}

impl CachingIdentitySource {
    pub fn new(inner: Arc<dyn IdentitySource>, kv: Arc<dyn KvStore>, ttl: Duration) -> Self {
        Self { inner, kv, ttl }
    }

    pub async fn fetch(&self, team_id: Uuid, mode: Mode) -> Result<Identity, AppError> {
        let key = Keys::acuc(team_id, mode.as_str());
        if let Some(cached) = self.kv.get_json::<Identity>(&key).await? {
            return Ok(cached);
        }

        let identity = self.inner.fetch_identity(team_id, mode).await?;
        self.kv.set_json(&key, &identity, Some(self.ttl)).await?;
        Ok(identity)
    }
}

/// Test/dev double: an in-memory table of identities, keyed by team id,
/// used wherever a live billing store isn't available.
pub struct FakeIdentitySource {
    identities: dashmap::DashMap<Uuid, Identity>,
}

impl FakeIdentitySource {
    pub fn new() -> Self {
        Self {
            identities: dashmap::DashMap::new(),
        }
    }

    pub fn insert(&self, identity: Identity) {
        self.identities.insert(identity.team_id, identity);
    }
}

impl Default for FakeIdentitySource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdentitySource for FakeIdentitySource {
    async fn fetch_identity(&self, team_id: Uuid, _mode: Mode) -> Result<Identity, AppError> {
        self.identities
            .get(&team_id)
            .map(|entry| entry.clone())
            .ok_or_else(|| AppError::NotFound(format!("no identity for team {team_id}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kv::fake::InMemoryKv;
    use shared::models::TeamFlags;
    use std::collections::HashMap;

    fn sample_identity(team_id: Uuid) -> Identity {
        Identity {
            team_id,
            sub_id: None,
            price_credits: 100,
            credits_used: 0,
            adjusted_credits_used: 0,
            concurrency: 5,
            rate_limits: HashMap::new(),
            flags: TeamFlags::default(),
        }
    }

    #[tokio::test]
    async fn caches_identity_after_first_fetch() {
        let team_id = Uuid::new_v4();
        let fake = Arc::new(FakeIdentitySource::new());
        fake.insert(sample_identity(team_id));
        let kv: Arc<dyn KvStore> = Arc::new(InMemoryKv::new());
        let source = CachingIdentitySource::new(fake.clone(), kv.clone(), Duration::from_secs(30));

        let first = source.fetch(team_id, Mode::Scrape).await.unwrap();
        assert_eq!(first.concurrency, 5);

        // Remove from the backing source; cached copy must still resolve.
        fake.identities.remove(&team_id);
        let second = source.fetch(team_id, Mode::Scrape).await.unwrap();
        assert_eq!(second.concurrency, 5);
    }
}
