use dashmap::DashMap;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;
use uuid::Uuid;

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Per-(team, mode) GCRA rate limiter registry. A limiter is
/// created lazily the first time a key is seen and reused for the life of
/// the process; the limit itself is read from `Identity::rate_limits`
/// rather than a single process-wide config value, so two teams with
/// different plans get independently sized buckets.
#[derive(Default)]
pub struct RateLimiterRegistry {
    limiters: DashMap<(Uuid, &'static str), Arc<DirectLimiter>>,
}

impl RateLimiterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the request is admitted under the bucket for
    /// `(team_id, mode)`, creating the bucket on first use.
    pub fn check(&self, team_id: Uuid, mode: &'static str, limit_per_minute: u32) -> bool {
        let limiter = self
            .limiters
            .entry((team_id, mode))
            .or_insert_with(|| Arc::new(Self::build(limit_per_minute)))
            .clone();
        limiter.check().is_ok()
    }

    fn build(limit_per_minute: u32) -> DirectLimiter {
        let per_minute = NonZeroU32::new(limit_per_minute.max(1)).unwrap_or(NonZeroU32::MIN);
        RateLimiter::direct(Quota::per_minute(per_minute))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admits_up_to_the_configured_burst_then_rejects() {
        let registry = RateLimiterRegistry::new();
        let team = Uuid::new_v4();
        assert!(registry.check(team, "scrape", 1));
        assert!(!registry.check(team, "scrape", 1));
    }

    #[test]
    fn teams_and_modes_are_tracked_independently() {
        let registry = RateLimiterRegistry::new();
        let team_a = Uuid::new_v4();
        let team_b = Uuid::new_v4();
        assert!(registry.check(team_a, "scrape", 1));
        assert!(!registry.check(team_a, "scrape", 1));
        // A different team, and a different mode for the same team, are
        // unaffected by team_a's exhausted bucket.
        assert!(registry.check(team_b, "scrape", 1));
        assert!(registry.check(team_a, "crawl", 1));
    }
}
