use std::sync::Arc;
use tracing::{error, info};

use crate::context::WorkerContext;

/// Periodically resets `active` jobs whose lease has expired back to
/// `queued`, so a worker that dies mid-job doesn't strand it
/// forever.
pub async fn run(ctx: Arc<WorkerContext>) {
    let lease = ctx.queue_config.lease();
    let interval = std::time::Duration::from_secs(ctx.queue_config.reap_interval_seconds);
    let mut ticker = tokio::time::interval(interval);

    loop {
        ticker.tick().await;
        match ctx.queue.reclaim_expired(lease).await {
            Ok(0) => {}
            Ok(n) => info!(reclaimed = n, "reaper reset expired leases"),
            Err(e) => error!(error = %e, "reaper sweep failed"),
        }
    }
}
