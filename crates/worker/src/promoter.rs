use admission::Mode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use uuid::Uuid;

use crate::context::WorkerContext;

/// Drains each team's `concurrency-limit-queue` back onto NuQ once spare
/// concurrency frees up. Deferred payloads carry no mode of
/// their own, so this loop checks readiness under `Mode::Scrape` — the
/// identity mode that complements itself, making the ceiling check exactly
/// the team's own concurrency limit regardless of which mode originally
/// deferred the job.
pub async fn run(ctx: Arc<WorkerContext>, poll_interval: Duration) {
    let mut ticker = tokio::time::interval(poll_interval);
    loop {
        ticker.tick().await;
        match ctx.admission.deferred_teams().await {
            Ok(teams) => {
                for team_id in teams {
                    if let Err(e) = promote_team(&ctx, team_id).await {
                        error!(%team_id, error = %e, "promotion failed");
                    }
                }
            }
            Err(e) => error!(error = %e, "failed to list deferred teams"),
        }
    }
}

async fn promote_team(ctx: &Arc<WorkerContext>, team_id: Uuid) -> Result<(), shared::AppError> {
    while let Some((job_id, data)) = ctx.admission.take_ready(team_id, Mode::Scrape).await? {
        ctx.queue.add(job_id, data).await?;
        info!(%team_id, %job_id, "promoted deferred job onto the queue");
    }
    Ok(())
}
