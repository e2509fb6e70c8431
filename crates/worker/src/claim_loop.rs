use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::context::WorkerContext;
use crate::job;

/// One claim-loop task: repeatedly claims the oldest queued job, runs it to
/// completion while renewing its lease in the background, and polls again.
/// `worker_nonce` is generated once per task and used to fence every
/// claim/renew/finish/fail call this task makes, so a lease the reaper
/// reclaims out from under a stuck task can't be finished twice.
pub async fn run(ctx: Arc<WorkerContext>, poll_interval: Duration) {
    let worker_nonce = Uuid::new_v4().to_string();
    debug!(worker_nonce = %worker_nonce, "claim loop started");

    loop {
        match ctx.queue.claim(&worker_nonce).await {
            Ok(Some(job)) => {
                let job_id = job.id;
                let renew_every = ctx.queue_config.renew_interval();
                let mut ticker = tokio::time::interval(renew_every);
                ticker.tick().await; // the first tick fires immediately; skip it

                let process = job::process_job(&ctx, &job, &worker_nonce);
                tokio::pin!(process);

                loop {
                    tokio::select! {
                        result = &mut process => {
                            if let Err(e) = result {
                                error!(%job_id, error = %e, "job processing failed");
                            }
                            break;
                        }
                        _ = ticker.tick() => {
                            if let Err(e) = ctx.queue.renew_lock(job_id, &worker_nonce).await {
                                warn!(%job_id, error = %e, "failed to renew job lease");
                            }
                        }
                    }
                }
            }
            Ok(None) => {
                tokio::time::sleep(poll_interval).await;
            }
            Err(e) => {
                error!(error = %e, "claim failed, backing off");
                tokio::time::sleep(poll_interval).await;
            }
        }
    }
}
