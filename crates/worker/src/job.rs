use engine::{scrape_url, ScrapeOutcome};
use serde_json::{json, Value};
use shared::models::{InternalOptions, Job, JobPayload};
use shared::traits::BillableScrape;
use shared::{AppError, TransportableError};
use tracing::{error, info};

use crate::context::WorkerContext;

/// Processes one dequeued job to a terminal state. Called from the claim
/// loop with the worker's own lock nonce; `queue.finish`/`queue.fail` fence
/// on that nonce the same way `renew_lock` does, so a job reclaimed by the
/// reaper mid-flight can't be double-finished by this stale task.
pub async fn process_job(ctx: &WorkerContext, job: &Job, nonce: &str) -> Result<(), AppError> {
    let payload: JobPayload = serde_json::from_value(job.data.clone())?;
    match payload {
        JobPayload::Scrape {
            url,
            team_id,
            scrape_options,
            crawl_id,
            current_discovery_depth,
        } => {
            if let Some(crawl_id) = crawl_id {
                if let Some(stored) = ctx.crawl.load(crawl_id).await? {
                    if stored.cancelled {
                        ctx.queue.finish(job.id, nonce, Value::Null).await?;
                        ctx.admission.release_job(team_id, job.id).await?;
                        return Ok(());
                    }
                }
            }

            let internal_options = InternalOptions {
                zero_data_retention: false,
                team_id: Some(team_id),
            };

            let outcome = scrape_url(
                &ctx.engines,
                &ctx.engine_config,
                &url,
                &scrape_options,
                &internal_options,
                &ctx.transformers,
            )
            .await;

            match outcome {
                ScrapeOutcome::Success { document, .. } => {
                    let billable = BillableScrape {
                        formats: scrape_options.formats.clone(),
                        num_pages: document.metadata.num_pages,
                        used_stealth_proxy: scrape_options.stealth_proxy,
                        zero_data_retention: internal_options.zero_data_retention,
                        used_agent: false,
                    };
                    let credits = ctx.billing.calculate_credits_to_be_billed(&billable);
                    ctx.billing.charge(team_id, credits).await?;
                    ctx.job_log
                        .record(team_id, "scrape_completed", json!({"url": url, "credits": credits}))
                        .await;

                    let return_value = serde_json::to_value(&document)?;
                    ctx.queue.finish(job.id, nonce, return_value).await?;

                    if let Some(crawl_id) = crawl_id {
                        ctx.crawl
                            .record_completion(crawl_id, job.id, current_discovery_depth, Some(&document))
                            .await?;
                    }
                    ctx.admission.release_job(team_id, job.id).await?;
                    info!(job_id = %job.id, %url, "scrape finished");
                }
                ScrapeOutcome::Failure { reason, .. } => {
                    let transportable = TransportableError::new("NO_ENGINES_LEFT", reason);
                    ctx.queue.fail(job.id, nonce, transportable.to_json()).await?;

                    if let Some(crawl_id) = crawl_id {
                        // the crawl itself only fails on a kickoff failure
                        //; a failed child still counts toward
                        // completion so the frontier doesn't hang forever.
                        ctx.crawl.record_completion(crawl_id, job.id, current_discovery_depth, None).await?;
                    }
                    ctx.admission.release_job(team_id, job.id).await?;
                    ctx.job_log.record(team_id, "scrape_failed", json!({"url": url})).await;
                }
            }
        }
        JobPayload::CrawlKickoff { crawl_id } => match ctx.crawl.process_kickoff(crawl_id).await {
            Ok(()) => {
                ctx.queue.finish(job.id, nonce, Value::Null).await?;
            }
            Err(e) => {
                error!(%crawl_id, error = %e, "crawl kickoff failed");
                ctx.crawl.fail_kickoff(crawl_id, &e.to_string()).await?;
                ctx.queue.fail(job.id, nonce, TransportableError::from(&e).to_json()).await?;
            }
        },
    }

    Ok(())
}
