use admission::Mode;
use axum::extract::State;
use axum::{Extension, Json};
use engine::{scrape_url, ScrapeOutcome};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use shared::models::{Document, InternalOptions, ScrapeOptions};
use shared::traits::BillableScrape;
use shared::AppError;
use std::sync::Arc;
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::middleware::AuthenticatedTeam;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ScrapeRequest {
    pub url: String,
    #[serde(flatten)]
    pub options: ScrapeOptions,
    #[serde(default)]
    pub zero_data_retention: bool,
}

#[derive(Debug, Serialize)]
pub struct ScrapeResponse {
    pub success: bool,
    pub data: Document,
}

/// `POST /v2/scrape`: admits the team, runs the engine fallback pipeline
/// synchronously, and bills on success.
pub async fn scrape(
    State(state): State<AppState>,
    Extension(team): Extension<AuthenticatedTeam>,
    Json(request): Json<ScrapeRequest>,
) -> Result<Json<ScrapeResponse>, AppError> {
    let document = scrape_one(&state, team.team_id, &request.url, &request.options, request.zero_data_retention).await?;
    Ok(Json(ScrapeResponse { success: true, data: document }))
}

#[derive(Debug, Deserialize)]
pub struct BatchScrapeRequest {
    pub urls: Vec<String>,
    #[serde(flatten)]
    pub options: ScrapeOptions,
    #[serde(default)]
    pub zero_data_retention: bool,
}

/// `POST /v2/batch/scrape`: fans out `scrape_one` over every URL, bounded so
/// one request can't flood the engine pool, mirroring `search::orchestrator`'s
/// bounded-concurrency fan-out shape.
pub async fn batch_scrape(
    State(state): State<AppState>,
    Extension(team): Extension<AuthenticatedTeam>,
    Json(request): Json<BatchScrapeRequest>,
) -> Result<Json<Value>, AppError> {
    const MAX_CONCURRENT: usize = 10;
    let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENT));

    let tasks: Vec<_> = request
        .urls
        .iter()
        .cloned()
        .map(|url| {
            let state = state.clone();
            let semaphore = semaphore.clone();
            let options = request.options.clone();
            let team_id = team.team_id;
            let zero_data_retention = request.zero_data_retention;
            tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore not closed");
                scrape_one(&state, team_id, &url, &options, zero_data_retention).await
            })
        })
        .collect();

    let mut results = Vec::with_capacity(tasks.len());
    for task in tasks {
        results.push(task.await.map_err(|e| AppError::Internal(format!("scrape task panicked: {e}")))?);
    }

    let data: Vec<Value> = results
        .into_iter()
        .map(|r| match r {
            Ok(document) => json!({"success": true, "data": document}),
            Err(e) => json!({"success": false, "error": e.error_code(), "message": e.to_string()}),
        })
        .collect();

    Ok(Json(json!({"success": true, "data": data})))
}

/// Shared by `scrape`/`batch_scrape`: admit, run the fallback pipeline,
/// release the ticket, bill, and hand back the document.
pub async fn scrape_one(
    state: &AppState,
    team_id: Uuid,
    url: &str,
    options: &ScrapeOptions,
    zero_data_retention: bool,
) -> Result<Document, AppError> {
    let job_id = Uuid::new_v4();
    let ticket = state.admission.admit(team_id, Mode::Scrape, job_id, Some(1)).await?;

    let internal_options = InternalOptions {
        zero_data_retention,
        team_id: Some(team_id),
    };

    let outcome = scrape_url(&state.engines, &state.engine_config, url, options, &internal_options, &state.transformers).await;
    state.admission.release(&ticket).await?;

    match outcome {
        ScrapeOutcome::Success { document, .. } => {
            let billable = BillableScrape {
                formats: options.formats.clone(),
                num_pages: document.metadata.num_pages,
                used_stealth_proxy: options.stealth_proxy,
                zero_data_retention,
                used_agent: false,
            };
            let credits = state.billing.calculate_credits_to_be_billed(&billable);
            state.billing.charge(team_id, credits).await?;
            Ok(document)
        }
        ScrapeOutcome::Failure { reason, logs } => {
            // All engines timing out (rather than running and being
            // rejected) is a request-level timeout, not an exhausted
            // fallback list: surface it as `SCRAPE_TIMEOUT`/408 per spec
            // §8 scenario 2, not `NO_ENGINES_LEFT`/500.
            let all_timed_out = !logs.is_empty() && logs.iter().all(|l| l.timed_out);
            if all_timed_out {
                let timeout_ms = options.timeout_ms.unwrap_or(state.engine_config.default_timeout_ms);
                Err(AppError::ScrapeTimeout(timeout_ms))
            } else {
                Err(AppError::NoEnginesLeft(reason))
            }
        }
    }
}
