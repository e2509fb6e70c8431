use admission::Mode;
use axum::extract::{Path, Query, State};
use axum::{Extension, Json};
use crawl::{CrawlErrorsView, CrawlStatusView, CrawlSubmission};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use shared::models::{CrawlerOptions, InternalOptions, ScrapeOptions};
use shared::AppError;
use uuid::Uuid;

use crate::middleware::AuthenticatedTeam;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CrawlRequest {
    pub url: String,
    #[serde(flatten)]
    pub crawler_options: CrawlerOptions,
    #[serde(default)]
    pub scrape_options: ScrapeOptions,
    #[serde(default)]
    pub zero_data_retention: bool,
}

#[derive(Debug, Serialize)]
pub struct CrawlSubmitResponse {
    pub success: bool,
    pub id: Uuid,
}

/// `POST /v2/crawl`: admits the team under `Mode::Crawl`, submits to the
/// orchestrator, then releases — the ticket only covers the synchronous
/// admission/submission step, not the crawl's full multi-job lifetime (see
/// the admission-gating-scope note in DESIGN.md).
pub async fn submit(
    State(state): State<AppState>,
    Extension(team): Extension<AuthenticatedTeam>,
    Json(request): Json<CrawlRequest>,
) -> Result<Json<CrawlSubmitResponse>, AppError> {
    let placeholder_job_id = Uuid::new_v4();
    let ticket = state.admission.admit(team.team_id, Mode::Crawl, placeholder_job_id, Some(1)).await?;

    let submission = CrawlSubmission {
        origin_url: request.url,
        crawler_options: request.crawler_options,
        scrape_options: request.scrape_options,
        internal_options: InternalOptions {
            zero_data_retention: request.zero_data_retention,
            team_id: Some(team.team_id),
        },
        team_id: team.team_id,
    };

    let result = state.crawl.submit(submission).await;
    state.admission.release(&ticket).await?;
    let id = result?;

    Ok(Json(CrawlSubmitResponse { success: true, id }))
}

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    #[serde(default)]
    pub offset: i64,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    100
}

pub async fn status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<StatusQuery>,
) -> Result<Json<CrawlStatusView>, AppError> {
    let view = state.crawl.status(id, query.offset, query.limit).await?;
    Ok(Json(view))
}

pub async fn errors(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<CrawlErrorsView>, AppError> {
    let view = state.crawl.errors(id).await?;
    Ok(Json(view))
}

pub async fn cancel(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<Value>, AppError> {
    state.crawl.cancel(id).await?;
    Ok(Json(json!({"success": true})))
}
