use admission::Mode;
use axum::extract::State;
use axum::{Extension, Json};
use search::{SearchCategory, SearchRequest, SearchResponse};
use serde::Deserialize;
use shared::models::ScrapeOptions;
use shared::AppError;
use uuid::Uuid;

use crate::middleware::AuthenticatedTeam;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SearchBody {
    pub query: String,
    #[serde(default)]
    pub categories: Vec<SearchCategory>,
    pub limit: Option<u32>,
    #[serde(default)]
    pub rephrase_prompt: bool,
    #[serde(default)]
    pub bypass_queue: bool,
    #[serde(default)]
    pub scrape_options: ScrapeOptions,
}

/// `POST /v2/search`: admits under `Mode::Search`, then hands off to
/// `SearchOrchestrator::search`, which owns the provider query plus the
/// per-result scrape fan-out.
pub async fn search(
    State(state): State<AppState>,
    Extension(team): Extension<AuthenticatedTeam>,
    Json(body): Json<SearchBody>,
) -> Result<Json<SearchResponse>, AppError> {
    let placeholder_job_id = Uuid::new_v4();
    let ticket = state.admission.admit(team.team_id, Mode::Search, placeholder_job_id, Some(1)).await?;
    let ceiling = state.admission.ceiling(team.team_id, Mode::Search).await?;

    let request = SearchRequest {
        team_id: team.team_id,
        query: body.query,
        categories: body.categories,
        limit: body.limit,
        rephrase_prompt: body.rephrase_prompt,
        bypass_queue: body.bypass_queue,
        scrape_options: body.scrape_options,
    };

    let result = state.search.search(request, ceiling).await;
    state.admission.release(&ticket).await?;

    Ok(Json(result?))
}
