use admission::Mode;
use axum::extract::State;
use axum::{Extension, Json};
use extract::UrlExpander;
use serde::{Deserialize, Serialize};
use shared::AppError;
use uuid::Uuid;

use crate::middleware::AuthenticatedTeam;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct MapRequest {
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct MapResponse {
    pub success: bool,
    pub links: Vec<String>,
}

/// `POST /v2/map`: the lightest of the four client-facing abstraction
/// levels — no scrape, just a sitemap-derived URL listing via the
/// same `UrlExpander` seam `extract::resolve_urls` uses for `/*` patterns.
pub async fn map(
    State(state): State<AppState>,
    Extension(team): Extension<AuthenticatedTeam>,
    Json(request): Json<MapRequest>,
) -> Result<Json<MapResponse>, AppError> {
    let placeholder_job_id = Uuid::new_v4();
    let ticket = state.admission.admit(team.team_id, Mode::Map, placeholder_job_id, Some(1)).await?;

    let prefix = request.url.trim_end_matches('/').to_string();
    let pattern = format!("{prefix}/*");
    let links = state.url_expander.expand(&pattern).await;

    state.admission.release(&ticket).await?;
    let links = links?;

    Ok(Json(MapResponse { success: true, links }))
}
