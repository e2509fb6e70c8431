use admission::Mode;
use axum::extract::{Path, State};
use axum::{Extension, Json};
use extract::{ExtractRequest, StoredExtract};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use shared::AppError;
use uuid::Uuid;

use crate::middleware::AuthenticatedTeam;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ExtractBody {
    pub urls: Vec<String>,
    pub prompt: Option<String>,
    pub schema: Option<Value>,
    #[serde(default)]
    pub allow_external_links: bool,
    pub request_timeout_ms: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct ExtractSubmitResponse {
    pub success: bool,
    pub id: Uuid,
}

/// `POST /v2/extract`: admits under `Mode::Extract` for the synchronous
/// submission step, then lets the orchestrator's background task run the
/// multi-stage pipeline to completion. Clients poll `GET
/// /v2/extract/:id` the same way they poll a crawl's status. `team_id` is
/// never read from the request body; it comes from the bearer token.
pub async fn submit(
    State(state): State<AppState>,
    Extension(team): Extension<AuthenticatedTeam>,
    Json(body): Json<ExtractBody>,
) -> Result<Json<ExtractSubmitResponse>, AppError> {
    let request = ExtractRequest {
        team_id: team.team_id,
        urls: body.urls,
        prompt: body.prompt,
        schema: body.schema,
        allow_external_links: body.allow_external_links,
        request_timeout_ms: body.request_timeout_ms,
    };

    let placeholder_job_id = Uuid::new_v4();
    let ticket = state.admission.admit(team.team_id, Mode::Extract, placeholder_job_id, Some(1)).await?;
    let result = state.extract.submit(request).await;
    state.admission.release(&ticket).await?;
    let id = result?;

    Ok(Json(ExtractSubmitResponse { success: true, id }))
}

pub async fn get(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<StoredExtract>, AppError> {
    let stored = state
        .extract
        .get(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("extract job {id} not found")))?;
    Ok(Json(stored))
}
