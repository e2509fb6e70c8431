use admission::Mode;
use axum::extract::{Query, State};
use axum::Extension;
use axum::Json;
use serde::{Deserialize, Serialize};
use shared::AppError;

use crate::middleware::AuthenticatedTeam;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct CreditUsageResponse {
    pub price_credits: i64,
    pub credits_used: i64,
    pub adjusted_credits_used: i64,
    pub remaining_credits: i64,
}

#[derive(Debug, Deserialize)]
pub struct ModeQuery {
    #[serde(default = "default_mode")]
    pub mode: Mode,
}

fn default_mode() -> Mode {
    Mode::Scrape
}

/// `GET /v2/team/credit-usage`: reads the raw identity chunk directly
/// through `CachingIdentitySource`, since `AdmissionController` only
/// exposes derived concurrency/ceiling getters, not the credit fields
/// themselves.
pub async fn credit_usage(
    State(state): State<AppState>,
    Extension(team): Extension<AuthenticatedTeam>,
    Query(query): Query<ModeQuery>,
) -> Result<Json<CreditUsageResponse>, AppError> {
    let identity = state.identity.fetch(team.team_id, query.mode).await?;
    Ok(Json(CreditUsageResponse {
        price_credits: identity.price_credits,
        credits_used: identity.credits_used,
        adjusted_credits_used: identity.adjusted_credits_used,
        remaining_credits: identity.remaining_credits(),
    }))
}

#[derive(Debug, Serialize)]
pub struct ConcurrencyCheckResponse {
    pub concurrency: u64,
    pub ceiling: u32,
}

/// `GET /v2/concurrency-check`: lets a client see whether its next request
/// would be deferred before it spends one.
pub async fn concurrency_check(
    State(state): State<AppState>,
    Extension(team): Extension<AuthenticatedTeam>,
    Query(query): Query<ModeQuery>,
) -> Result<Json<ConcurrencyCheckResponse>, AppError> {
    let concurrency = state.admission.concurrency(team.team_id).await?;
    let ceiling = state.admission.ceiling(team.team_id, query.mode).await?;
    Ok(Json(ConcurrencyCheckResponse { concurrency, ceiling }))
}
