use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use shared::AppError;
use uuid::Uuid;

use crate::state::AppState;

/// Claims carried by a team's bearer token. `sub` is the team id; this
/// substrate has no notion of per-user identity, only per-team credentials,
/// so there is no role/user claim to carry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub exp: usize,
}

/// Attached to request extensions once a bearer token verifies; handlers
/// pull this out with `Extension<AuthenticatedTeam>` instead of re-parsing
/// the header themselves.
#[derive(Debug, Clone, Copy)]
pub struct AuthenticatedTeam {
    pub team_id: Uuid,
}

/// Verifies the `Authorization: Bearer <jwt>` header against the
/// deployment's signing secret and inserts `AuthenticatedTeam` into the
/// request's extensions, ahead of every `/v2` route.
pub async fn require_team(State(state): State<AppState>, mut req: Request, next: Next) -> Result<Response, AppError> {
    let header = req
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Forbidden("missing Authorization header".to_string()))?;

    let token = header
        .strip_prefix("Bearer ")
        .ok_or_else(|| AppError::Forbidden("expected a Bearer token".to_string()))?;

    let claims = verify_token(token, &state.jwt_secret)?;
    req.extensions_mut().insert(AuthenticatedTeam { team_id: claims.sub });

    Ok(next.run(req).await)
}

/// Pure token-verification step factored out of `require_team` so it can be
/// exercised without building a full `Request`/`Next` pair.
fn verify_token(token: &str, secret: &str) -> Result<Claims, AppError> {
    decode::<Claims>(token, &DecodingKey::from_secret(secret.as_bytes()), &Validation::new(Algorithm::HS256))
        .map(|data| data.claims)
        .map_err(|e| AppError::Forbidden(format!("invalid token: {e}")))
}

/// Logs method, path, status, and latency for every request.
pub async fn logging(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let start = std::time::Instant::now();

    let response = next.run(req).await;

    tracing::info!(
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "request handled"
    );

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn token_for(team_id: Uuid, secret: &str, exp: usize) -> String {
        let claims = Claims { sub: team_id, exp };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap()
    }

    #[test]
    fn verifies_a_correctly_signed_token() {
        let team_id = Uuid::new_v4();
        let token = token_for(team_id, "secret", 9_999_999_999);
        let claims = verify_token(&token, "secret").unwrap();
        assert_eq!(claims.sub, team_id);
    }

    #[test]
    fn rejects_a_token_signed_with_a_different_secret() {
        let token = token_for(Uuid::new_v4(), "secret", 9_999_999_999);
        assert!(verify_token(&token, "wrong-secret").is_err());
    }

    #[test]
    fn rejects_an_expired_token() {
        let token = token_for(Uuid::new_v4(), "secret", 1);
        assert!(verify_token(&token, "secret").is_err());
    }
}
