use axum::http::HeaderValue;
use axum::routing::{get, post};
use axum::Router;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers::{account, admin, crawl, extract, health, map, scrape, search, websocket};
use crate::middleware::{logging, require_team};
use crate::state::AppState;

/// Builds the full router: a public `/health` and `/admin/metrics`, and the
/// `/v2` surface behind bearer-token auth, layered with `ServiceBuilder`
/// CORS + logging over a nested router.
pub fn build(state: AppState) -> Router {
    let origins: Vec<HeaderValue> = state
        .config
        .server
        .cors_origins
        .iter()
        .filter_map(|o| o.parse().ok())
        .collect();
    let cors = if origins.is_empty() {
        CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
    } else {
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    };

    let v2 = Router::new()
        .route("/scrape", post(scrape::scrape))
        .route("/batch/scrape", post(scrape::batch_scrape))
        .route("/crawl", post(crawl::submit))
        .route("/crawl/{id}", get(crawl::status).delete(crawl::cancel))
        .route("/crawl/{id}/errors", get(crawl::errors))
        .route("/crawl/{id}/ws", get(websocket::crawl_status))
        .route("/map", post(map::map))
        .route("/search", post(search::search))
        .route("/extract", post(extract::submit))
        .route("/extract/{id}", get(extract::get))
        .route("/team/credit-usage", get(account::credit_usage))
        .route("/concurrency-check", get(account::concurrency_check))
        .route_layer(axum::middleware::from_fn_with_state(state.clone(), require_team));

    Router::new()
        .route("/health", get(health::health))
        .route("/admin/metrics", get(admin::metrics))
        .nest("/v2", v2)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(axum::middleware::from_fn(logging))
                .layer(cors),
        )
        .with_state(state)
}
