use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use std::time::Duration;
use uuid::Uuid;

use crate::state::AppState;

/// `WS /v2/crawl/:id`: pushes `CrawlStatusView` snapshots to the client
/// until the crawl reaches a terminal status, instead of making it poll
/// `GET /v2/crawl/:id` in a loop.
pub async fn crawl_status(State(state): State<AppState>, Path(id): Path<Uuid>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| stream_status(socket, state, id))
}

async fn stream_status(mut socket: WebSocket, state: AppState, crawl_id: Uuid) {
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    loop {
        ticker.tick().await;

        let view = match state.crawl.status(crawl_id, 0, 100).await {
            Ok(view) => view,
            Err(e) => {
                let _ = socket
                    .send(Message::Text(serde_json::json!({"success": false, "error": e.to_string()}).to_string().into()))
                    .await;
                break;
            }
        };

        let terminal = matches!(view.status.as_str(), "completed" | "failed" | "cancelled");
        let payload = serde_json::to_string(&view).unwrap_or_default();
        if socket.send(Message::Text(payload.into())).await.is_err() {
            break;
        }
        if terminal {
            break;
        }
    }
}
