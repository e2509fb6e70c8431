use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("kv store error: {0}")]
    Kv(String),

    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("job {0} not found")]
    JobNotFound(Uuid),

    #[error("job {0} has expired")]
    JobExpired(Uuid),

    #[error("rate limited")]
    RateLimited,

    #[error("insufficient credits: needed {needed}, have {available}")]
    InsufficientCredits { needed: i64, available: i64 },

    #[error("cost limit exceeded: {0}")]
    CostLimitExceeded(String),

    #[error("scrape timed out after {0}ms")]
    ScrapeTimeout(u64),

    #[error("url blocked: {0}")]
    UrlBlocked(String),

    #[error("no engines left: {0}")]
    NoEnginesLeft(String),

    #[error("engine error: {0}")]
    EngineError(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal server error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, AppError>;

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Forbidden(_) | AppError::UrlBlocked(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) | AppError::JobNotFound(_) => StatusCode::NOT_FOUND,
            AppError::JobExpired(_) => StatusCode::GONE,
            AppError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            AppError::InsufficientCredits { .. } => StatusCode::PAYMENT_REQUIRED,
            AppError::ScrapeTimeout(_) => StatusCode::REQUEST_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::Database(_) => "DATABASE_ERROR",
            AppError::Kv(_) => "KV_ERROR",
            AppError::Http(_) => "HTTP_ERROR",
            AppError::Json(_) => "JSON_ERROR",
            AppError::Config(_) => "CONFIG_ERROR",
            AppError::BadRequest(_) => "BAD_REQUEST",
            AppError::Forbidden(_) => "FORBIDDEN",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::JobNotFound(_) => "JOB_NOT_FOUND",
            AppError::JobExpired(_) => "JOB_EXPIRED",
            AppError::RateLimited => "RATE_LIMITED",
            AppError::InsufficientCredits { .. } => "INSUFFICIENT_CREDITS",
            AppError::CostLimitExceeded(_) => "COST_LIMIT_EXCEEDED",
            AppError::ScrapeTimeout(_) => "SCRAPE_TIMEOUT",
            AppError::UrlBlocked(_) => "URL_BLOCKED",
            AppError::NoEnginesLeft(_) => "NO_ENGINES_LEFT",
            AppError::EngineError(_) => "ENGINE_ERROR",
            AppError::Io(_) => "IO_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let request_id = Uuid::new_v4();
        if status.is_server_error() {
            tracing::error!(error = %self, %request_id, "request failed");
        } else {
            tracing::warn!(error = %self, %request_id, "request rejected");
        }

        let body = Json(json!({
            "success": false,
            "error": self.error_code(),
            "message": self.to_string(),
            "request_id": request_id,
        }));

        (status, body).into_response()
    }
}

/// The wire shape an error takes once it crosses the queue boundary: written
/// into `queue_scrape.failedreason` by a worker, read back by the crawl
/// orchestrator's errors endpoint and by API handlers translating a failed
/// job into a response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportableError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<Box<TransportableError>>,
}

impl TransportableError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            stack: None,
            cause: None,
        }
    }

    pub fn with_cause(mut self, cause: TransportableError) -> Self {
        // Cap the cause chain at depth 3 so a pathological chain doesn't
        // blow up the size of the serialized failedreason column.
        let mut capped = cause;
        capped.cause = capped.cause.filter(|c| c.cause.is_none()).map(|c| {
            Box::new(TransportableError {
                cause: None,
                ..*c
            })
        });
        self.cause = Some(Box::new(capped));
        self
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            json!({"code": "INTERNAL_ERROR", "message": "failed to serialize error"})
                .to_string()
        })
    }

    pub fn from_json(raw: &str) -> Self {
        serde_json::from_str(raw).unwrap_or_else(|_| TransportableError::new("INTERNAL_ERROR", raw))
    }
}

impl From<&AppError> for TransportableError {
    fn from(err: &AppError) -> Self {
        TransportableError::new(err.error_code(), err.to_string())
    }
}

impl From<AppError> for TransportableError {
    fn from(err: AppError) -> Self {
        TransportableError::from(&err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_json() {
        let err = TransportableError::new("SCRAPE_TIMEOUT", "timed out after 500ms")
            .with_cause(TransportableError::new("ENGINE_ERROR", "playwright crashed"));
        let raw = err.to_json();
        let back = TransportableError::from_json(&raw);
        assert_eq!(back.code, "SCRAPE_TIMEOUT");
        assert_eq!(back.cause.unwrap().code, "ENGINE_ERROR");
    }

    #[test]
    fn caps_cause_chain_depth() {
        let deep = TransportableError::new("A", "a").with_cause(
            TransportableError::new("B", "b").with_cause(
                TransportableError::new("C", "c").with_cause(TransportableError::new("D", "d")),
            ),
        );
        let b = *deep.cause.unwrap();
        let c = *b.cause.unwrap();
        assert!(c.cause.is_none());
    }

    #[test]
    fn maps_status_codes() {
        assert_eq!(AppError::RateLimited.status_code(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            AppError::InsufficientCredits { needed: 5, available: 1 }.status_code(),
            StatusCode::PAYMENT_REQUIRED
        );
        assert_eq!(AppError::JobExpired(Uuid::nil()).status_code(), StatusCode::GONE);
    }
}
