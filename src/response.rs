use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::Value;

use crate::analysis::Analysis;
use crate::store::BackendKind;

/// Body of a 429 reply.
#[derive(Debug, Serialize)]
pub struct RateLimitedResponse {
    pub error: String,
    pub message: String,
    #[serde(rename = "retryAfter")]
    pub retry_after: String,
}

impl RateLimitedResponse {
    pub fn new(reason: &str) -> Self {
        Self {
            error: "Rate limit exceeded".to_string(),
            message: reason.to_string(),
            retry_after: "1 hour".to_string(),
        }
    }
}

impl IntoResponse for RateLimitedResponse {
    fn into_response(self) -> Response {
        (StatusCode::TOO_MANY_REQUESTS, Json(self)).into_response()
    }
}

/// Analysis result annotated with quota information.
pub fn analysis_response(
    mut analysis: Analysis,
    remaining: u64,
    demo: bool,
    backend: BackendKind,
) -> Response {
    analysis.insert("_remaining".to_string(), Value::from(remaining));
    analysis.insert("isDemoMode".to_string(), Value::from(demo));
    analysis.insert(
        "_rateLimitBackend".to_string(),
        Value::from(backend.as_str()),
    );
    (StatusCode::OK, Json(Value::Object(analysis))).into_response()
}

pub fn method_not_allowed() -> Response {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        Json(serde_json::json!({ "error": "Method not allowed" })),
    )
        .into_response()
}
