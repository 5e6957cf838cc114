//! Entry point for analyze requests.
//!
//! Quota is checked before anything else touches the request: a denied
//! caller gets a 429 without the body ever being read, and payload problems
//! are only reported after the request has been counted.

use axum::body::to_bytes;
use axum::extract::{Request, State};
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use std::sync::Arc;
use std::time::Instant;

use crate::analysis::Analyzer;
use crate::error::{ProxyError, Result};
use crate::limiter::{Decision, RateLimiter};
use crate::middleware::caller_identity;
use crate::response::{analysis_response, method_not_allowed, RateLimitedResponse};
use crate::store::BackendKind;
use crate::validation::RequestValidator;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub limiter: RateLimiter,
    pub analyzer: Arc<dyn Analyzer>,
    pub max_body_bytes: usize,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(limiter: RateLimiter, analyzer: Arc<dyn Analyzer>, max_body_bytes: usize) -> Self {
        Self {
            limiter,
            analyzer,
            max_body_bytes,
            started_at: Instant::now(),
        }
    }
}

pub async fn analyze(State(state): State<AppState>, request: Request) -> Response {
    match request.method() {
        &Method::OPTIONS => return StatusCode::OK.into_response(),
        &Method::POST => {}
        _ => return method_not_allowed(),
    }

    let identity = caller_identity(request.headers());
    let verdict = state.limiter.check(&identity).await;

    let remaining = match verdict.decision {
        Decision::Allowed { remaining } => remaining,
        Decision::Denied { tier, reason } => {
            tracing::info!(
                identity = %identity,
                tier = ?tier,
                backend = %verdict.backend,
                "Rate limit exceeded"
            );
            return RateLimitedResponse::new(&reason).into_response();
        }
    };

    match forward(&state, request, remaining, verdict.backend).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

async fn forward(
    state: &AppState,
    request: Request,
    remaining: u64,
    backend: BackendKind,
) -> Result<Response> {
    let body = to_bytes(request.into_body(), state.max_body_bytes)
        .await
        .map_err(|_| ProxyError::InvalidPayload("Request body too large".to_string()))?;

    let payload = RequestValidator::parse_analyze_request(&body)?;
    let analysis = state.analyzer.analyze(&payload.image_data).await?;

    Ok(analysis_response(
        analysis,
        remaining,
        state.analyzer.is_demo(),
        backend,
    ))
}
