use axum::extract::State;
use axum::Json;
use serde::Serialize;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::gate::AppState;
use crate::limiter::RateLimits;

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: String,
    pub timestamp: u64,
    pub version: String,
    pub uptime_seconds: u64,
    pub rate_limiter: LimiterStatus,
    pub demo_mode: bool,
}

#[derive(Debug, Serialize)]
pub struct LimiterStatus {
    pub backend: String,
    pub limits: RateLimits,
    /// Callers held by the in-memory ledger, including fallback evaluations.
    pub tracked_callers: usize,
}

pub fn check_health(state: &AppState) -> HealthStatus {
    let backend = state.limiter.primary_backend();

    HealthStatus {
        status: "healthy".to_string(),
        timestamp: SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        rate_limiter: LimiterStatus {
            backend: backend.as_str().to_string(),
            limits: *state.limiter.limits(),
            tracked_callers: state.limiter.memory().tracked_callers(),
        },
        demo_mode: state.analyzer.is_demo(),
    }
}

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthStatus> {
    Json(check_health(&state))
}
