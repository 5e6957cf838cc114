use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use axum::{middleware, Json, Router};
use std::any::Any;
use std::error::Error;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use crate::analysis;
use crate::config::Config;
use crate::error::ErrorResponse;
use crate::gate::{analyze, AppState};
use crate::health::health_check;
use crate::limiter::{now_ms, RateLimiter};
use crate::middleware::logging_middleware;

pub type BoxError = Box<dyn Error + Send + Sync>;

pub struct Server {
    app: Router,
    state: AppState,
    bind_addr: SocketAddr,
    cleanup_interval: Duration,
}

impl Server {
    pub fn new(config: Config) -> Result<Self, BoxError> {
        let state = build_state(&config)?;
        let app = router(state.clone(), &config);

        Ok(Self {
            app,
            state,
            bind_addr: config.bind_addr,
            cleanup_interval: config.cleanup_interval(),
        })
    }

    pub async fn run(self) -> Result<(), BoxError> {
        let listener = tokio::net::TcpListener::bind(self.bind_addr).await?;

        tracing::info!("promptgate listening on {}", self.bind_addr);
        tracing::info!(
            backend = %self.state.limiter.primary_backend(),
            demo_mode = self.state.analyzer.is_demo(),
            "Analyze endpoint available at /api/analyze"
        );

        let ledger = self.state.limiter.memory().clone();
        let cleanup_interval = self.cleanup_interval;
        let cleanup = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(cleanup_interval);
            loop {
                ticker.tick().await;
                let pruned = ledger.prune(now_ms());
                if pruned > 0 {
                    tracing::debug!(pruned, "Pruned expired in-memory rate limit records");
                }
            }
        });

        // Run server with graceful shutdown
        axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        cleanup.abort();
        Ok(())
    }
}

/// Wire the limiter and analyzer for this deployment.
pub fn build_state(config: &Config) -> Result<AppState, BoxError> {
    let limiter = RateLimiter::from_config(config)?;
    let analyzer = analysis::from_config(config)?;

    Ok(AppState::new(
        limiter,
        Arc::from(analyzer),
        config.max_body_bytes,
    ))
}

pub fn create_app(config: &Config) -> Result<Router, BoxError> {
    let state = build_state(config)?;
    Ok(router(state, config))
}

pub fn router(state: AppState, config: &Config) -> Router {
    Router::new()
        .route("/api/analyze", any(analyze))
        .route("/health", get(health_check))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(CatchPanicLayer::custom(handle_panic))
                .layer(TraceLayer::new_for_http())
                .layer(middleware::from_fn(logging_middleware)),
        )
        // CORS wraps the panic catcher.
        .layer(cors_layer(&config.origins()))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static("POST, OPTIONS"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static("Content-Type"),
        ))
}

/// Reflect only allow-listed origins.
fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE])
}

fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let message = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "Unknown panic message".to_string()
    };

    tracing::error!(message = %message, "Request handler panicked");

    let body = ErrorResponse {
        error: "Server error".to_string(),
        details: None,
        message: Some(message),
    };
    (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        },
    }
}
