use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// Failures talking to the durable counter store.
///
/// These never reach the caller: the limiter logs them and evaluates the
/// request against the in-memory ledger instead.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("store returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("store reported an error: {0}")]
    Remote(String),

    #[error("malformed store reply: {0}")]
    Malformed(String),

    #[error("store did not answer within {0} ms")]
    Timeout(u64),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read environment: {0}")]
    Env(#[from] envconfig::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Errors produced while handling a proxy request.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("{0}")]
    InvalidPayload(String),

    #[error("{error}")]
    Downstream {
        error: String,
        details: Option<String>,
    },

    #[error("{0}")]
    Internal(String),
}

impl ProxyError {
    pub fn downstream(error: &str) -> Self {
        ProxyError::Downstream {
            error: error.to_string(),
            details: None,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::InvalidPayload(_) => StatusCode::BAD_REQUEST,
            ProxyError::Downstream { .. } | ProxyError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: &str) -> Self {
        Self {
            error: error.to_string(),
            details: None,
            message: None,
        }
    }

    pub fn from_proxy_error(err: &ProxyError) -> Self {
        match err {
            ProxyError::InvalidPayload(msg) => Self::new(msg),
            ProxyError::Downstream { error, details } => Self {
                error: error.clone(),
                details: details.clone(),
                message: None,
            },
            ProxyError::Internal(msg) => Self {
                error: "Server error".to_string(),
                details: None,
                message: Some(msg.clone()),
            },
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        match &self {
            ProxyError::InvalidPayload(_) => tracing::debug!(error = %self, "Rejected payload"),
            _ => tracing::error!(error = %self, "Request failed"),
        }
        (self.status(), Json(ErrorResponse::from_proxy_error(&self))).into_response()
    }
}

pub type Result<T> = std::result::Result<T, ProxyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_payload_maps_to_bad_request() {
        let err = ProxyError::InvalidPayload("Invalid base64 format".into());
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);

        let json = serde_json::to_value(ErrorResponse::from_proxy_error(&err)).unwrap();
        assert_eq!(json, serde_json::json!({ "error": "Invalid base64 format" }));
    }

    #[test]
    fn test_downstream_error_keeps_details() {
        let err = ProxyError::Downstream {
            error: "Gemini API error".into(),
            details: Some("API key not valid".into()),
        };
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let json = serde_json::to_value(ErrorResponse::from_proxy_error(&err)).unwrap();
        assert_eq!(json["error"], "Gemini API error");
        assert_eq!(json["details"], "API key not valid");
    }

    #[test]
    fn test_internal_error_is_generic() {
        let err = ProxyError::Internal("connection reset".into());
        let json = serde_json::to_value(ErrorResponse::from_proxy_error(&err)).unwrap();
        assert_eq!(json["error"], "Server error");
        assert_eq!(json["message"], "connection reset");
        assert!(json.get("details").is_none());
    }
}
