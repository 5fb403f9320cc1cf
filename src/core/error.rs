//! # Error Handling Module
//!
//! Defines the gateway-wide error taxonomy and its mapping onto HTTP status codes.
//! Every pipeline failure mode is a distinct variant so that downstream consumers
//! (HTTP responses, analytics error signatures) can tell them apart; a generic
//! "something failed" outcome never leaves this crate.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::store::StoreError;

/// Main result type used throughout the gateway.
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Comprehensive error types for the gateway request pipeline.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The requested service is not present in the configuration.
    #[error("Unknown service: {service}")]
    UnknownService { service: String },

    /// Rate limiting rejection when the fixed-window counter exceeds the limit.
    /// Deterministic and non-retryable within the current window.
    #[error("Rate limit exceeded for service {service}: {limit} requests per window")]
    RateLimitExceeded { service: String, limit: u32 },

    /// The uptime oracle's quorum check failed for the upstream service.
    #[error("Service unavailable: {service} ({up_percent:.2}% of probes succeeded)")]
    ServiceUnavailable { service: String, up_percent: f64 },

    /// The upstream returned an error response, surfaced verbatim and never
    /// retried by the pipeline.
    #[error("Upstream error ({status}): {message}")]
    Upstream { status: u16, message: String },

    /// Key-value store failure. Callers degrade rather than surface this for
    /// cache reads/writes; it only reaches a response on store-only endpoints.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Configuration loading or validation failure.
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Catch-all for internal invariant violations.
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl GatewayError {
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// HTTP status code associated with this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::UnknownService { .. } => StatusCode::NOT_FOUND,
            Self::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::Upstream { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            Self::Store(_) | Self::Configuration { .. } | Self::Internal { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Status code recorded into the analytics error-signature counters.
    pub fn signature_status(&self) -> u16 {
        self.status_code().as_u16()
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({
            "error": {
                "code": status.as_u16(),
                "message": self.to_string(),
            }
        }));
        (status, body).into_response()
    }
}
