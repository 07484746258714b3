//! Error taxonomy of the gateway.
//!
//! Only the kinds that reach the HTTP surface live here. Cache failures and
//! hit-metadata decode failures are recovered where they occur and never
//! surface; an open index breaker is converted into a degraded response by
//! the orchestrator.

use crate::backend::BackendError;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

/// A request-terminating failure, mapped onto an HTTP status by the surface.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Malformed or out-of-range input. 400.
    #[error("invalid {field}: {message}")]
    Validation { field: String, message: String },

    /// Admission rejection. 429.
    #[error("rate limit exceeded")]
    RateLimited,

    /// A backend stayed unreachable after retries. 503.
    #[error("backend unavailable after retries: {0}")]
    BackendUnavailable(#[source] BackendError),

    /// Embedding breaker open: failing fast without an RPC attempt. 503.
    #[error("embedding backend circuit open")]
    EmbeddingCircuitOpen,

    /// Uncaught failure. 503.
    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        GatewayError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Classifies an embedding-path backend failure.
    pub fn from_embedding_error(err: BackendError) -> Self {
        match err {
            BackendError::CircuitOpen => GatewayError::EmbeddingCircuitOpen,
            other => GatewayError::BackendUnavailable(other),
        }
    }

    /// HTTP status code this error maps to.
    pub fn status(&self) -> http::StatusCode {
        match self {
            GatewayError::Validation { .. } => http::StatusCode::BAD_REQUEST,
            GatewayError::RateLimited => http::StatusCode::TOO_MANY_REQUESTS,
            GatewayError::BackendUnavailable(_)
            | GatewayError::EmbeddingCircuitOpen
            | GatewayError::Internal(_) => http::StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Short machine-readable kind, used as the problem `title`.
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::Validation { .. } => "validation-error",
            GatewayError::RateLimited => "rate-limited",
            GatewayError::BackendUnavailable(_) => "backend-unavailable",
            GatewayError::EmbeddingCircuitOpen => "circuit-open",
            GatewayError::Internal(_) => "internal-error",
        }
    }
}

/// RFC 7807 problem response carrying the request's correlation id.
pub fn problem_response(err: &GatewayError, correlation_id: &str) -> Response {
    let status = err.status();
    let body = serde_json::json!({
        "type": "about:blank",
        "title": err.kind(),
        "status": status.as_u16(),
        "detail": err.to_string(),
        "correlationId": correlation_id,
    });
    let mut response = (status, Json(body)).into_response();
    response.headers_mut().insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("application/problem+json"),
    );
    response
}
