//! Liveness and readiness probes.

use crate::backend::BackendError;
use crate::http::AppState;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use http::StatusCode;
use serde::Serialize;
use std::time::Duration;
use tokio::time::timeout;

/// Deadline for each dependency probe.
const PROBE_DEADLINE: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
enum CheckStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Serialize)]
struct Check {
    status: CheckStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
}

impl Check {
    fn healthy() -> Self {
        Check {
            status: CheckStatus::Healthy,
            detail: None,
        }
    }

    fn unhealthy(detail: impl Into<String>) -> Self {
        Check {
            status: CheckStatus::Unhealthy,
            detail: Some(detail.into()),
        }
    }

    fn degraded(detail: impl Into<String>) -> Self {
        Check {
            status: CheckStatus::Degraded,
            detail: Some(detail.into()),
        }
    }
}

#[derive(Debug, Serialize)]
struct Readiness {
    status: CheckStatus,
    cache: Check,
    index: Check,
}

/// `GET /health/live` — the process is running; no dependency checks.
pub async fn live() -> Response {
    (StatusCode::OK, Json(serde_json::json!({ "status": "alive" }))).into_response()
}

/// `GET /health/ready` — healthy only when every tagged dependency answers
/// within the probe deadline.
pub async fn ready(State(state): State<AppState>) -> Response {
    let cache = match timeout(PROBE_DEADLINE, state.cache.ping()).await {
        Ok(Ok(())) => Check::healthy(),
        Ok(Err(e)) => Check::unhealthy(e.to_string()),
        Err(_) => Check::unhealthy("cache ping timed out"),
    };

    let index = match timeout(PROBE_DEADLINE, state.index.info(None)).await {
        Ok(Ok(_)) => Check::healthy(),
        Ok(Err(BackendError::Rpc {
            code: tonic::Code::Unavailable,
            message,
        })) => Check::unhealthy(message),
        Ok(Err(e)) => Check::degraded(e.to_string()),
        Err(_) => Check::unhealthy("index info probe timed out"),
    };

    let overall = [&cache, &index]
        .iter()
        .map(|c| c.status)
        .max_by_key(|s| match s {
            CheckStatus::Healthy => 0,
            CheckStatus::Degraded => 1,
            CheckStatus::Unhealthy => 2,
        })
        .unwrap_or(CheckStatus::Healthy);

    let status = if overall == CheckStatus::Healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(Readiness {
            status: overall,
            cache,
            index,
        }),
    )
        .into_response()
}
