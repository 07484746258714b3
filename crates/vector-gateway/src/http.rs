//! HTTP surface: router assembly and endpoint handlers.

use crate::admission::{self, CorrelationId, FixedWindowLimiter};
use crate::backend::IndexClient;
use crate::cache::ResponseCache;
use crate::config::GatewayConfig;
use crate::error::{problem_response, GatewayError};
use crate::health;
use crate::model::{ReloadResult, SearchRequest, SearchRequestBody, ShardDescriptor};
use crate::orchestrator::SearchOrchestrator;
use crate::pb;
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{middleware, Extension, Json, Router};
use http::StatusCode;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::Instrument;

/// Shared process-wide state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub orchestrator: Arc<SearchOrchestrator>,
    pub cache: Arc<ResponseCache>,
    pub index: Arc<IndexClient>,
    pub limiter: Arc<FixedWindowLimiter>,
    pub metrics: Option<PrometheusHandle>,
}

/// Builds the gateway router. Correlation runs outermost so every response,
/// including admission rejections, carries the header; the rate limiter
/// guards only the search route.
pub fn app(state: AppState) -> Router {
    let search = Router::new()
        .route("/api/v1/search", post(search))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state.limiter),
            admission::rate_limit,
        ));

    Router::new()
        .merge(search)
        .route("/api/v1/index/info", get(index_info))
        .route("/api/v1/index/reload", post(index_reload))
        .route("/health/live", get(health::live))
        .route("/health/ready", get(health::ready))
        .route("/metrics", get(metrics))
        .layer(middleware::from_fn(admission::correlation))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// `POST /api/v1/search`
async fn search(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Json(body): Json<SearchRequestBody>,
) -> Response {
    let request = match SearchRequest::validate(body, &state.config.faiss) {
        Ok(request) => request,
        Err(e) => return problem_response(&e, correlation.as_str()),
    };

    let span = tracing::info_span!(
        "search",
        correlation_id = correlation.as_str(),
        search.query_length = request.query.trim().chars().count(),
        search.top_k = request.top_k,
        search.nprobe = request.nprobe,
        search.shard_key = tracing::field::Empty,
        search.cache_hit = tracing::field::Empty,
        search.result_count = tracing::field::Empty,
        search.total_latency_ms = tracing::field::Empty,
        search.search_latency_ms = tracing::field::Empty,
        search.query_hash = tracing::field::Empty,
    );

    match state.orchestrator.search(request).instrument(span).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(e) => problem_response(&e, correlation.as_str()),
    }
}

#[derive(Debug, Deserialize)]
struct ShardQuery {
    #[serde(rename = "shardKey")]
    shard_key: Option<String>,
}

/// `GET /api/v1/index/info`
async fn index_info(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Query(query): Query<ShardQuery>,
) -> Response {
    match state.index.info(query.shard_key.as_deref()).await {
        Ok(shards) => {
            let shards: Vec<ShardDescriptor> = shards.into_iter().map(shard_descriptor).collect();
            (StatusCode::OK, Json(shards)).into_response()
        }
        Err(e) => problem_response(
            &GatewayError::BackendUnavailable(e),
            correlation.as_str(),
        ),
    }
}

/// `POST /api/v1/index/reload`
async fn index_reload(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Query(query): Query<ShardQuery>,
) -> Response {
    match state.index.reload(query.shard_key.as_deref()).await {
        Ok(reply) => (
            StatusCode::OK,
            Json(ReloadResult {
                success: reply.success,
                reloaded_shards: reply.reloaded_shards,
                message: reply.message,
            }),
        )
            .into_response(),
        Err(e) => problem_response(
            &GatewayError::BackendUnavailable(e),
            correlation.as_str(),
        ),
    }
}

/// `GET /metrics` — Prometheus exposition.
async fn metrics(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => (StatusCode::OK, handle.render()).into_response(),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            "metrics recorder not installed",
        )
            .into_response(),
    }
}

fn shard_descriptor(info: pb::ShardInfo) -> ShardDescriptor {
    ShardDescriptor {
        shard_key: info.shard_key,
        total_vectors: info.total_vectors,
        dimension: info.dimension,
        index_type: info.index_type,
        is_trained: info.is_trained,
        index_size_bytes: info.index_size_bytes,
    }
}
