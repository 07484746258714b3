//! Typed clients for the two sidecar backends, wrapped in the resilience
//! stack they are always called through.

mod embedding;
mod index;

pub use embedding::{Embedding, EmbeddingClient};
pub use index::{IndexClient, IndexSearchOutcome, IndexSearchResults};

use metrics::gauge;
use std::time::Duration;
use thiserror::Error;
use tower::util::BoxCloneService;
use tower::{Service, ServiceBuilder};
use vector_gateway_resilience::{
    CircuitBreakerLayer, CircuitState, ResilienceError, RetryLayer, TimeLimitLayer,
};

/// Failure of one backend call, after the resilience stack has had its say.
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    /// The RPC completed with a non-OK status.
    #[error("rpc failed with {code:?}: {message}")]
    Rpc { code: tonic::Code, message: String },

    /// The outer wall-clock limit expired before the stack produced a result.
    #[error("backend call exceeded its {limit_ms} ms deadline")]
    DeadlineExceeded { limit_ms: u64 },

    /// The breaker rejected the call without attempting it.
    #[error("circuit open; call not permitted")]
    CircuitOpen,
}

impl BackendError {
    pub fn rpc(code: tonic::Code, message: impl Into<String>) -> Self {
        BackendError::Rpc {
            code,
            message: message.into(),
        }
    }
}

impl From<tonic::Status> for BackendError {
    fn from(status: tonic::Status) -> Self {
        BackendError::Rpc {
            code: status.code(),
            message: status.message().to_string(),
        }
    }
}

impl ResilienceError for BackendError {
    fn is_transient(&self) -> bool {
        match self {
            BackendError::Rpc { code, .. } => matches!(
                code,
                tonic::Code::Unavailable
                    | tonic::Code::DeadlineExceeded
                    | tonic::Code::ResourceExhausted
                    | tonic::Code::Internal
            ),
            BackendError::DeadlineExceeded { .. } => true,
            BackendError::CircuitOpen => false,
        }
    }

    fn deadline_exceeded(limit: Duration) -> Self {
        BackendError::DeadlineExceeded {
            limit_ms: limit.as_millis() as u64,
        }
    }

    fn circuit_open() -> Self {
        BackendError::CircuitOpen
    }
}

/// A backend call path after boxing the composed resilience stack.
pub(crate) type ResilientService<Req, Res> = BoxCloneService<Req, Res, BackendError>;

/// Breaker tuned per the backend policy: 10 s rolling window, 5 call minimum
/// throughput, opens at 50% transient failures, stays open 30 s. The
/// `circuit_breaker_open` gauge tracks its state.
pub(crate) fn backend_breaker(backend: &'static str) -> CircuitBreakerLayer {
    gauge!("circuit_breaker_open", "backend" => backend).set(0.0);
    CircuitBreakerLayer::builder()
        .window(Duration::from_secs(10))
        .min_throughput(5)
        .failure_rate_threshold(0.5)
        .open_duration(Duration::from_secs(30))
        .name(backend)
        .on_state_transition(move |_, to| {
            let open = if to == CircuitState::Open { 1.0 } else { 0.0 };
            gauge!("circuit_breaker_open", "backend" => backend).set(open);
        })
        .build()
}

/// Wraps a base call in the composed policy, outer to inner:
/// wall-clock limit, circuit breaker, retry (3 retries, 100 ms exponential
/// backoff with jitter).
pub(crate) fn resilient<S, Req>(
    base: S,
    backend: &'static str,
    limit: Duration,
    breaker: &CircuitBreakerLayer,
) -> ResilientService<Req, S::Response>
where
    S: Service<Req, Error = BackendError> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Response: Send + 'static,
    Req: Clone + Send + 'static,
{
    BoxCloneService::new(
        ServiceBuilder::new()
            .layer(TimeLimitLayer::builder().limit(limit).name(backend).build())
            .layer(breaker.clone())
            .layer(RetryLayer::builder().max_retries(3).name(backend).build())
            .service(base),
    )
}
