//! Resilience middleware for the vector gateway's outbound backend calls.
//!
//! Three Tower layers that compose into the stack every backend client uses,
//! outermost first:
//!
//! ```text
//! TimeLimit -> CircuitBreaker -> Retry -> operation
//! ```
//!
//! All layers in one stack share a single error type implementing
//! [`ResilienceError`], so the composed service keeps `Error = E` end to end
//! instead of nesting wrapper errors per layer. The trait tells each layer
//! which failures are transient (retryable, counted by the breaker) and lets
//! the time limit and the breaker synthesize their own failure values.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use tower::ServiceBuilder;
//! use vector_gateway_resilience::{
//!     CircuitBreakerLayer, ResilienceError, RetryLayer, TimeLimitLayer,
//! };
//!
//! #[derive(Debug, Clone)]
//! enum CallError {
//!     Transient,
//!     TimedOut,
//!     Rejected,
//! }
//!
//! impl ResilienceError for CallError {
//!     fn is_transient(&self) -> bool {
//!         matches!(self, CallError::Transient | CallError::TimedOut)
//!     }
//!     fn deadline_exceeded(_limit: Duration) -> Self {
//!         CallError::TimedOut
//!     }
//!     fn circuit_open() -> Self {
//!         CallError::Rejected
//!     }
//! }
//!
//! let service = ServiceBuilder::new()
//!     .layer(TimeLimitLayer::builder().limit(Duration::from_secs(5)).build())
//!     .layer(CircuitBreakerLayer::builder().name("example").build())
//!     .layer(RetryLayer::builder().max_retries(3).build())
//!     .service(tower::service_fn(|req: String| async move {
//!         Ok::<_, CallError>(req)
//!     }));
//! # drop(service);
//! ```

mod circuit;
mod retry;
mod timeout;

pub use circuit::{
    CircuitBreaker, CircuitBreakerConfigBuilder, CircuitBreakerLayer, CircuitHandle, CircuitState,
};
pub use retry::{Retry, RetryConfigBuilder, RetryLayer};
pub use timeout::{TimeLimit, TimeLimitConfigBuilder, TimeLimitLayer};

use std::time::Duration;

/// Error contract shared by every layer in a resilience stack.
///
/// Implemented by the concrete backend error type so the composed service
/// carries one error type through the whole stack.
pub trait ResilienceError {
    /// Whether this failure is transient: retried by [`Retry`] and recorded
    /// as a failure by [`CircuitBreaker`]. Non-transient failures bypass
    /// both.
    fn is_transient(&self) -> bool;

    /// Failure produced when the outer wall-clock limit expires.
    fn deadline_exceeded(limit: Duration) -> Self;

    /// Failure produced when the breaker rejects a call without attempting it.
    fn circuit_open() -> Self;
}
