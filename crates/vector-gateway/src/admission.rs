//! Admission control: rate limiting and correlation ids.
//!
//! Both run before any search work. Validation, the third admission step,
//! lives with the request types in [`crate::model`].

use crate::config::RateLimitConfig;
use crate::error::{problem_response, GatewayError};
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use http::HeaderValue;
use metrics::counter;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Correlation header name, read and echoed on every response.
pub const CORRELATION_HEADER: &str = "x-correlation-id";

/// Correlation id of the current request, stored in request extensions.
#[derive(Debug, Clone)]
pub struct CorrelationId(pub Arc<str>);

impl CorrelationId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// 16 hex characters from a fresh random source.
pub fn synthesize_correlation_id() -> String {
    format!("{:016x}", rand::random::<u64>())
}

/// Outermost middleware: adopts the incoming `X-Correlation-ID` or
/// synthesizes one, binds it to the request extensions, and echoes it on the
/// response.
pub async fn correlation(mut request: Request, next: Next) -> Response {
    let id = request
        .headers()
        .get(CORRELATION_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(synthesize_correlation_id);

    request
        .extensions_mut()
        .insert(CorrelationId(Arc::from(id.as_str())));

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&id) {
        response.headers_mut().insert(CORRELATION_HEADER, value);
    }
    response
}

struct WindowState {
    window_start: Instant,
    used: usize,
    queued: usize,
}

/// Fixed-window rate limiter: a permit budget per window, plus a bounded
/// queue of callers waiting for the next window. Beyond the queue, callers
/// are rejected immediately. Partitioned per process.
pub struct FixedWindowLimiter {
    permit_limit: usize,
    window: Duration,
    queue_limit: usize,
    state: Mutex<WindowState>,
}

enum Admit {
    Granted,
    Wait(Duration),
}

impl FixedWindowLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            permit_limit: config.permit_limit,
            window: config.window(),
            queue_limit: config.queue_limit,
            state: Mutex::new(WindowState {
                window_start: Instant::now(),
                used: 0,
                queued: 0,
            }),
        }
    }

    /// Acquires a permit, waiting at most until the next window refresh.
    ///
    /// Cancellation-safe: a waiter dropped mid-sleep releases its queue slot.
    pub async fn acquire(&self) -> Result<(), GatewayError> {
        loop {
            let admit = {
                let mut state = self.state.lock().unwrap();
                let now = Instant::now();
                if now.duration_since(state.window_start) >= self.window {
                    state.window_start = now;
                    state.used = 0;
                }

                if state.used < self.permit_limit {
                    state.used += 1;
                    Admit::Granted
                } else if state.queued >= self.queue_limit {
                    counter!("rate_limited_total").increment(1);
                    return Err(GatewayError::RateLimited);
                } else {
                    state.queued += 1;
                    Admit::Wait(
                        self.window
                            .saturating_sub(now.duration_since(state.window_start)),
                    )
                }
            };

            match admit {
                Admit::Granted => return Ok(()),
                Admit::Wait(delay) => {
                    let _slot = QueueSlot(self);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

/// Releases a queue slot even when the waiter is cancelled mid-sleep.
struct QueueSlot<'a>(&'a FixedWindowLimiter);

impl Drop for QueueSlot<'_> {
    fn drop(&mut self) {
        self.0.state.lock().unwrap().queued -= 1;
    }
}

/// Route middleware rejecting (or briefly queueing) requests beyond the
/// configured budget.
pub async fn rate_limit(
    State(limiter): State<Arc<FixedWindowLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    let correlation = request
        .extensions()
        .get::<CorrelationId>()
        .map(|c| c.0.to_string())
        .unwrap_or_default();

    match limiter.acquire().await {
        Ok(()) => next.run(request).await,
        Err(err) => problem_response(&err, &correlation),
    }
}
