use crate::ResilienceError;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tower::{Layer, Service};

type TimeoutListener = Arc<dyn Fn(Duration) + Send + Sync>;

struct TimeLimitConfig {
    limit: Duration,
    name: String,
    on_timeout: Vec<TimeoutListener>,
}

/// A Tower layer capping the wall-clock duration of an inner call.
///
/// This is the outermost layer of a resilience stack: when the limit expires
/// the whole stack below it, retries included, is dropped and the caller gets
/// `E::deadline_exceeded(limit)`.
#[derive(Clone)]
pub struct TimeLimitLayer {
    config: Arc<TimeLimitConfig>,
}

impl TimeLimitLayer {
    pub fn builder() -> TimeLimitConfigBuilder {
        TimeLimitConfigBuilder::new()
    }
}

impl<S> Layer<S> for TimeLimitLayer {
    type Service = TimeLimit<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TimeLimit {
            inner,
            config: Arc::clone(&self.config),
        }
    }
}

/// Builder for [`TimeLimitLayer`].
pub struct TimeLimitConfigBuilder {
    limit: Duration,
    name: String,
    on_timeout: Vec<TimeoutListener>,
}

impl TimeLimitConfigBuilder {
    fn new() -> Self {
        Self {
            limit: Duration::from_secs(5),
            name: String::from("<unnamed>"),
            on_timeout: Vec::new(),
        }
    }

    /// Wall-clock cap for one call through the stack.
    ///
    /// Default: 5 seconds.
    pub fn limit(mut self, limit: Duration) -> Self {
        self.limit = limit;
        self
    }

    /// Name used in logs.
    pub fn name<N: Into<String>>(mut self, name: N) -> Self {
        self.name = name.into();
        self
    }

    /// Callback invoked when the limit expires, with the configured limit.
    pub fn on_timeout<F>(mut self, f: F) -> Self
    where
        F: Fn(Duration) + Send + Sync + 'static,
    {
        self.on_timeout.push(Arc::new(f));
        self
    }

    pub fn build(self) -> TimeLimitLayer {
        TimeLimitLayer {
            config: Arc::new(TimeLimitConfig {
                limit: self.limit,
                name: self.name,
                on_timeout: self.on_timeout,
            }),
        }
    }
}

/// A Tower service enforcing a wall-clock limit on an inner service.
pub struct TimeLimit<S> {
    inner: S,
    config: Arc<TimeLimitConfig>,
}

impl<S: Clone> Clone for TimeLimit<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            config: Arc::clone(&self.config),
        }
    }
}

impl<S, Req> Service<Req> for TimeLimit<S>
where
    S: Service<Req> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Response: Send + 'static,
    S::Error: ResilienceError + Send + 'static,
    Req: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let mut inner = self.inner.clone();
        let config = Arc::clone(&self.config);

        Box::pin(async move {
            match tokio::time::timeout(config.limit, inner.call(req)).await {
                Ok(result) => result,
                Err(_elapsed) => {
                    tracing::warn!(
                        timelimit = %config.name,
                        limit_ms = config.limit.as_millis() as u64,
                        "call exceeded wall-clock limit"
                    );
                    for listener in &config.on_timeout {
                        listener(config.limit);
                    }
                    Err(S::Error::deadline_exceeded(config.limit))
                }
            }
        })
    }
}
