use crate::ResilienceError;
use futures::future::BoxFuture;
use metrics::counter;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tower::{Layer, Service};

type RetryListener = Arc<dyn Fn(usize, Duration) + Send + Sync>;

struct RetryConfig {
    max_retries: usize,
    base_delay: Duration,
    jitter: Duration,
    name: String,
    on_retry: Vec<RetryListener>,
}

impl RetryConfig {
    /// Backoff before retry `n` (1-based): `base * 2^n` plus uniform jitter
    /// in `[0, jitter)`.
    fn backoff(&self, retry: usize) -> Duration {
        let exp = self.base_delay.saturating_mul(1u32 << retry.min(16) as u32);
        exp + jittered(self.jitter)
    }
}

fn jittered(jitter: Duration) -> Duration {
    if jitter.is_zero() {
        return Duration::ZERO;
    }
    let millis = jitter.as_millis() as u64;
    Duration::from_millis(rand::random_range(0..millis))
}

/// A Tower layer retrying transient failures with exponential backoff.
#[derive(Clone)]
pub struct RetryLayer {
    config: Arc<RetryConfig>,
}

impl RetryLayer {
    pub fn builder() -> RetryConfigBuilder {
        RetryConfigBuilder::new()
    }
}

impl<S> Layer<S> for RetryLayer {
    type Service = Retry<S>;

    fn layer(&self, inner: S) -> Self::Service {
        Retry {
            inner,
            config: Arc::clone(&self.config),
        }
    }
}

/// Builder for [`RetryLayer`].
pub struct RetryConfigBuilder {
    max_retries: usize,
    base_delay: Duration,
    jitter: Duration,
    name: String,
    on_retry: Vec<RetryListener>,
}

impl RetryConfigBuilder {
    fn new() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            jitter: Duration::from_millis(100),
            name: String::from("<unnamed>"),
            on_retry: Vec::new(),
        }
    }

    /// Retries after the initial attempt, so `max_retries(3)` allows four
    /// attempts in total.
    ///
    /// Default: 3.
    pub fn max_retries(mut self, n: usize) -> Self {
        self.max_retries = n;
        self
    }

    /// Base for the exponential backoff; retry `n` waits `base * 2^n`.
    ///
    /// Default: 100 ms (retries at 200, 400, 800 ms).
    pub fn base_delay(mut self, base: Duration) -> Self {
        self.base_delay = base;
        self
    }

    /// Upper bound (exclusive) of the uniform jitter added to each backoff.
    ///
    /// Default: 100 ms.
    pub fn jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// Name used in logs and metric labels.
    pub fn name<N: Into<String>>(mut self, name: N) -> Self {
        self.name = name.into();
        self
    }

    /// Callback invoked before each retry with the retry number and delay.
    pub fn on_retry<F>(mut self, f: F) -> Self
    where
        F: Fn(usize, Duration) + Send + Sync + 'static,
    {
        self.on_retry.push(Arc::new(f));
        self
    }

    pub fn build(self) -> RetryLayer {
        RetryLayer {
            config: Arc::new(RetryConfig {
                max_retries: self.max_retries,
                base_delay: self.base_delay,
                jitter: self.jitter,
                name: self.name,
                on_retry: self.on_retry,
            }),
        }
    }
}

/// A Tower service retrying transient failures of an inner service.
pub struct Retry<S> {
    inner: S,
    config: Arc<RetryConfig>,
}

impl<S: Clone> Clone for Retry<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            config: Arc::clone(&self.config),
        }
    }
}

impl<S, Req> Service<Req> for Retry<S>
where
    S: Service<Req> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Response: Send + 'static,
    S::Error: ResilienceError + Send + 'static,
    Req: Clone + Send + 'static,
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
            let mut retry = 0;
            loop {
                match inner.call(req.clone()).await {
                    Ok(response) => {
                        if retry > 0 {
                            tracing::debug!(
                                retry = %config.name,
                                attempts = retry + 1,
                                "succeeded after retries"
                            );
                        }
                        return Ok(response);
                    }
                    Err(error) => {
                        if !error.is_transient() || retry >= config.max_retries {
                            if retry > 0 {
                                counter!(
                                    "retry_exhausted_total",
                                    "retry" => config.name.clone()
                                )
                                .increment(1);
                            }
                            return Err(error);
                        }

                        retry += 1;
                        let delay = config.backoff(retry);
                        tracing::debug!(
                            retry = %config.name,
                            attempt = retry,
                            delay_ms = delay.as_millis() as u64,
                            "retrying after transient failure"
                        );
                        counter!("retry_attempts_total", "retry" => config.name.clone())
                            .increment(1);
                        for listener in &config.on_retry {
                            listener(retry, delay);
                        }
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        })
    }
}
