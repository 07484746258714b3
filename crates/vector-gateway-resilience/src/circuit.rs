use crate::ResilienceError;
use futures::future::BoxFuture;
use metrics::counter;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tower::{Layer, Service};

/// State of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CircuitState {
    /// Calls flow through and outcomes are recorded.
    Closed = 0,
    /// Calls are rejected immediately until the open duration elapses.
    Open = 1,
    /// A single probe call is admitted to test the backend.
    HalfOpen = 2,
}

impl CircuitState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => CircuitState::Open,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }

    /// Stable label for metrics and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

/// Outcome of one recorded call, as classified by [`ResilienceError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Success,
    TransientFailure,
    /// Non-transient failure: not recorded in the window at all.
    Ignored,
}

type TransitionListener = Arc<dyn Fn(CircuitState, CircuitState) + Send + Sync>;
type RejectListener = Arc<dyn Fn() + Send + Sync>;

pub(crate) struct CircuitConfig {
    pub(crate) window: Duration,
    pub(crate) min_throughput: usize,
    pub(crate) failure_rate_threshold: f64,
    pub(crate) open_duration: Duration,
    pub(crate) name: String,
    pub(crate) on_transition: Vec<TransitionListener>,
    pub(crate) on_rejected: Vec<RejectListener>,
}

struct CallRecord {
    at: Instant,
    is_failure: bool,
}

struct CircuitInner {
    state: CircuitState,
    changed_at: Instant,
    records: VecDeque<CallRecord>,
    probe_in_flight: bool,
}

/// Shared circuit state. One instance per backend policy; every clone of a
/// layered service, and every [`CircuitHandle`], points at the same state.
struct Shared {
    state_atomic: AtomicU8,
    inner: Mutex<CircuitInner>,
    config: CircuitConfig,
}

impl Shared {
    fn new(config: CircuitConfig) -> Self {
        Self {
            state_atomic: AtomicU8::new(CircuitState::Closed as u8),
            inner: Mutex::new(CircuitInner {
                state: CircuitState::Closed,
                changed_at: Instant::now(),
                records: VecDeque::new(),
                probe_in_flight: false,
            }),
            config,
        }
    }

    /// Lock-free view of the current state. Transitions are published with
    /// `Release` ordering, so a caller that starts after a transition
    /// observes it.
    fn state(&self) -> CircuitState {
        CircuitState::from_u8(self.state_atomic.load(Ordering::Acquire))
    }

    fn try_acquire(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                if inner.changed_at.elapsed() >= self.config.open_duration {
                    self.transition(&mut inner, CircuitState::HalfOpen);
                    inner.probe_in_flight = true;
                    true
                } else {
                    drop(inner);
                    self.rejected();
                    false
                }
            }
            CircuitState::HalfOpen => {
                // One probe at a time. If a previous probe vanished without a
                // verdict (cancelled mid-flight), re-arm after a full open
                // duration so the breaker cannot wedge.
                if !inner.probe_in_flight
                    || inner.changed_at.elapsed() >= self.config.open_duration
                {
                    inner.probe_in_flight = true;
                    inner.changed_at = Instant::now();
                    true
                } else {
                    drop(inner);
                    self.rejected();
                    false
                }
            }
        }
    }

    fn record(&self, outcome: Outcome) {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            CircuitState::HalfOpen => {
                inner.probe_in_flight = false;
                match outcome {
                    Outcome::Success => self.transition(&mut inner, CircuitState::Closed),
                    Outcome::TransientFailure => self.transition(&mut inner, CircuitState::Open),
                    // No verdict: the next caller becomes the probe.
                    Outcome::Ignored => {}
                }
            }
            CircuitState::Closed => {
                let is_failure = match outcome {
                    Outcome::Success => false,
                    Outcome::TransientFailure => true,
                    Outcome::Ignored => return,
                };
                let now = Instant::now();
                inner.records.push_back(CallRecord { at: now, is_failure });
                self.evict_expired(&mut inner, now);
                self.evaluate(&mut inner);
            }
            // A call admitted before the transition finishing after it.
            CircuitState::Open => {}
        }
    }

    fn evict_expired(&self, inner: &mut CircuitInner, now: Instant) {
        while let Some(front) = inner.records.front() {
            if now.duration_since(front.at) > self.config.window {
                inner.records.pop_front();
            } else {
                break;
            }
        }
    }

    fn evaluate(&self, inner: &mut CircuitInner) {
        let total = inner.records.len();
        if total < self.config.min_throughput {
            return;
        }
        let failures = inner.records.iter().filter(|r| r.is_failure).count();
        let failure_rate = failures as f64 / total as f64;
        if failure_rate >= self.config.failure_rate_threshold {
            self.transition(inner, CircuitState::Open);
        }
    }

    fn transition(&self, inner: &mut CircuitInner, to: CircuitState) {
        if inner.state == to {
            return;
        }
        let from = inner.state;
        inner.state = to;
        inner.changed_at = Instant::now();
        inner.records.clear();
        inner.probe_in_flight = false;
        self.state_atomic.store(to as u8, Ordering::Release);

        tracing::info!(
            circuit = %self.config.name,
            from = from.as_str(),
            to = to.as_str(),
            "circuit state transition"
        );
        counter!(
            "circuitbreaker_transitions_total",
            "circuit" => self.config.name.clone(),
            "to" => to.as_str()
        )
        .increment(1);

        for listener in &self.config.on_transition {
            listener(from, to);
        }
    }

    fn rejected(&self) {
        counter!(
            "circuitbreaker_rejected_total",
            "circuit" => self.config.name.clone()
        )
        .increment(1);
        for listener in &self.config.on_rejected {
            listener();
        }
    }
}

/// Read-only handle onto a breaker's state, for gauges and readiness probes.
#[derive(Clone)]
pub struct CircuitHandle {
    shared: Arc<Shared>,
}

impl CircuitHandle {
    pub fn state(&self) -> CircuitState {
        self.shared.state()
    }

    pub fn is_open(&self) -> bool {
        self.shared.state() == CircuitState::Open
    }
}

/// A Tower layer applying circuit breaking to an inner service.
///
/// All services produced by one layer share the same breaker state, which is
/// what makes the breaker a process-wide singleton per backend.
#[derive(Clone)]
pub struct CircuitBreakerLayer {
    shared: Arc<Shared>,
}

impl CircuitBreakerLayer {
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::new()
    }

    /// Handle for observing this breaker's state.
    pub fn handle(&self) -> CircuitHandle {
        CircuitHandle {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<S> Layer<S> for CircuitBreakerLayer {
    type Service = CircuitBreaker<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CircuitBreaker {
            inner,
            shared: Arc::clone(&self.shared),
        }
    }
}

/// Builder for [`CircuitBreakerLayer`].
pub struct CircuitBreakerConfigBuilder {
    window: Duration,
    min_throughput: usize,
    failure_rate_threshold: f64,
    open_duration: Duration,
    name: String,
    on_transition: Vec<TransitionListener>,
    on_rejected: Vec<RejectListener>,
}

impl CircuitBreakerConfigBuilder {
    fn new() -> Self {
        Self {
            window: Duration::from_secs(10),
            min_throughput: 5,
            failure_rate_threshold: 0.5,
            open_duration: Duration::from_secs(30),
            name: String::from("<unnamed>"),
            on_transition: Vec::new(),
            on_rejected: Vec::new(),
        }
    }

    /// Rolling window over which call outcomes are evaluated.
    ///
    /// Default: 10 seconds.
    pub fn window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// Minimum recorded calls in the window before the failure rate is
    /// evaluated.
    ///
    /// Default: 5.
    pub fn min_throughput(mut self, n: usize) -> Self {
        self.min_throughput = n;
        self
    }

    /// Failure rate at or above which the breaker opens.
    ///
    /// Default: 0.5.
    pub fn failure_rate_threshold(mut self, rate: f64) -> Self {
        self.failure_rate_threshold = rate;
        self
    }

    /// How long the breaker stays open before admitting a probe.
    ///
    /// Default: 30 seconds.
    pub fn open_duration(mut self, duration: Duration) -> Self {
        self.open_duration = duration;
        self
    }

    /// Name used in logs and metric labels.
    pub fn name<N: Into<String>>(mut self, name: N) -> Self {
        self.name = name.into();
        self
    }

    /// Callback invoked on every state transition.
    pub fn on_state_transition<F>(mut self, f: F) -> Self
    where
        F: Fn(CircuitState, CircuitState) + Send + Sync + 'static,
    {
        self.on_transition.push(Arc::new(f));
        self
    }

    /// Callback invoked when a call is rejected without being attempted.
    pub fn on_call_rejected<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_rejected.push(Arc::new(f));
        self
    }

    pub fn build(self) -> CircuitBreakerLayer {
        CircuitBreakerLayer {
            shared: Arc::new(Shared::new(CircuitConfig {
                window: self.window,
                min_throughput: self.min_throughput,
                failure_rate_threshold: self.failure_rate_threshold,
                open_duration: self.open_duration,
                name: self.name,
                on_transition: self.on_transition,
                on_rejected: self.on_rejected,
            })),
        }
    }
}

/// A Tower service guarding an inner service with a shared circuit breaker.
pub struct CircuitBreaker<S> {
    inner: S,
    shared: Arc<Shared>,
}

impl<S: Clone> Clone for CircuitBreaker<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<S> CircuitBreaker<S> {
    pub fn state(&self) -> CircuitState {
        self.shared.state()
    }
}

impl<S, Req> Service<Req> for CircuitBreaker<S>
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
        let shared = Arc::clone(&self.shared);

        Box::pin(async move {
            if !shared.try_acquire() {
                return Err(S::Error::circuit_open());
            }

            let result = inner.call(req).await;
            let outcome = match &result {
                Ok(_) => Outcome::Success,
                Err(e) if e.is_transient() => Outcome::TransientFailure,
                Err(_) => Outcome::Ignored,
            };
            shared.record(outcome);
            result
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tower::{service_fn, ServiceExt};

    #[derive(Debug, Clone, PartialEq)]
    enum TestError {
        Transient,
        Permanent,
        Rejected,
    }

    impl ResilienceError for TestError {
        fn is_transient(&self) -> bool {
            matches!(self, TestError::Transient)
        }
        fn deadline_exceeded(_: Duration) -> Self {
            TestError::Transient
        }
        fn circuit_open() -> Self {
            TestError::Rejected
        }
    }

    fn failing_layer(open_duration: Duration) -> CircuitBreakerLayer {
        CircuitBreakerLayer::builder()
            .window(Duration::from_secs(10))
            .min_throughput(5)
            .failure_rate_threshold(0.5)
            .open_duration(open_duration)
            .name("test")
            .build()
    }

    #[tokio::test]
    async fn opens_after_min_throughput_of_failures() {
        let layer = failing_layer(Duration::from_secs(30));
        let handle = layer.handle();
        let mut svc =
            layer.layer(service_fn(|_: ()| async { Err::<(), _>(TestError::Transient) }));

        for _ in 0..4 {
            let _ = svc.ready().await.unwrap().call(()).await;
            assert_eq!(handle.state(), CircuitState::Closed);
        }
        let _ = svc.ready().await.unwrap().call(()).await;
        assert_eq!(handle.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn open_rejects_without_calling_inner() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        let layer = failing_layer(Duration::from_secs(30));
        let mut svc = layer.layer(service_fn(move |_: ()| {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(TestError::Transient)
            }
        }));

        for _ in 0..5 {
            let _ = svc.ready().await.unwrap().call(()).await;
        }
        assert_eq!(calls.load(Ordering::SeqCst), 5);

        let result = svc.ready().await.unwrap().call(()).await;
        assert_eq!(result.unwrap_err(), TestError::Rejected);
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn non_transient_failures_do_not_trip_breaker() {
        let layer = failing_layer(Duration::from_secs(30));
        let handle = layer.handle();
        let mut svc =
            layer.layer(service_fn(|_: ()| async { Err::<(), _>(TestError::Permanent) }));

        for _ in 0..20 {
            let _ = svc.ready().await.unwrap().call(()).await;
        }
        assert_eq!(handle.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn half_open_admits_single_probe_then_closes_on_success() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let layer = failing_layer(Duration::from_millis(50));
        let handle = layer.handle();
        let mut svc = layer.layer(service_fn(move |_: ()| {
            let n = c.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 5 {
                    Err::<(), _>(TestError::Transient)
                } else {
                    Ok(())
                }
            }
        }));

        for _ in 0..5 {
            let _ = svc.ready().await.unwrap().call(()).await;
        }
        assert_eq!(handle.state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(70)).await;

        let probe = svc.ready().await.unwrap().call(()).await;
        assert!(probe.is_ok());
        assert_eq!(handle.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn half_open_failure_reopens() {
        let layer = failing_layer(Duration::from_millis(50));
        let handle = layer.handle();
        let mut svc =
            layer.layer(service_fn(|_: ()| async { Err::<(), _>(TestError::Transient) }));

        for _ in 0..5 {
            let _ = svc.ready().await.unwrap().call(()).await;
        }
        tokio::time::sleep(Duration::from_millis(70)).await;

        let probe = svc.ready().await.unwrap().call(()).await;
        assert_eq!(probe.unwrap_err(), TestError::Transient);
        assert_eq!(handle.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn transition_listener_fires() {
        let transitions: Arc<Mutex<Vec<(CircuitState, CircuitState)>>> =
            Arc::new(Mutex::new(Vec::new()));
        let t = Arc::clone(&transitions);

        let layer = CircuitBreakerLayer::builder()
            .min_throughput(2)
            .open_duration(Duration::from_secs(30))
            .name("listener")
            .on_state_transition(move |from, to| t.lock().unwrap().push((from, to)))
            .build();
        let mut svc =
            layer.layer(service_fn(|_: ()| async { Err::<(), _>(TestError::Transient) }));

        for _ in 0..2 {
            let _ = svc.ready().await.unwrap().call(()).await;
        }
        let recorded = transitions.lock().unwrap();
        assert_eq!(recorded.as_slice(), &[(CircuitState::Closed, CircuitState::Open)]);
    }

    #[tokio::test]
    async fn state_shared_across_clones() {
        let layer = failing_layer(Duration::from_secs(30));
        let mut a =
            layer.layer(service_fn(|_: ()| async { Err::<(), _>(TestError::Transient) }));
        let mut b = a.clone();

        for _ in 0..5 {
            let _ = a.ready().await.unwrap().call(()).await;
        }
        let result = b.ready().await.unwrap().call(()).await;
        assert_eq!(result.unwrap_err(), TestError::Rejected);
    }
}
