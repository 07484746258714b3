//! Metric registration for the Prometheus exposition.

use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};

/// Registers descriptions for every metric the gateway emits. Called once at
/// process start, after the recorder is installed.
pub fn describe_metrics() {
    describe_histogram!(
        "search_duration_ms",
        Unit::Milliseconds,
        "End-to-end search request duration"
    );
    describe_histogram!(
        "embedding_duration_ms",
        Unit::Milliseconds,
        "Embedding backend call duration, including retries"
    );
    describe_counter!("cache_hits_total", "Search responses served from cache");
    describe_counter!("cache_misses_total", "Search requests that missed the cache");
    describe_counter!("rate_limited_total", "Requests rejected by the admission limiter");
    describe_counter!("retry_attempts_total", "Backend retry attempts");
    describe_counter!("retry_exhausted_total", "Backend calls that exhausted their retries");
    describe_counter!(
        "circuitbreaker_transitions_total",
        "Circuit breaker state transitions"
    );
    describe_counter!(
        "circuitbreaker_rejected_total",
        "Calls rejected by an open circuit breaker"
    );
    describe_gauge!("active_searches", "Search requests currently in flight");
    describe_gauge!(
        "circuit_breaker_open",
        "1 while the backend's circuit breaker is open, else 0"
    );
}
