//! The search orchestrator: owns one request end to end.

use crate::backend::{EmbeddingClient, IndexClient, IndexSearchOutcome};
use crate::cache::{self, ResponseCache};
use crate::error::GatewayError;
use crate::model::{rank_hits, SearchHit, SearchRequest, SearchResponse};
use crate::router::ShardRouter;
use metrics::{counter, gauge, histogram};
use std::sync::Arc;
use std::time::Instant;

/// Decrements `active_searches` on every exit path.
struct ActiveSearch;

impl ActiveSearch {
    fn enter() -> Self {
        gauge!("active_searches").increment(1.0);
        ActiveSearch
    }
}

impl Drop for ActiveSearch {
    fn drop(&mut self) {
        gauge!("active_searches").decrement(1.0);
    }
}

/// Runs the cache-aside search pipeline: route, fingerprint, cache lookup,
/// embed, index search, assembly, fire-and-forget cache population.
pub struct SearchOrchestrator {
    cache: Arc<ResponseCache>,
    router: ShardRouter,
    embedding: Arc<EmbeddingClient>,
    index: Arc<IndexClient>,
}

impl SearchOrchestrator {
    pub fn new(
        cache: Arc<ResponseCache>,
        router: ShardRouter,
        embedding: Arc<EmbeddingClient>,
        index: Arc<IndexClient>,
    ) -> Self {
        Self {
            cache,
            router,
            embedding,
            index,
        }
    }

    /// Serves one validated request.
    ///
    /// The only suspension points are the cache read, the two backend calls,
    /// and nothing else; assembly and fingerprinting are purely in-process.
    /// The cache write happens on a detached task so neither response
    /// latency nor client disconnects affect it.
    pub async fn search(&self, request: SearchRequest) -> Result<SearchResponse, GatewayError> {
        let started = Instant::now();
        let _active = ActiveSearch::enter();

        let shard_key = self.router.resolve_one(request.shard_key.as_deref());
        let fingerprint = cache::fingerprint(&request.query, request.top_k, &shard_key);

        if let Some(mut cached) = self.cache.get(&fingerprint).await {
            cached.cache_hit = true;
            cached.total_latency_ms = elapsed_ms(started);
            counter!("cache_hits_total").increment(1);
            self.finish(&cached, started);
            return Ok(cached);
        }
        counter!("cache_misses_total").increment(1);

        let embedding = self
            .embedding
            .embed(&request.query)
            .await
            .map_err(GatewayError::from_embedding_error)?;

        let outcome = self
            .index
            .search(embedding.vector, request.top_k, &shard_key, request.nprobe)
            .await
            .map_err(GatewayError::BackendUnavailable)?;

        let response = match outcome {
            IndexSearchOutcome::Degraded => {
                // Not cached: the next request should retry the backend.
                let degraded = SearchResponse {
                    results: Vec::new(),
                    shard_key,
                    search_latency_ms: 0.0,
                    total_latency_ms: elapsed_ms(started),
                    cache_hit: false,
                    query_hash: fingerprint,
                };
                self.finish(&degraded, started);
                return Ok(degraded);
            }
            IndexSearchOutcome::Results(results) => {
                let mut hits: Vec<SearchHit> = results
                    .hits
                    .into_iter()
                    .map(|hit| SearchHit {
                        id: hit.id,
                        score: hit.score,
                        metadata: parse_metadata(&hit.metadata_json),
                    })
                    .collect();
                rank_hits(&mut hits);

                SearchResponse {
                    results: hits,
                    shard_key: results.shard_key,
                    search_latency_ms: results.search_latency_ms,
                    total_latency_ms: elapsed_ms(started),
                    cache_hit: false,
                    query_hash: fingerprint.clone(),
                }
            }
        };

        let cache = Arc::clone(&self.cache);
        let to_store = response.clone();
        tokio::spawn(async move {
            cache.set(&fingerprint, &to_store, None).await;
        });

        self.finish(&response, started);
        Ok(response)
    }

    fn finish(&self, response: &SearchResponse, started: Instant) {
        histogram!("search_duration_ms").record(elapsed_ms(started));

        let span = tracing::Span::current();
        span.record("search.shard_key", response.shard_key.as_str());
        span.record("search.cache_hit", response.cache_hit);
        span.record("search.result_count", response.results.len());
        span.record("search.total_latency_ms", response.total_latency_ms);
        span.record("search.search_latency_ms", response.search_latency_ms);
        span.record("search.query_hash", response.query_hash.as_str());
    }
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}

/// Deserializes a hit's metadata. An empty or absent payload yields an empty
/// mapping; a malformed one is logged and also yields an empty mapping, so a
/// bad shard entry never fails the request.
fn parse_metadata(payload: &str) -> serde_json::Map<String, serde_json::Value> {
    if payload.is_empty() {
        return serde_json::Map::new();
    }
    match serde_json::from_str(payload) {
        Ok(map) => map,
        Err(e) => {
            tracing::warn!(error = %e, "hit metadata failed to deserialize; dropping it");
            serde_json::Map::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_metadata_yields_empty_map() {
        assert!(parse_metadata("").is_empty());
    }

    #[test]
    fn object_metadata_parses() {
        let map = parse_metadata(r#"{"fare": 12.5, "borough": "Queens"}"#);
        assert_eq!(map.len(), 2);
        assert_eq!(map["borough"], serde_json::json!("Queens"));
    }

    #[test]
    fn malformed_metadata_yields_empty_map() {
        assert!(parse_metadata("{oops").is_empty());
        // A JSON value that is not an object is also malformed here.
        assert!(parse_metadata("[1, 2]").is_empty());
    }
}
