//! End-to-end tests of the search pipeline over mocked backends.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tower::util::BoxCloneService;
use vector_gateway::backend::{BackendError, EmbeddingClient, IndexClient};
use vector_gateway::cache::{self, CacheStore, MemoryStore, ResponseCache, StoreError};
use vector_gateway::error::GatewayError;
use vector_gateway::model::SearchRequest;
use vector_gateway::pb;
use vector_gateway::router::ShardRouter;
use vector_gateway::SearchOrchestrator;

const DEFAULT_SHARD: &str = "nyc_taxi_2023";

type EmbedSvc = BoxCloneService<pb::EmbedRequest, pb::EmbedReply, BackendError>;
type SearchSvc = BoxCloneService<pb::SearchIndexRequest, pb::SearchIndexReply, BackendError>;

fn embed_reply() -> pb::EmbedReply {
    pb::EmbedReply {
        vector: vec![0.1, 0.2, 0.3],
        dimension: 3,
        model_name: "all-MiniLM-L6-v2".to_string(),
        latency_ms: 2.0,
    }
}

fn embed_ok(calls: Arc<AtomicUsize>) -> EmbedSvc {
    BoxCloneService::new(tower::service_fn(move |_req: pb::EmbedRequest| {
        calls.fetch_add(1, Ordering::SeqCst);
        async move { Ok(embed_reply()) }
    }))
}

fn embed_unavailable(calls: Arc<AtomicUsize>) -> EmbedSvc {
    BoxCloneService::new(tower::service_fn(move |_req: pb::EmbedRequest| {
        calls.fetch_add(1, Ordering::SeqCst);
        async move {
            Err::<pb::EmbedReply, _>(BackendError::rpc(tonic::Code::Unavailable, "embedder down"))
        }
    }))
}

fn index_hits(hits: Vec<pb::IndexHit>) -> SearchSvc {
    BoxCloneService::new(tower::service_fn(move |req: pb::SearchIndexRequest| {
        let hits = hits.clone();
        async move {
            Ok(pb::SearchIndexReply {
                results: hits,
                shard_key: req.shard_key,
                search_latency_ms: 7.5,
            })
        }
    }))
}

fn index_unavailable() -> SearchSvc {
    BoxCloneService::new(tower::service_fn(|_req: pb::SearchIndexRequest| async {
        Err::<pb::SearchIndexReply, _>(BackendError::rpc(tonic::Code::Unavailable, "index down"))
    }))
}

fn info_ok() -> BoxCloneService<pb::IndexInfoRequest, pb::IndexInfoReply, BackendError> {
    BoxCloneService::new(tower::service_fn(|_req: pb::IndexInfoRequest| async {
        Ok(pb::IndexInfoReply { shards: vec![] })
    }))
}

fn reload_ok() -> BoxCloneService<pb::ReloadRequest, pb::ReloadReply, BackendError> {
    BoxCloneService::new(tower::service_fn(|_req: pb::ReloadRequest| async {
        Ok(pb::ReloadReply::default())
    }))
}

fn harness(embed: EmbedSvc, search: SearchSvc, store: Arc<dyn CacheStore>) -> SearchOrchestrator {
    let cache = Arc::new(ResponseCache::new(store, "vc:", Duration::from_secs(300)));
    let embedding = Arc::new(EmbeddingClient::new(
        embed,
        "all-MiniLM-L6-v2".to_string(),
        Duration::from_secs(10),
    ));
    let index = Arc::new(IndexClient::new(
        search,
        info_ok(),
        reload_ok(),
        Duration::from_secs(5),
    ));
    SearchOrchestrator::new(cache, ShardRouter::new(DEFAULT_SHARD), embedding, index)
}

fn request(query: &str) -> SearchRequest {
    SearchRequest {
        query: query.to_string(),
        top_k: 5,
        shard_key: None,
        nprobe: 10,
    }
}

fn sample_hits() -> Vec<pb::IndexHit> {
    vec![
        pb::IndexHit {
            id: 2,
            score: 0.4,
            metadata_json: String::new(),
        },
        pb::IndexHit {
            id: 1,
            score: 0.9,
            metadata_json: r#"{"fare": 23.5}"#.to_string(),
        },
    ]
}

/// Polls until the fire-and-forget cache write lands.
async fn await_cache_write(cache: &ResponseCache, fingerprint: &str) {
    for _ in 0..100 {
        if cache.get(fingerprint).await.is_some() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("cache write for {fingerprint} never landed");
}

#[tokio::test]
async fn cold_then_warm_hits_cache_without_backends() {
    let embed_calls = Arc::new(AtomicUsize::new(0));
    let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
    let orchestrator = harness(
        embed_ok(Arc::clone(&embed_calls)),
        index_hits(sample_hits()),
        store.clone(),
    );
    let cache = ResponseCache::new(store, "vc:", Duration::from_secs(300));

    let cold = orchestrator
        .search(request("taxi ride from JFK"))
        .await
        .unwrap();
    assert!(!cold.cache_hit);
    assert_eq!(cold.results.len(), 2);
    assert_eq!(cold.shard_key, DEFAULT_SHARD);
    assert_eq!(embed_calls.load(Ordering::SeqCst), 1);

    let fingerprint = cache::fingerprint("taxi ride from JFK", 5, DEFAULT_SHARD);
    assert_eq!(cold.query_hash, fingerprint);
    await_cache_write(&cache, &fingerprint).await;

    let warm = orchestrator
        .search(request("taxi ride from JFK"))
        .await
        .unwrap();
    assert!(warm.cache_hit);
    assert_eq!(warm.query_hash, cold.query_hash);
    assert_eq!(
        warm.results.iter().map(|h| h.id).collect::<Vec<_>>(),
        cold.results.iter().map(|h| h.id).collect::<Vec<_>>()
    );
    // The warm path never touched the embedder again.
    assert_eq!(embed_calls.load(Ordering::SeqCst), 1);
    // The stored search latency survives; only the total is remeasured.
    assert_eq!(warm.search_latency_ms, cold.search_latency_ms);
}

#[tokio::test]
async fn fingerprint_canonicalization_shares_cache_entries() {
    let embed_calls = Arc::new(AtomicUsize::new(0));
    let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
    let orchestrator = harness(
        embed_ok(Arc::clone(&embed_calls)),
        index_hits(sample_hits()),
        store.clone(),
    );
    let cache = ResponseCache::new(store, "vc:", Duration::from_secs(300));

    let cold = orchestrator.search(request("Taxi Ride")).await.unwrap();
    await_cache_write(&cache, &cold.query_hash).await;

    let warm = orchestrator.search(request("  taxi ride ")).await.unwrap();
    assert!(warm.cache_hit);
    assert_eq!(warm.query_hash, cold.query_hash);
    assert_eq!(embed_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn embedding_outage_surfaces_after_four_attempts() {
    let embed_calls = Arc::new(AtomicUsize::new(0));
    let orchestrator = harness(
        embed_unavailable(Arc::clone(&embed_calls)),
        index_hits(sample_hits()),
        Arc::new(MemoryStore::new()),
    );

    let err = orchestrator.search(request("q")).await.unwrap_err();
    assert!(matches!(err, GatewayError::BackendUnavailable(_)));
    assert_eq!(embed_calls.load(Ordering::SeqCst), 4);
}

#[tokio::test(start_paused = true)]
async fn open_index_breaker_degrades_and_skips_cache() {
    let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
    let orchestrator = harness(
        embed_ok(Arc::new(AtomicUsize::new(0))),
        index_unavailable(),
        store.clone(),
    );

    // Trip the index breaker: five calls recording transient failures.
    for _ in 0..5 {
        let err = orchestrator.search(request("q")).await.unwrap_err();
        assert!(matches!(err, GatewayError::BackendUnavailable(_)));
    }

    let degraded = orchestrator.search(request("q")).await.unwrap();
    assert!(degraded.results.is_empty());
    assert!(!degraded.cache_hit);
    assert_eq!(degraded.shard_key, DEFAULT_SHARD);

    // No cache write happened for the degraded response.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let cache = ResponseCache::new(store, "vc:", Duration::from_secs(300));
    assert!(cache.get(&degraded.query_hash).await.is_none());
}

#[tokio::test]
async fn shard_override_reaches_backend_and_echoes() {
    let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let s = Arc::clone(&seen);
    let search = BoxCloneService::new(tower::service_fn(move |req: pb::SearchIndexRequest| {
        s.lock().unwrap().push(req.shard_key.clone());
        async move {
            Ok(pb::SearchIndexReply {
                results: vec![],
                shard_key: req.shard_key,
                search_latency_ms: 1.0,
            })
        }
    }));
    let orchestrator = harness(
        embed_ok(Arc::new(AtomicUsize::new(0))),
        search,
        Arc::new(MemoryStore::new()),
    );

    let mut req = request("x");
    req.shard_key = Some("nyc_taxi_2022".to_string());
    let response = orchestrator.search(req).await.unwrap();

    assert_eq!(response.shard_key, "nyc_taxi_2022");
    assert_eq!(seen.lock().unwrap().as_slice(), &["nyc_taxi_2022".to_string()]);
}

#[tokio::test]
async fn results_are_ranked_by_score_then_id() {
    let hits = vec![
        pb::IndexHit { id: 9, score: 0.5, metadata_json: String::new() },
        pb::IndexHit { id: 2, score: 0.5, metadata_json: String::new() },
        pb::IndexHit { id: 5, score: 0.8, metadata_json: String::new() },
    ];
    let orchestrator = harness(
        embed_ok(Arc::new(AtomicUsize::new(0))),
        index_hits(hits),
        Arc::new(MemoryStore::new()),
    );

    let response = orchestrator.search(request("q")).await.unwrap();
    let ids: Vec<i64> = response.results.iter().map(|h| h.id).collect();
    assert_eq!(ids, vec![5, 2, 9]);
}

#[tokio::test]
async fn malformed_hit_metadata_does_not_fail_the_request() {
    let hits = vec![
        pb::IndexHit { id: 1, score: 0.9, metadata_json: "{broken".to_string() },
        pb::IndexHit { id: 2, score: 0.8, metadata_json: r#"{"ok": true}"#.to_string() },
    ];
    let orchestrator = harness(
        embed_ok(Arc::new(AtomicUsize::new(0))),
        index_hits(hits),
        Arc::new(MemoryStore::new()),
    );

    let response = orchestrator.search(request("q")).await.unwrap();
    assert_eq!(response.results.len(), 2);
    assert!(response.results[0].metadata.is_empty());
    assert_eq!(response.results[1].metadata["ok"], serde_json::json!(true));
}

struct FailingStore;

#[async_trait::async_trait]
impl CacheStore for FailingStore {
    async fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
        Err(StoreError::Other("cache down".into()))
    }
    async fn set(&self, _key: &str, _value: String, _ttl: Duration) -> Result<(), StoreError> {
        Err(StoreError::Other("cache down".into()))
    }
    async fn delete(&self, _key: &str) -> Result<bool, StoreError> {
        Err(StoreError::Other("cache down".into()))
    }
    async fn ping(&self) -> Result<(), StoreError> {
        Err(StoreError::Other("cache down".into()))
    }
}

#[tokio::test]
async fn failing_cache_never_fails_the_request() {
    let embed_calls = Arc::new(AtomicUsize::new(0));
    let orchestrator = harness(
        embed_ok(Arc::clone(&embed_calls)),
        index_hits(sample_hits()),
        Arc::new(FailingStore),
    );

    let first = orchestrator.search(request("q")).await.unwrap();
    assert!(!first.cache_hit);
    assert_eq!(first.results.len(), 2);

    // Every request pays the backend cost, but none fail.
    let second = orchestrator.search(request("q")).await.unwrap();
    assert!(!second.cache_hit);
    assert_eq!(embed_calls.load(Ordering::SeqCst), 2);
}
