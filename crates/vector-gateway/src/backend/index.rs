//! Resilient client for the ANN index backend.

use super::{backend_breaker, resilient, BackendError, ResilientService};
use crate::pb;
use std::sync::Mutex;
use std::time::Duration;
use tonic::transport::Channel;
use tower::util::BoxCloneService;
use tower::{Service, ServiceExt};
use vector_gateway_resilience::CircuitHandle;

/// Hits returned by one index search.
#[derive(Debug, Clone)]
pub struct IndexSearchResults {
    pub hits: Vec<pb::IndexHit>,
    pub shard_key: String,
    pub search_latency_ms: f64,
}

/// Outcome of an index search through the resilience stack.
#[derive(Debug, Clone)]
pub enum IndexSearchOutcome {
    Results(IndexSearchResults),
    /// The breaker is open; the caller serves an empty result set instead of
    /// failing the request.
    Degraded,
}

/// Typed wrapper over the `IndexService` RPCs.
///
/// `search` runs through the resilience stack with a 5 s outer limit by
/// default and degrades on an open breaker. The info and reload
/// pass-throughs used by administrative endpoints and the readiness probe
/// skip the stack; their callers bound them with their own deadlines.
pub struct IndexClient {
    search_svc: Mutex<ResilientService<pb::SearchIndexRequest, pb::SearchIndexReply>>,
    info_svc: Mutex<BoxCloneService<pb::IndexInfoRequest, pb::IndexInfoReply, BackendError>>,
    reload_svc: Mutex<BoxCloneService<pb::ReloadRequest, pb::ReloadReply, BackendError>>,
    breaker: CircuitHandle,
}

impl IndexClient {
    /// Production constructor over the shared sidecar channel.
    pub fn from_channel(channel: Channel, limit: Duration) -> Self {
        let search_grpc = pb::IndexServiceClient::new(channel);
        let info_grpc = search_grpc.clone();
        let reload_grpc = search_grpc.clone();

        Self::new(
            tower::service_fn(move |req: pb::SearchIndexRequest| {
                let mut grpc = search_grpc.clone();
                async move {
                    grpc.search_index(req)
                        .await
                        .map(tonic::Response::into_inner)
                        .map_err(BackendError::from)
                }
            }),
            tower::service_fn(move |req: pb::IndexInfoRequest| {
                let mut grpc = info_grpc.clone();
                async move {
                    grpc.get_index_info(req)
                        .await
                        .map(tonic::Response::into_inner)
                        .map_err(BackendError::from)
                }
            }),
            tower::service_fn(move |req: pb::ReloadRequest| {
                let mut grpc = reload_grpc.clone();
                async move {
                    grpc.reload_index(req)
                        .await
                        .map(tonic::Response::into_inner)
                        .map_err(BackendError::from)
                }
            }),
            limit,
        )
    }

    /// Wraps any base call paths; tests inject `service_fn` doubles here.
    pub fn new<S, I, R>(search: S, info: I, reload: R, limit: Duration) -> Self
    where
        S: Service<pb::SearchIndexRequest, Response = pb::SearchIndexReply, Error = BackendError>
            + Clone
            + Send
            + 'static,
        S::Future: Send + 'static,
        I: Service<pb::IndexInfoRequest, Response = pb::IndexInfoReply, Error = BackendError>
            + Clone
            + Send
            + 'static,
        I::Future: Send + 'static,
        R: Service<pb::ReloadRequest, Response = pb::ReloadReply, Error = BackendError>
            + Clone
            + Send
            + 'static,
        R::Future: Send + 'static,
    {
        let breaker = backend_breaker("index");
        let handle = breaker.handle();
        Self {
            search_svc: Mutex::new(resilient(search, "index", limit, &breaker)),
            info_svc: Mutex::new(BoxCloneService::new(info)),
            reload_svc: Mutex::new(BoxCloneService::new(reload)),
            breaker: handle,
        }
    }

    /// Breaker state, for readiness reporting.
    pub fn breaker(&self) -> &CircuitHandle {
        &self.breaker
    }

    /// Searches one shard, converting an open breaker into
    /// [`IndexSearchOutcome::Degraded`].
    pub async fn search(
        &self,
        vector: Vec<f32>,
        top_k: u32,
        shard_key: &str,
        nprobe: u32,
    ) -> Result<IndexSearchOutcome, BackendError> {
        let mut svc = self.search_svc.lock().unwrap().clone();
        let request = pb::SearchIndexRequest {
            vector,
            top_k,
            shard_key: shard_key.to_string(),
            nprobe,
        };

        match svc.ready().await {
            Err(e) => Err(e),
            Ok(ready) => match ready.call(request).await {
                Ok(reply) => Ok(IndexSearchOutcome::Results(IndexSearchResults {
                    hits: reply.results,
                    shard_key: reply.shard_key,
                    search_latency_ms: reply.search_latency_ms,
                })),
                Err(BackendError::CircuitOpen) => {
                    tracing::warn!(shard_key, "index breaker open; serving degraded response");
                    Ok(IndexSearchOutcome::Degraded)
                }
                Err(e) => Err(e),
            },
        }
    }

    /// Shard descriptors, optionally narrowed to one shard.
    pub async fn info(&self, shard_key: Option<&str>) -> Result<Vec<pb::ShardInfo>, BackendError> {
        let mut svc = self.info_svc.lock().unwrap().clone();
        let request = pb::IndexInfoRequest {
            shard_key: shard_key.unwrap_or_default().to_string(),
        };
        let reply = svc.ready().await?.call(request).await?;
        Ok(reply.shards)
    }

    /// Triggers a backend reload, optionally narrowed to one shard.
    pub async fn reload(&self, shard_key: Option<&str>) -> Result<pb::ReloadReply, BackendError> {
        let mut svc = self.reload_svc.lock().unwrap().clone();
        let request = pb::ReloadRequest {
            shard_key: shard_key.unwrap_or_default().to_string(),
        };
        svc.ready().await?.call(request).await
    }
}
