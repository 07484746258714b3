//! Resilient client for the embedding backend.

use super::{backend_breaker, resilient, BackendError, ResilientService};
use crate::pb;
use metrics::histogram;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tonic::transport::Channel;
use tower::{Service, ServiceExt};
use tracing::Instrument;
use vector_gateway_resilience::CircuitHandle;

/// A query embedding produced by the backend model.
#[derive(Debug, Clone)]
pub struct Embedding {
    pub vector: Vec<f32>,
    pub dimension: i32,
    pub model_name: String,
    pub latency_ms: f64,
}

/// Typed wrapper over the `GenerateEmbedding` RPC.
///
/// Every call goes through the resilience stack with a 10 s outer limit by
/// default. There is no degraded path: an embedder that stays unreachable
/// fails the request.
pub struct EmbeddingClient {
    svc: Mutex<ResilientService<pb::EmbedRequest, pb::EmbedReply>>,
    model_name: String,
    breaker: CircuitHandle,
}

impl EmbeddingClient {
    /// Production constructor over the shared sidecar channel.
    pub fn from_channel(channel: Channel, model_name: String, limit: Duration) -> Self {
        let grpc = pb::EmbeddingServiceClient::new(channel);
        let base = tower::service_fn(move |req: pb::EmbedRequest| {
            let mut grpc = grpc.clone();
            async move {
                grpc.generate_embedding(req)
                    .await
                    .map(tonic::Response::into_inner)
                    .map_err(BackendError::from)
            }
        });
        Self::new(base, model_name, limit)
    }

    /// Wraps any base call path; tests inject `service_fn` doubles here.
    pub fn new<S>(base: S, model_name: String, limit: Duration) -> Self
    where
        S: Service<pb::EmbedRequest, Response = pb::EmbedReply, Error = BackendError>
            + Clone
            + Send
            + 'static,
        S::Future: Send + 'static,
    {
        let breaker = backend_breaker("embedding");
        let handle = breaker.handle();
        Self {
            svc: Mutex::new(resilient(base, "embedding", limit, &breaker)),
            model_name,
            breaker: handle,
        }
    }

    /// Breaker state, for readiness reporting.
    pub fn breaker(&self) -> &CircuitHandle {
        &self.breaker
    }

    /// Embeds the query text with the pinned model.
    ///
    /// Cancellation propagates: dropping the returned future drops the
    /// in-flight RPC.
    pub async fn embed(&self, text: &str) -> Result<Embedding, BackendError> {
        let span = tracing::info_span!(
            "embedding",
            embedding.text_length = text.chars().count(),
            embedding.model = %self.model_name,
            embedding.dimension = tracing::field::Empty,
        );

        let mut svc = self.svc.lock().unwrap().clone();
        let request = pb::EmbedRequest {
            text: text.to_string(),
            model_name: self.model_name.clone(),
        };

        async move {
            let start = Instant::now();
            let reply = svc.ready().await?.call(request).await?;
            histogram!("embedding_duration_ms").record(start.elapsed().as_secs_f64() * 1000.0);

            tracing::Span::current().record("embedding.dimension", reply.dimension);
            if reply.dimension >= 0 && reply.vector.len() != reply.dimension as usize {
                tracing::warn!(
                    declared = reply.dimension,
                    actual = reply.vector.len(),
                    "embedding length disagrees with declared dimension"
                );
            }

            Ok(Embedding {
                vector: reply.vector,
                dimension: reply.dimension,
                model_name: reply.model_name,
                latency_ms: reply.latency_ms,
            })
        }
        .instrument(span)
        .await
    }
}
