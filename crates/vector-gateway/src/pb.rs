//! Wire types and unary clients for the sidecar RPC services
//! (`vectorgateway.v1`), laid out in the shape `tonic` code generation
//! produces so the schema stays readable next to the clients.
//!
//! Both services are served by the same sidecar process over one multiplexed
//! HTTP/2 channel; see [`connect_channel`].

use std::time::Duration;
use tonic::transport::{Channel, Endpoint};

/// Builds the shared lazy channel to the sidecar with HTTP/2 keep-alive
/// (ping every 60 s, timeout 30 s, pinging while idle) so both clients can
/// multiplex concurrent streams over it.
pub fn connect_channel(address: &str) -> Result<Channel, tonic::transport::Error> {
    let endpoint = Endpoint::from_shared(address.to_string())?
        .http2_keep_alive_interval(Duration::from_secs(60))
        .keep_alive_timeout(Duration::from_secs(30))
        .keep_alive_while_idle(true)
        .tcp_keepalive(Some(Duration::from_secs(300)));
    Ok(endpoint.connect_lazy())
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct EmbedRequest {
    #[prost(string, tag = "1")]
    pub text: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub model_name: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct EmbedReply {
    #[prost(float, repeated, tag = "1")]
    pub vector: ::prost::alloc::vec::Vec<f32>,
    #[prost(int32, tag = "2")]
    pub dimension: i32,
    #[prost(string, tag = "3")]
    pub model_name: ::prost::alloc::string::String,
    #[prost(double, tag = "4")]
    pub latency_ms: f64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SearchIndexRequest {
    #[prost(float, repeated, tag = "1")]
    pub vector: ::prost::alloc::vec::Vec<f32>,
    #[prost(uint32, tag = "2")]
    pub top_k: u32,
    #[prost(string, tag = "3")]
    pub shard_key: ::prost::alloc::string::String,
    #[prost(uint32, tag = "4")]
    pub nprobe: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct IndexHit {
    #[prost(int64, tag = "1")]
    pub id: i64,
    #[prost(float, tag = "2")]
    pub score: f32,
    /// Serialized JSON object; empty when the shard carries no metadata.
    #[prost(string, tag = "3")]
    pub metadata_json: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SearchIndexReply {
    #[prost(message, repeated, tag = "1")]
    pub results: ::prost::alloc::vec::Vec<IndexHit>,
    #[prost(string, tag = "2")]
    pub shard_key: ::prost::alloc::string::String,
    #[prost(double, tag = "3")]
    pub search_latency_ms: f64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct IndexInfoRequest {
    /// Empty selects every shard.
    #[prost(string, tag = "1")]
    pub shard_key: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ShardInfo {
    #[prost(string, tag = "1")]
    pub shard_key: ::prost::alloc::string::String,
    #[prost(int64, tag = "2")]
    pub total_vectors: i64,
    #[prost(int32, tag = "3")]
    pub dimension: i32,
    #[prost(string, tag = "4")]
    pub index_type: ::prost::alloc::string::String,
    #[prost(bool, tag = "5")]
    pub is_trained: bool,
    #[prost(int64, tag = "6")]
    pub index_size_bytes: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct IndexInfoReply {
    #[prost(message, repeated, tag = "1")]
    pub shards: ::prost::alloc::vec::Vec<ShardInfo>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ReloadRequest {
    /// Empty reloads every shard.
    #[prost(string, tag = "1")]
    pub shard_key: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ReloadReply {
    #[prost(bool, tag = "1")]
    pub success: bool,
    #[prost(string, repeated, tag = "2")]
    pub reloaded_shards: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
    #[prost(string, tag = "3")]
    pub message: ::prost::alloc::string::String,
}

/// Unary client for `vectorgateway.v1.EmbeddingService`.
#[derive(Debug, Clone)]
pub struct EmbeddingServiceClient {
    inner: tonic::client::Grpc<Channel>,
}

impl EmbeddingServiceClient {
    pub fn new(channel: Channel) -> Self {
        Self {
            inner: tonic::client::Grpc::new(channel),
        }
    }

    pub async fn generate_embedding(
        &mut self,
        request: impl tonic::IntoRequest<EmbedRequest>,
    ) -> Result<tonic::Response<EmbedReply>, tonic::Status> {
        self.inner
            .ready()
            .await
            .map_err(|e| tonic::Status::unknown(format!("service was not ready: {e}")))?;
        let codec: tonic_prost::ProstCodec<EmbedRequest, EmbedReply> =
            tonic_prost::ProstCodec::default();
        let path = http::uri::PathAndQuery::from_static(
            "/vectorgateway.v1.EmbeddingService/GenerateEmbedding",
        );
        self.inner.unary(request.into_request(), path, codec).await
    }
}

/// Unary client for `vectorgateway.v1.IndexService`.
#[derive(Debug, Clone)]
pub struct IndexServiceClient {
    inner: tonic::client::Grpc<Channel>,
}

impl IndexServiceClient {
    pub fn new(channel: Channel) -> Self {
        Self {
            inner: tonic::client::Grpc::new(channel),
        }
    }

    pub async fn search_index(
        &mut self,
        request: impl tonic::IntoRequest<SearchIndexRequest>,
    ) -> Result<tonic::Response<SearchIndexReply>, tonic::Status> {
        self.inner
            .ready()
            .await
            .map_err(|e| tonic::Status::unknown(format!("service was not ready: {e}")))?;
        let codec: tonic_prost::ProstCodec<SearchIndexRequest, SearchIndexReply> =
            tonic_prost::ProstCodec::default();
        let path =
            http::uri::PathAndQuery::from_static("/vectorgateway.v1.IndexService/SearchIndex");
        self.inner.unary(request.into_request(), path, codec).await
    }

    pub async fn get_index_info(
        &mut self,
        request: impl tonic::IntoRequest<IndexInfoRequest>,
    ) -> Result<tonic::Response<IndexInfoReply>, tonic::Status> {
        self.inner
            .ready()
            .await
            .map_err(|e| tonic::Status::unknown(format!("service was not ready: {e}")))?;
        let codec: tonic_prost::ProstCodec<IndexInfoRequest, IndexInfoReply> =
            tonic_prost::ProstCodec::default();
        let path =
            http::uri::PathAndQuery::from_static("/vectorgateway.v1.IndexService/GetIndexInfo");
        self.inner.unary(request.into_request(), path, codec).await
    }

    pub async fn reload_index(
        &mut self,
        request: impl tonic::IntoRequest<ReloadRequest>,
    ) -> Result<tonic::Response<ReloadReply>, tonic::Status> {
        self.inner
            .ready()
            .await
            .map_err(|e| tonic::Status::unknown(format!("service was not ready: {e}")))?;
        let codec: tonic_prost::ProstCodec<ReloadRequest, ReloadReply> =
            tonic_prost::ProstCodec::default();
        let path =
            http::uri::PathAndQuery::from_static("/vectorgateway.v1.IndexService/ReloadIndex");
        self.inner.unary(request.into_request(), path, codec).await
    }
}
