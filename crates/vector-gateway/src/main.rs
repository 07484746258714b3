//! Gateway binary: wires configuration, clients, cache, and the HTTP server.

use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;
use vector_gateway::admission::FixedWindowLimiter;
use vector_gateway::backend::{EmbeddingClient, IndexClient};
use vector_gateway::cache::{CacheStore, MemoryStore, RedisStore, ResponseCache};
use vector_gateway::http::{app, AppState};
use vector_gateway::router::ShardRouter;
use vector_gateway::{observability, pb, GatewayConfig, SearchOrchestrator};

#[derive(Debug, Parser)]
#[command(name = "vector-gateway", about = "Semantic search gateway")]
struct Args {
    /// Address the HTTP server binds to.
    #[arg(long, default_value = "0.0.0.0:8080")]
    listen: SocketAddr,

    /// Optional JSON configuration document.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Overrides `sidecarGrpcAddress`.
    #[arg(long)]
    grpc_addr: Option<String>,

    /// Overrides `redis.connectionString`.
    #[arg(long)]
    redis_url: Option<String>,
}

fn load_config(args: &Args) -> Result<GatewayConfig, Box<dyn std::error::Error>> {
    let mut config = match &args.config {
        Some(path) => serde_json::from_reader(std::fs::File::open(path)?)?,
        None => GatewayConfig::default(),
    };
    if let Some(addr) = &args.grpc_addr {
        config.sidecar_grpc_address = addr.clone();
    }
    if let Some(url) = &args.redis_url {
        config.redis.connection_string = url.clone();
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = Arc::new(load_config(&args)?);

    let metrics_handle = PrometheusBuilder::new().install_recorder()?;
    observability::describe_metrics();

    let channel = pb::connect_channel(&config.sidecar_grpc_address)?;
    let embedding = Arc::new(EmbeddingClient::from_channel(
        channel.clone(),
        config.embedding.model_name.clone(),
        config.resilience.embedding_timeout(),
    ));
    let index = Arc::new(IndexClient::from_channel(
        channel,
        config.resilience.index_timeout(),
    ));

    let store: Arc<dyn CacheStore> = match RedisStore::connect(&config.redis.connection_string)
        .await
    {
        Ok(store) => Arc::new(store),
        Err(e) => {
            tracing::warn!(
                error = %e,
                "redis unreachable; falling back to the in-process cache store"
            );
            Arc::new(MemoryStore::new())
        }
    };
    let cache = Arc::new(ResponseCache::new(
        store,
        config.redis.key_prefix.clone(),
        config.redis.default_ttl(),
    ));

    let orchestrator = Arc::new(SearchOrchestrator::new(
        Arc::clone(&cache),
        ShardRouter::new(config.faiss.default_shard_key.clone()),
        embedding,
        Arc::clone(&index),
    ));
    let limiter = Arc::new(FixedWindowLimiter::new(&config.rate_limit));

    let state = AppState {
        config: Arc::clone(&config),
        orchestrator,
        cache,
        index,
        limiter,
        metrics: Some(metrics_handle),
    };

    let listener = TcpListener::bind(args.listen).await?;
    tracing::info!(listen = %args.listen, sidecar = %config.sidecar_grpc_address, "gateway listening");

    axum::serve(listener, app(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down");
        })
        .await?;

    Ok(())
}
