//! Gateway configuration.
//!
//! All knobs have defaults suitable for local development; deployments
//! override them through a JSON document (`--config`) or individual CLI
//! flags, which win over the file.

use serde::Deserialize;
use std::time::Duration;

/// Top-level configuration for the gateway process.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GatewayConfig {
    /// `host:port` of the sidecar process serving both the embedding and the
    /// index RPC services.
    pub sidecar_grpc_address: String,
    pub redis: RedisConfig,
    pub faiss: IndexConfig,
    pub rate_limit: RateLimitConfig,
    pub embedding: EmbeddingConfig,
    pub resilience: ResilienceConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            sidecar_grpc_address: "http://127.0.0.1:50051".to_string(),
            redis: RedisConfig::default(),
            faiss: IndexConfig::default(),
            rate_limit: RateLimitConfig::default(),
            embedding: EmbeddingConfig::default(),
            resilience: ResilienceConfig::default(),
        }
    }
}

/// Cache endpoint and key policy.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RedisConfig {
    pub connection_string: String,
    /// Prefix prepended to every cache key.
    pub key_prefix: String,
    /// Default TTL for cache writes.
    pub default_cache_ttl_seconds: u64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            connection_string: "redis://127.0.0.1:6379".to_string(),
            key_prefix: "vc:".to_string(),
            default_cache_ttl_seconds: 300,
        }
    }
}

impl RedisConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_cache_ttl_seconds)
    }
}

/// Defaults applied when a search request leaves tuning fields unset.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IndexConfig {
    pub default_top_k: u32,
    pub default_nprobe: u32,
    pub default_shard_key: String,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            default_top_k: 10,
            default_nprobe: 10,
            default_shard_key: "nyc_taxi_2023".to_string(),
        }
    }
}

/// Fixed-window admission limiter.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RateLimitConfig {
    pub permit_limit: usize,
    pub window_seconds: u64,
    pub queue_limit: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            permit_limit: 100,
            window_seconds: 10,
            queue_limit: 50,
        }
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_seconds)
    }
}

/// Embedding model pinning.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EmbeddingConfig {
    /// Model name sent with every embedding RPC.
    pub model_name: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model_name: "all-MiniLM-L6-v2".to_string(),
        }
    }
}

/// Outer wall-clock limits for the per-backend resilience stacks.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResilienceConfig {
    pub embedding_timeout_secs: u64,
    pub index_timeout_secs: u64,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            embedding_timeout_secs: 10,
            index_timeout_secs: 5,
        }
    }
}

impl ResilienceConfig {
    pub fn embedding_timeout(&self) -> Duration {
        Duration::from_secs(self.embedding_timeout_secs)
    }

    pub fn index_timeout(&self) -> Duration {
        Duration::from_secs(self.index_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = GatewayConfig::default();
        assert_eq!(config.redis.key_prefix, "vc:");
        assert_eq!(config.redis.default_cache_ttl_seconds, 300);
        assert_eq!(config.faiss.default_top_k, 10);
        assert_eq!(config.faiss.default_nprobe, 10);
        assert_eq!(config.rate_limit.permit_limit, 100);
        assert_eq!(config.rate_limit.window_seconds, 10);
        assert_eq!(config.rate_limit.queue_limit, 50);
    }

    #[test]
    fn deserializes_partial_camel_case_document() {
        let config: GatewayConfig = serde_json::from_str(
            r#"{
                "sidecarGrpcAddress": "http://sidecar:50051",
                "redis": {"keyPrefix": "search:", "defaultCacheTtlSeconds": 60},
                "faiss": {"defaultShardKey": "nyc_taxi_2022"},
                "rateLimit": {"permitLimit": 5}
            }"#,
        )
        .unwrap();

        assert_eq!(config.sidecar_grpc_address, "http://sidecar:50051");
        assert_eq!(config.redis.key_prefix, "search:");
        assert_eq!(config.redis.default_cache_ttl_seconds, 60);
        assert_eq!(config.faiss.default_shard_key, "nyc_taxi_2022");
        assert_eq!(config.faiss.default_top_k, 10);
        assert_eq!(config.rate_limit.permit_limit, 5);
        assert_eq!(config.rate_limit.queue_limit, 50);
    }
}
