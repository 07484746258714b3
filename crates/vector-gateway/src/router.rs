//! Shard routing: maps a request hint onto the shard to query.

/// Routes requests to index shards.
///
/// A requested key is honored verbatim; otherwise the configured default
/// shard is used. `resolve_many` keeps the fan-out-shaped signature so
/// multi-shard routing can be added without touching the orchestrator call
/// site; it currently always returns a single shard.
#[derive(Debug, Clone)]
pub struct ShardRouter {
    default_shard_key: String,
}

impl ShardRouter {
    pub fn new(default_shard_key: impl Into<String>) -> Self {
        Self {
            default_shard_key: default_shard_key.into(),
        }
    }

    pub fn resolve_one(&self, requested: Option<&str>) -> String {
        match requested {
            Some(key) if !key.is_empty() => key.to_string(),
            _ => self.default_shard_key.clone(),
        }
    }

    pub fn resolve_many(&self, requested: Option<&str>) -> Vec<String> {
        vec![self.resolve_one(requested)]
    }
}
