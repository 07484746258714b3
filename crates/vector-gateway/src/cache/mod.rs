//! Response cache: fingerprint derivation, JSON value codec, and
//! failure-tolerant reads and writes over a pluggable store.

mod store;

pub use store::{CacheStore, MemoryStore, RedisStore, StoreError};

use crate::model::SearchResponse;
use sha2::{Digest, Sha256};
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

/// Derives the 16-hex-character cache fingerprint for a canonicalized
/// request: the first 8 bytes of SHA-256 over
/// `lower(trim(query)) | topK | shardKey`.
///
/// Identical canonical tuples always produce identical fingerprints, so the
/// fingerprint is case- and surrounding-whitespace-insensitive on the query.
pub fn fingerprint(query: &str, top_k: u32, shard_key: &str) -> String {
    let canonical = format!("{}|{}|{}", query.trim().to_lowercase(), top_k, shard_key);
    let digest = Sha256::digest(canonical.as_bytes());
    digest[..8].iter().fold(String::with_capacity(16), |mut s, b| {
        let _ = write!(s, "{b:02x}");
        s
    })
}

/// Cache-aside substrate for assembled [`SearchResponse`]s.
///
/// Every operation tolerates backend failure: a failing `get` is a miss, a
/// failing `set` or `delete` is a logged no-op. Concurrent misses for the
/// same fingerprint are not coalesced; the duplicated embedding work is an
/// accepted cost of keeping the substrate simple.
pub struct ResponseCache {
    store: Arc<dyn CacheStore>,
    key_prefix: String,
    default_ttl: Duration,
}

impl ResponseCache {
    pub fn new(store: Arc<dyn CacheStore>, key_prefix: impl Into<String>, default_ttl: Duration) -> Self {
        Self {
            store,
            key_prefix: key_prefix.into(),
            default_ttl,
        }
    }

    fn key(&self, fingerprint: &str) -> String {
        format!("{}{}", self.key_prefix, fingerprint)
    }

    /// Reads a cached response. Returns `None` on miss, on decode failure,
    /// and on any store failure; never errors.
    pub async fn get(&self, fingerprint: &str) -> Option<SearchResponse> {
        let key = self.key(fingerprint);
        let payload = match self.store.get(&key).await {
            Ok(payload) => payload?,
            Err(e) => {
                tracing::warn!(key, error = %e, "cache read failed; treating as miss");
                return None;
            }
        };
        match serde_json::from_str(&payload) {
            Ok(response) => Some(response),
            Err(e) => {
                tracing::warn!(key, error = %e, "cached value failed to decode; treating as miss");
                None
            }
        }
    }

    /// Writes a response with the given TTL (default TTL when `None`).
    /// Store failures are logged and swallowed.
    pub async fn set(&self, fingerprint: &str, response: &SearchResponse, ttl: Option<Duration>) {
        let key = self.key(fingerprint);
        let payload = match serde_json::to_string(response) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(key, error = %e, "response failed to encode for cache");
                return;
            }
        };
        let ttl = ttl.unwrap_or(self.default_ttl);
        if let Err(e) = self.store.set(&key, payload, ttl).await {
            tracing::warn!(key, error = %e, "cache write failed");
        }
    }

    /// Removes a cached response; `false` when the key was absent or the
    /// store failed.
    pub async fn delete(&self, fingerprint: &str) -> bool {
        let key = self.key(fingerprint);
        match self.store.delete(&key).await {
            Ok(removed) => removed,
            Err(e) => {
                tracing::warn!(key, error = %e, "cache delete failed");
                false
            }
        }
    }

    /// Store liveness, for the readiness probe.
    pub async fn ping(&self) -> Result<(), StoreError> {
        self.store.ping().await
    }
}
