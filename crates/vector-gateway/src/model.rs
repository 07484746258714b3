//! Request and response types for the search API.

use crate::config::IndexConfig;
use crate::error::GatewayError;
use serde::{Deserialize, Serialize};

/// Maximum query length in characters, after trimming.
pub const MAX_QUERY_CHARS: usize = 2000;
/// Inclusive bounds for `topK`.
pub const TOP_K_RANGE: std::ops::RangeInclusive<u32> = 1..=100;
/// Inclusive bounds for `nprobe`.
pub const NPROBE_RANGE: std::ops::RangeInclusive<u32> = 1..=256;

/// Wire shape of `POST /api/v1/search`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequestBody {
    #[serde(default)]
    pub query: String,
    pub top_k: Option<u32>,
    pub shard_key: Option<String>,
    pub nprobe: Option<u32>,
}

/// A validated search request. Field constraints hold by construction.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    /// Query text as received, for the embedding backend.
    pub query: String,
    pub top_k: u32,
    pub shard_key: Option<String>,
    pub nprobe: u32,
}

impl SearchRequest {
    /// Validates the wire body against the field constraints, filling
    /// defaults from configuration. Runs before any other work.
    pub fn validate(body: SearchRequestBody, defaults: &IndexConfig) -> Result<Self, GatewayError> {
        let trimmed = body.query.trim();
        if trimmed.is_empty() {
            return Err(GatewayError::validation("query", "query must not be empty"));
        }
        if trimmed.chars().count() > MAX_QUERY_CHARS {
            return Err(GatewayError::validation(
                "query",
                format!("query must be at most {MAX_QUERY_CHARS} characters"),
            ));
        }

        let top_k = body.top_k.unwrap_or(defaults.default_top_k);
        if !TOP_K_RANGE.contains(&top_k) {
            return Err(GatewayError::validation(
                "topK",
                format!(
                    "topK must be between {} and {}",
                    TOP_K_RANGE.start(),
                    TOP_K_RANGE.end()
                ),
            ));
        }

        let nprobe = body.nprobe.unwrap_or(defaults.default_nprobe);
        if !NPROBE_RANGE.contains(&nprobe) {
            return Err(GatewayError::validation(
                "nprobe",
                format!(
                    "nprobe must be between {} and {}",
                    NPROBE_RANGE.start(),
                    NPROBE_RANGE.end()
                ),
            ));
        }

        let shard_key = body
            .shard_key
            .and_then(|s| if s.trim().is_empty() { None } else { Some(s) });

        Ok(Self {
            query: body.query,
            top_k,
            shard_key,
            nprobe,
        })
    }
}

/// One ranked result from the index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    pub id: i64,
    pub score: f32,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// Response of `POST /api/v1/search`.
///
/// On a cache hit `search_latency_ms` keeps the value the index backend
/// reported when the entry was populated, while `total_latency_ms` always
/// reflects the current request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    pub results: Vec<SearchHit>,
    pub shard_key: String,
    pub search_latency_ms: f64,
    pub total_latency_ms: f64,
    pub cache_hit: bool,
    pub query_hash: String,
}

/// Orders hits by descending score, ties broken by ascending id.
pub fn rank_hits(hits: &mut [SearchHit]) {
    hits.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.id.cmp(&b.id))
    });
}

/// Descriptor of one index shard, read-only to the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShardDescriptor {
    pub shard_key: String,
    pub total_vectors: i64,
    pub dimension: i32,
    pub index_type: String,
    pub is_trained: bool,
    pub index_size_bytes: i64,
}

/// Result of an administrative index reload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReloadResult {
    pub success: bool,
    pub reloaded_shards: Vec<String>,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> IndexConfig {
        IndexConfig::default()
    }

    fn body(query: &str) -> SearchRequestBody {
        SearchRequestBody {
            query: query.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn fills_defaults() {
        let req = SearchRequest::validate(body("taxi ride"), &defaults()).unwrap();
        assert_eq!(req.top_k, 10);
        assert_eq!(req.nprobe, 10);
        assert_eq!(req.shard_key, None);
        assert_eq!(req.query, "taxi ride");
    }

    #[test]
    fn rejects_empty_and_whitespace_queries() {
        for q in ["", "   ", "\t\n"] {
            let err = SearchRequest::validate(body(q), &defaults()).unwrap_err();
            assert!(matches!(err, GatewayError::Validation { ref field, .. } if field == "query"));
        }
    }

    #[test]
    fn rejects_overlong_query() {
        let q = "x".repeat(MAX_QUERY_CHARS + 1);
        let err = SearchRequest::validate(body(&q), &defaults()).unwrap_err();
        assert!(matches!(err, GatewayError::Validation { ref field, .. } if field == "query"));
    }

    #[test]
    fn accepts_boundary_query_length() {
        let q = "x".repeat(MAX_QUERY_CHARS);
        assert!(SearchRequest::validate(body(&q), &defaults()).is_ok());
    }

    #[test]
    fn enforces_top_k_bounds() {
        for top_k in [0, 101] {
            let mut b = body("q");
            b.top_k = Some(top_k);
            let err = SearchRequest::validate(b, &defaults()).unwrap_err();
            assert!(matches!(err, GatewayError::Validation { ref field, .. } if field == "topK"));
        }
        let mut b = body("q");
        b.top_k = Some(100);
        assert!(SearchRequest::validate(b, &defaults()).is_ok());
    }

    #[test]
    fn enforces_nprobe_bounds() {
        for nprobe in [0, 257] {
            let mut b = body("q");
            b.nprobe = Some(nprobe);
            let err = SearchRequest::validate(b, &defaults()).unwrap_err();
            assert!(matches!(err, GatewayError::Validation { ref field, .. } if field == "nprobe"));
        }
    }

    #[test]
    fn blank_shard_key_falls_back_to_default_routing() {
        let mut b = body("q");
        b.shard_key = Some("  ".to_string());
        let req = SearchRequest::validate(b, &defaults()).unwrap();
        assert_eq!(req.shard_key, None);
    }

    #[test]
    fn ranks_by_score_then_id() {
        let mut hits = vec![
            SearchHit { id: 7, score: 0.5, metadata: Default::default() },
            SearchHit { id: 3, score: 0.9, metadata: Default::default() },
            SearchHit { id: 1, score: 0.5, metadata: Default::default() },
        ];
        rank_hits(&mut hits);
        let ids: Vec<i64> = hits.iter().map(|h| h.id).collect();
        assert_eq!(ids, vec![3, 1, 7]);
    }

    #[test]
    fn response_round_trips_through_json() {
        let response = SearchResponse {
            results: vec![SearchHit { id: 42, score: 0.8, metadata: Default::default() }],
            shard_key: "nyc_taxi_2023".to_string(),
            search_latency_ms: 12.5,
            total_latency_ms: 20.0,
            cache_hit: false,
            query_hash: "deadbeefdeadbeef".to_string(),
        };
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"shardKey\""));
        assert!(json.contains("\"cacheHit\""));
        let back: SearchResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(back.results, response.results);
        assert_eq!(back.query_hash, response.query_hash);
    }
}
