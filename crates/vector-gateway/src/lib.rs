//! Semantic search gateway.
//!
//! An HTTP service fronting a large vector corpus: it embeds natural-language
//! queries through an embedding sidecar, runs approximate nearest-neighbor
//! search against a sharded index sidecar, caches assembled responses, and
//! returns ranked hits with metadata.
//!
//! The request pipeline:
//!
//! ```text
//! HTTP request
//!   -> admission (rate limit, validation, correlation id)
//!   -> orchestrator
//!        cache lookup -> shard routing -> embed -> index search -> assemble
//!        -> fire-and-forget cache write
//!   -> response
//! ```
//!
//! Both backend calls go through a resilience stack (wall-clock limit,
//! circuit breaker, retry) from [`vector_gateway_resilience`]; the index
//! path degrades to an empty result set when its breaker is open, while an
//! unavailable embedder fails the request.

pub mod admission;
pub mod backend;
pub mod cache;
pub mod config;
pub mod error;
pub mod health;
pub mod http;
pub mod model;
pub mod observability;
pub mod orchestrator;
pub mod pb;
pub mod router;

pub use config::GatewayConfig;
pub use error::GatewayError;
pub use orchestrator::SearchOrchestrator;
