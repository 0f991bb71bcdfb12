//! Hybrid search - retrieval and reranking pipeline
//!
//! Answers a query by running semantic and keyword retrieval concurrently,
//! merging the two ranked lists with Reciprocal Rank Fusion, refining the
//! top of the merged list with a reranker, and serving repeat traffic from a
//! two-tier cache.

pub mod cache;
pub mod cli;
pub mod config;
pub mod embedding;
pub mod error;
pub mod metrics;
pub mod retrieval;
pub mod search;

pub use error::{HybridError, Result};
pub use metrics::{MetricsCollector, SearchMetrics};
pub use retrieval::{Candidate, Source};
pub use search::{HybridSearchOrchestrator, SearchRequest, SearchResponse};
