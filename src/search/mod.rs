//! Search entry points
//!
//! [`HybridSearchOrchestrator`] owns the failure and caching policy that
//! ties the cache layer, parallel retrieval, fusion and reranking together.

mod orchestrator;
mod types;

pub use orchestrator::{HybridSearchOrchestrator, SearchSettings};
pub use types::{
    Degradation, LatencyBreakdown, MissingEmbeddingPolicy, RelatedRequest, SearchMeta,
    SearchOptions, SearchRequest, SearchResponse, Stage, DEFAULT_LIMIT,
};
