//! Hybrid retrieval building blocks
//!
//! Semantic and keyword branches run concurrently through the
//! [`ParallelRetriever`], are fused with Reciprocal Rank Fusion and then
//! optionally reordered by a [`Reranker`].

mod candidate;
mod deduplication;
mod fusion;
mod index;
mod parallel;
mod reranker;

pub use candidate::{assign_ranks, Candidate, Source};
pub use deduplication::deduplicate_candidates;
pub use fusion::{reciprocal_rank_fusion, FusionConfig, FusionError};
pub use index::{Branch, KeywordIndex, RetrievalError, SemanticIndex};
pub use parallel::{BranchOutcome, ParallelRetriever, RetrievalOutcome};
pub use reranker::{
    CrossEncoderScorer, NoopScorer, RelevanceScorer, RerankError, RerankOutcome, Reranker,
};
