//! Request and response shapes for the search entry points

use crate::error::{HybridError, Result};
use crate::retrieval::Candidate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Result limit for requests that do not set one
pub const DEFAULT_LIMIT: usize = 12;

/// A hybrid search request
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub query: String,
    /// Opaque partition key, passed through to indexes and cache keys
    pub tenant_id: String,
    /// Precomputed query embedding; empty means "not supplied"
    pub embedding: Vec<f64>,
    pub limit: usize,
    pub use_cache: bool,
    /// Overrides the configured L1 TTL for this request's cache write
    pub cache_ttl: Option<Duration>,
    pub enable_rerank: bool,
    pub options: SearchOptions,
}

impl SearchRequest {
    /// Request with caching and reranking on and [`DEFAULT_LIMIT`] results
    pub fn new(query: impl Into<String>, tenant_id: impl Into<String>, embedding: Vec<f64>) -> Self {
        Self {
            query: query.into(),
            tenant_id: tenant_id.into(),
            embedding,
            limit: DEFAULT_LIMIT,
            use_cache: true,
            cache_ttl: None,
            enable_rerank: true,
            options: SearchOptions::default(),
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_cache(mut self, use_cache: bool) -> Self {
        self.use_cache = use_cache;
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    pub fn with_rerank(mut self, enable_rerank: bool) -> Self {
        self.enable_rerank = enable_rerank;
        self
    }

    pub fn with_options(mut self, options: SearchOptions) -> Self {
        self.options = options;
        self
    }
}

/// Optional result filters
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchOptions {
    /// Drop final results scoring below this
    pub min_score: Option<f64>,
    /// Documents removed from both branch lists before fusion
    pub exclude_ids: Vec<String>,
}

impl SearchOptions {
    pub fn is_empty(&self) -> bool {
        self.min_score.is_none() && self.exclude_ids.is_empty()
    }
}

/// Sidebar / "related documents" request
#[derive(Debug, Clone)]
pub struct RelatedRequest {
    pub tenant_id: String,
    /// Embedding of the document being viewed
    pub embedding: Vec<f64>,
    /// Usually the document being viewed
    pub exclude_id: Option<String>,
    pub limit: usize,
}

impl RelatedRequest {
    pub fn new(tenant_id: impl Into<String>, embedding: Vec<f64>, limit: usize) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            embedding,
            exclude_id: None,
            limit,
        }
    }

    pub fn excluding(mut self, id: impl Into<String>) -> Self {
        self.exclude_id = Some(id.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<Candidate>,
    pub meta: SearchMeta,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchMeta {
    pub total_results: usize,
    pub cache_hit: bool,
    pub latency: LatencyBreakdown,
    /// Candidates the semantic branch contributed (0 on a cache hit)
    pub semantic_count: usize,
    /// Candidates the keyword branch contributed (0 on a cache hit)
    pub keyword_count: usize,
    pub degradations: Vec<Degradation>,
}

impl SearchMeta {
    pub fn is_degraded(&self) -> bool {
        !self.degradations.is_empty()
    }
}

/// Per-stage wall-clock time in milliseconds
///
/// Semantic and keyword run concurrently, so `total_ms` is at least
/// `cache_ms + max(semantic_ms, keyword_ms) + rrf_ms + rerank_ms`, not the
/// sum of every field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencyBreakdown {
    pub cache_ms: f64,
    pub semantic_ms: f64,
    pub keyword_ms: f64,
    pub rrf_ms: f64,
    pub rerank_ms: f64,
    pub total_ms: f64,
}

/// A stage that did not run as intended; the response is still usable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Degradation {
    SemanticBranchFailed,
    KeywordBranchFailed,
    /// Both branches failed; results are empty
    TotalRetrievalFailure,
    /// Results are in fused order because the scorer failed
    RerankFallback,
    /// The request budget cut at least one stage short
    BudgetExceeded,
    /// No embedding was supplied and the keyword-only policy is active
    KeywordOnly,
}

impl fmt::Display for Degradation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Degradation::SemanticBranchFailed => "semantic_branch_failed",
            Degradation::KeywordBranchFailed => "keyword_branch_failed",
            Degradation::TotalRetrievalFailure => "total_retrieval_failure",
            Degradation::RerankFallback => "rerank_fallback",
            Degradation::BudgetExceeded => "budget_exceeded",
            Degradation::KeywordOnly => "keyword_only",
        };
        f.write_str(name)
    }
}

/// What to do when a request arrives without an embedding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MissingEmbeddingPolicy {
    /// Fail with [`HybridError::EmbeddingMissing`]
    #[default]
    Reject,
    /// Run the keyword branch alone and flag the response
    KeywordOnly,
}

impl FromStr for MissingEmbeddingPolicy {
    type Err = HybridError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "reject" => Ok(Self::Reject),
            "keyword_only" => Ok(Self::KeywordOnly),
            other => Err(HybridError::InvalidConfigValue {
                path: "pipeline.missing_embedding".to_string(),
                message: format!("Unknown policy '{}' (expected reject or keyword_only)", other),
            }),
        }
    }
}

/// Pipeline stages, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    CacheCheck,
    Retrieve,
    Merge,
    Rerank,
    CacheWrite,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::CacheCheck => "cache_check",
            Stage::Retrieve => "retrieve",
            Stage::Merge => "merge",
            Stage::Rerank => "rerank",
            Stage::CacheWrite => "cache_write",
            Stage::Done => "done",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_parsing() {
        assert_eq!(
            "reject".parse::<MissingEmbeddingPolicy>().unwrap(),
            MissingEmbeddingPolicy::Reject
        );
        assert_eq!(
            "keyword_only".parse::<MissingEmbeddingPolicy>().unwrap(),
            MissingEmbeddingPolicy::KeywordOnly
        );
        assert!("fallback".parse::<MissingEmbeddingPolicy>().is_err());
    }

    #[test]
    fn test_degradation_serializes_snake_case() {
        let json = serde_json::to_string(&Degradation::RerankFallback).unwrap();
        assert_eq!(json, "\"rerank_fallback\"");
        assert_eq!(Degradation::BudgetExceeded.to_string(), "budget_exceeded");
    }

    #[test]
    fn test_request_builder() {
        let request = SearchRequest::new("visa", "g1", vec![0.1])
            .with_limit(5)
            .with_cache(false)
            .with_rerank(false);
        assert_eq!(request.limit, 5);
        assert!(!request.use_cache);
        assert!(!request.enable_rerank);
        assert!(request.options.is_empty());
    }
}
