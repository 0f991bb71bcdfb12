//! Candidate documents flowing through every pipeline stage

use serde::{Deserialize, Serialize};
use std::fmt;

/// Which stage produced a candidate's current score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    /// Nearest-neighbour search over embeddings
    Semantic,
    /// Full-text search
    Keyword,
    /// Reciprocal Rank Fusion of both branches
    Hybrid,
    /// Reordered by the relevance scorer
    Reranked,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Source::Semantic => "semantic",
            Source::Keyword => "keyword",
            Source::Hybrid => "hybrid",
            Source::Reranked => "reranked",
        };
        f.write_str(name)
    }
}

/// A document with a stage-relative score and position
///
/// Scores are only comparable within one ranked list; a semantic cosine
/// score and a keyword BM25 score mean nothing next to each other until
/// the lists are fused.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    /// Document ID, unique within a tenant
    pub id: String,

    pub title: String,

    /// Full text used by the reranker
    pub content: String,

    /// Relevance score (higher is better)
    pub score: f64,

    pub source: Source,

    /// 0-based position within the list that produced this candidate
    pub rank: usize,
}

impl Candidate {
    /// Create a new candidate at rank 0; ranks are assigned by the list owner
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        content: impl Into<String>,
        score: f64,
        source: Source,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            content: content.into(),
            score,
            source,
            rank: 0,
        }
    }
}

/// Rewrite `rank` so it matches each candidate's position in the list
pub fn assign_ranks(candidates: &mut [Candidate]) {
    for (position, candidate) in candidates.iter_mut().enumerate() {
        candidate.rank = position;
    }
}
