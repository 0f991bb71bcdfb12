//! Reciprocal Rank Fusion algorithm for combining search results

use crate::retrieval::{Candidate, Source};
use ahash::{HashMap, HashMapExt};
use std::cmp::Ordering;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum FusionError {
    #[error("Invalid weight configuration: weights must be positive")]
    InvalidWeights,

    #[error("Invalid RRF constant: k must be positive, got {0}")]
    InvalidK(f64),

    #[error("Pool size must be greater than zero")]
    EmptyPool,
}

/// Configuration for fusion algorithm
#[derive(Debug, Clone, PartialEq)]
pub struct FusionConfig {
    /// RRF K constant (typically 60)
    pub rrf_k: f64,

    /// Weight for semantic results
    pub semantic_weight: f64,

    /// Weight for keyword results
    pub keyword_weight: f64,

    /// Number of fused candidates emitted
    pub pool_size: usize,
}

impl FusionConfig {
    pub fn new(
        rrf_k: f64,
        semantic_weight: f64,
        keyword_weight: f64,
        pool_size: usize,
    ) -> Result<Self, FusionError> {
        if semantic_weight.is_nan()
            || keyword_weight.is_nan()
            || semantic_weight <= 0.0
            || keyword_weight <= 0.0
        {
            return Err(FusionError::InvalidWeights);
        }
        if rrf_k.is_nan() || rrf_k <= 0.0 {
            return Err(FusionError::InvalidK(rrf_k));
        }
        if pool_size == 0 {
            return Err(FusionError::EmptyPool);
        }

        Ok(Self {
            rrf_k,
            semantic_weight,
            keyword_weight,
            pool_size,
        })
    }
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            rrf_k: 60.0,
            semantic_weight: 0.7,
            keyword_weight: 0.3,
            pool_size: 30,
        }
    }
}

/// Running state for one document id
struct Fused {
    score: f64,
    semantic_rank: Option<usize>,
    keyword_rank: Option<usize>,
    candidate: Candidate,
}

impl Fused {
    fn in_both(&self) -> bool {
        self.semantic_rank.is_some() && self.keyword_rank.is_some()
    }
}

/// Apply Reciprocal Rank Fusion to combine two ranked lists
///
/// RRF formula: score(id) = sum over both lists of: weight / (k + rank),
/// with `rank` the 0-based position in that list.
///
/// Ties on the fused score are broken by presence in both lists, then by
/// the better semantic rank, then by ascending id, so the output order is
/// fully determined by the inputs.
///
/// # Arguments
/// * `semantic` - Semantic branch, best first
/// * `keyword` - Keyword branch, best first
/// * `config` - Fusion configuration
///
/// # Returns
/// At most `pool_size` candidates tagged [`Source::Hybrid`] carrying the
/// fused score, sorted by score descending
pub fn reciprocal_rank_fusion(
    semantic: &[Candidate],
    keyword: &[Candidate],
    config: &FusionConfig,
) -> Vec<Candidate> {
    let mut fused: HashMap<&str, Fused> = HashMap::with_capacity(semantic.len() + keyword.len());

    // Semantic first so its title/content win on conflict
    for (rank, candidate) in semantic.iter().enumerate() {
        let contribution = config.semantic_weight / (rank as f64 + config.rrf_k);
        let entry = fused.entry(candidate.id.as_str()).or_insert_with(|| Fused {
            score: 0.0,
            semantic_rank: None,
            keyword_rank: None,
            candidate: candidate.clone(),
        });
        if entry.semantic_rank.is_none() {
            entry.semantic_rank = Some(rank);
            entry.score += contribution;
        }
    }

    for (rank, candidate) in keyword.iter().enumerate() {
        let contribution = config.keyword_weight / (rank as f64 + config.rrf_k);
        let entry = fused.entry(candidate.id.as_str()).or_insert_with(|| Fused {
            score: 0.0,
            semantic_rank: None,
            keyword_rank: None,
            candidate: candidate.clone(),
        });
        if entry.keyword_rank.is_none() {
            entry.keyword_rank = Some(rank);
            entry.score += contribution;
        }
    }

    let mut results: Vec<Fused> = fused.into_values().collect();
    results.sort_by(compare_fused);
    results.truncate(config.pool_size);

    results
        .into_iter()
        .enumerate()
        .map(|(position, entry)| Candidate {
            score: entry.score,
            source: Source::Hybrid,
            rank: position,
            ..entry.candidate
        })
        .collect()
}

fn compare_fused(a: &Fused, b: &Fused) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| b.in_both().cmp(&a.in_both()))
        .then_with(|| {
            let a_rank = a.semantic_rank.unwrap_or(usize::MAX);
            let b_rank = b.semantic_rank.unwrap_or(usize::MAX);
            a_rank.cmp(&b_rank)
        })
        .then_with(|| a.candidate.id.cmp(&b.candidate.id))
}
