//! Relevance reranking of the fused candidate pool
//!
//! The [`Reranker`] never fails a request: any scorer problem falls back to
//! the RRF order truncated to `top_k`.

use crate::metrics::MetricsCollector;
use crate::retrieval::{Candidate, Source};
use async_trait::async_trait;
use fastembed::{RerankInitOptions, RerankerModel, TextRerank};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RerankError {
    #[error("Reranker initialization failed: {0}")]
    InitializationError(String),

    #[error("Reranking failed: {0}")]
    RerankingError(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Reranking timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Reranking skipped: request budget exhausted")]
    BudgetExhausted,

    #[error("Scorer returned a malformed ordering: {0}")]
    MalformedOrdering(String),
}

/// Scores candidate texts against a query
///
/// Returns `(index, score)` pairs where `index` points into `texts`.
#[async_trait]
pub trait RelevanceScorer: Send + Sync {
    async fn score(&self, query: &str, texts: &[String]) -> Result<Vec<(usize, f64)>, RerankError>;

    fn name(&self) -> &str;

    /// Identity scorers leave the fused order untouched
    fn is_identity(&self) -> bool {
        false
    }
}

/// Scorer used when no reranking model is available
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopScorer;

#[async_trait]
impl RelevanceScorer for NoopScorer {
    async fn score(&self, _query: &str, texts: &[String]) -> Result<Vec<(usize, f64)>, RerankError> {
        let n = texts.len() as f64;
        Ok((0..texts.len())
            .map(|i| (i, (n - i as f64) / n))
            .collect())
    }

    fn name(&self) -> &str {
        "noop"
    }

    fn is_identity(&self) -> bool {
        true
    }
}

/// Cross-encoder scorer backed by FastEmbed
pub struct CrossEncoderScorer {
    model: Arc<TextRerank>,
    model_name: String,
}

impl CrossEncoderScorer {
    /// Create a new cross-encoder with the specified model
    ///
    /// # Arguments
    /// * `model_name` - Model name (e.g., "BAAI/bge-reranker-base")
    pub fn new(model_name: &str) -> Result<Self, RerankError> {
        let reranker_model = match model_name {
            "BAAI/bge-reranker-base" | "bge-reranker-base" => RerankerModel::BGERerankerBase,
            "jinaai/jina-reranker-v1-turbo-en" | "jina-reranker-v1-turbo-en" => {
                RerankerModel::JINARerankerV1TurboEn
            }
            _ => {
                return Err(RerankError::InitializationError(format!(
                    "Unsupported model: {}. Supported: BAAI/bge-reranker-base, jinaai/jina-reranker-v1-turbo-en",
                    model_name
                )));
            }
        };

        tracing::info!("Initializing reranker model: {}", model_name);

        let init_options = RerankInitOptions::new(reranker_model).with_show_download_progress(true);

        let model = TextRerank::try_new(init_options)
            .map_err(|e| RerankError::InitializationError(e.to_string()))?;

        Ok(Self {
            model: Arc::new(model),
            model_name: model_name.to_string(),
        })
    }

    /// Create scorer with default model
    pub fn with_default_model() -> Result<Self, RerankError> {
        Self::new("BAAI/bge-reranker-base")
    }
}

#[async_trait]
impl RelevanceScorer for CrossEncoderScorer {
    async fn score(&self, query: &str, texts: &[String]) -> Result<Vec<(usize, f64)>, RerankError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        if query.is_empty() {
            return Err(RerankError::InvalidInput(
                "Query cannot be empty".to_string(),
            ));
        }

        let model = Arc::clone(&self.model);
        let query = query.to_string();
        let texts = texts.to_vec();

        // ONNX inference is CPU-bound; keep it off the async workers
        let results = tokio::task::spawn_blocking(move || {
            let documents: Vec<&str> = texts.iter().map(|s| s.as_str()).collect();
            model.rerank(query.as_str(), documents, false, None)
        })
        .await
        .map_err(|e| RerankError::RerankingError(e.to_string()))?
        .map_err(|e| RerankError::RerankingError(e.to_string()))?;

        Ok(results
            .into_iter()
            .map(|r| (r.index, r.score as f64))
            .collect())
    }

    fn name(&self) -> &str {
        &self.model_name
    }
}

/// Result of a rerank pass
#[derive(Debug, Clone)]
pub struct RerankOutcome {
    pub candidates: Vec<Candidate>,
    /// The scorer's ordering was used
    pub applied: bool,
    /// Why the scorer's ordering was not used, if it failed
    pub error: Option<RerankError>,
    pub elapsed_ms: f64,
}

/// Reorders the top slice of the fused list with a [`RelevanceScorer`]
pub struct Reranker {
    scorer: Arc<dyn RelevanceScorer>,
    enabled: bool,
    pool_size: usize,
    timeout: Duration,
    metrics: Arc<MetricsCollector>,
}

impl Reranker {
    pub fn new(
        scorer: Arc<dyn RelevanceScorer>,
        enabled: bool,
        pool_size: usize,
        timeout: Duration,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            scorer,
            enabled,
            pool_size,
            timeout,
            metrics,
        }
    }

    pub fn scorer_name(&self) -> &str {
        self.scorer.name()
    }

    /// Rerank `candidates` (in RRF order) down to `top_k`
    ///
    /// The scorer sees at most `pool_size` leading candidates. Candidates the
    /// scorer did not return are appended in RRF order after the scored ones.
    pub async fn rerank(&self, query: &str, candidates: Vec<Candidate>, top_k: usize) -> RerankOutcome {
        self.run(query, candidates, top_k, None).await
    }

    /// Same as [`Reranker::rerank`], additionally bounded by a request deadline
    pub async fn rerank_before(
        &self,
        query: &str,
        candidates: Vec<Candidate>,
        top_k: usize,
        deadline: Instant,
    ) -> RerankOutcome {
        self.run(query, candidates, top_k, Some(deadline)).await
    }

    async fn run(
        &self,
        query: &str,
        mut candidates: Vec<Candidate>,
        top_k: usize,
        deadline: Option<Instant>,
    ) -> RerankOutcome {
        let start = Instant::now();

        if !self.enabled || self.scorer.is_identity() || candidates.len() <= top_k {
            candidates.truncate(top_k);
            return RerankOutcome {
                candidates,
                applied: false,
                error: None,
                elapsed_ms: 0.0,
            };
        }

        let pool_len = self.pool_size.min(candidates.len());
        let texts: Vec<String> = candidates[..pool_len]
            .iter()
            .map(|c| c.content.clone())
            .collect();

        let remaining = deadline.map_or(self.timeout, |d| d.saturating_duration_since(start));
        let result = if remaining.is_zero() {
            Err(RerankError::BudgetExhausted)
        } else {
            let budget_limited = remaining < self.timeout;
            match tokio::time::timeout(remaining.min(self.timeout), self.scorer.score(query, &texts)).await {
                Ok(scored) => scored.and_then(|scored| validate_ordering(scored, pool_len)),
                Err(_) if budget_limited => Err(RerankError::BudgetExhausted),
                Err(_) => Err(RerankError::Timeout {
                    timeout_ms: self.timeout.as_millis() as u64,
                }),
            }
        };
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

        match result {
            Ok(scored) => {
                self.metrics.record_rerank();
                debug!(
                    scorer = self.scorer.name(),
                    pool = pool_len,
                    elapsed_ms,
                    "Reranked candidate pool"
                );
                RerankOutcome {
                    candidates: apply_ordering(candidates, scored, top_k),
                    applied: true,
                    error: None,
                    elapsed_ms,
                }
            }
            Err(error) => {
                warn!("Reranking fell back to RRF order: {}", error);
                candidates.truncate(top_k);
                RerankOutcome {
                    candidates,
                    applied: false,
                    error: Some(error),
                    elapsed_ms,
                }
            }
        }
    }
}

/// Reject out-of-range or repeated indices, then sort best-first
fn validate_ordering(
    mut scored: Vec<(usize, f64)>,
    pool_len: usize,
) -> Result<Vec<(usize, f64)>, RerankError> {
    let mut seen = HashSet::with_capacity(scored.len());
    for (index, score) in &scored {
        if *index >= pool_len {
            return Err(RerankError::MalformedOrdering(format!(
                "index {} out of range for pool of {}",
                index, pool_len
            )));
        }
        if !seen.insert(*index) {
            return Err(RerankError::MalformedOrdering(format!(
                "index {} returned twice",
                index
            )));
        }
        if score.is_nan() {
            return Err(RerankError::MalformedOrdering(format!(
                "score for index {} is NaN",
                index
            )));
        }
    }

    scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    Ok(scored)
}

fn apply_ordering(candidates: Vec<Candidate>, scored: Vec<(usize, f64)>, top_k: usize) -> Vec<Candidate> {
    let mut slots: Vec<Option<Candidate>> = candidates.into_iter().map(Some).collect();
    let mut reordered = Vec::with_capacity(top_k);

    for (index, score) in scored {
        if let Some(mut candidate) = slots[index].take() {
            candidate.score = score;
            reordered.push(candidate);
        }
    }
    reordered.extend(slots.into_iter().flatten());
    reordered.truncate(top_k);

    for (position, candidate) in reordered.iter_mut().enumerate() {
        candidate.source = Source::Reranked;
        candidate.rank = position;
    }
    reordered
}
