//! Concurrent semantic + keyword retrieval with per-branch timeouts

use crate::metrics::MetricsCollector;
use crate::retrieval::{
    assign_ranks, deduplicate_candidates, Branch, Candidate, KeywordIndex, RetrievalError,
    SemanticIndex, Source,
};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Result of one retrieval branch
#[derive(Debug, Clone, Default)]
pub struct BranchOutcome {
    pub candidates: Vec<Candidate>,
    pub elapsed_ms: f64,
    pub error: Option<RetrievalError>,
}

impl BranchOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Joined outcome of both branches
#[derive(Debug, Clone, Default)]
pub struct RetrievalOutcome {
    pub semantic: BranchOutcome,
    pub keyword: BranchOutcome,
}

impl RetrievalOutcome {
    /// Both branches failed, timed out or were skipped
    pub fn is_total_failure(&self) -> bool {
        !self.semantic.succeeded() && !self.keyword.succeeded()
    }
}

/// Issues the semantic and keyword lookups concurrently
///
/// A failing branch never fails the call: it contributes an empty list and a
/// recorded error, and the other branch is used as-is.
pub struct ParallelRetriever {
    semantic_index: Arc<dyn SemanticIndex>,
    keyword_index: Arc<dyn KeywordIndex>,
    semantic_timeout: Duration,
    keyword_timeout: Duration,
    metrics: Arc<MetricsCollector>,
}

impl ParallelRetriever {
    pub fn new(
        semantic_index: Arc<dyn SemanticIndex>,
        keyword_index: Arc<dyn KeywordIndex>,
        semantic_timeout: Duration,
        keyword_timeout: Duration,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            semantic_index,
            keyword_index,
            semantic_timeout,
            keyword_timeout,
            metrics,
        }
    }

    /// Run both branches and wait for both to finish, fail or time out
    ///
    /// # Arguments
    /// * `query` - Raw query text for the keyword branch
    /// * `embedding` - Query embedding; `None` skips the semantic branch
    /// * `tenant` - Opaque partition key passed through to both indexes
    /// * `per_branch_limit` - Candidates requested from each branch
    /// * `deadline` - Request-level deadline; caps both branch timeouts
    pub async fn retrieve(
        &self,
        query: &str,
        embedding: Option<&[f64]>,
        tenant: &str,
        per_branch_limit: usize,
        deadline: Instant,
    ) -> RetrievalOutcome {
        let semantic = async {
            match embedding {
                Some(embedding) => {
                    self.metrics.record_semantic_search();
                    run_branch(
                        Branch::Semantic,
                        self.semantic_timeout,
                        deadline,
                        self.semantic_index.search(embedding, tenant, per_branch_limit),
                    )
                    .await
                }
                None => BranchOutcome {
                    candidates: Vec::new(),
                    elapsed_ms: 0.0,
                    error: Some(RetrievalError::Skipped {
                        branch: Branch::Semantic,
                        reason: "no query embedding".to_string(),
                    }),
                },
            }
        };

        let keyword = async {
            self.metrics.record_keyword_search();
            run_branch(
                Branch::Keyword,
                self.keyword_timeout,
                deadline,
                self.keyword_index.search(query, tenant, per_branch_limit),
            )
            .await
        };

        // Barrier: merge only starts once both sides have settled
        let (semantic, keyword) = tokio::join!(semantic, keyword);

        debug!(
            tenant,
            semantic = semantic.candidates.len(),
            keyword = keyword.candidates.len(),
            semantic_ms = semantic.elapsed_ms,
            keyword_ms = keyword.elapsed_ms,
            "Parallel retrieval finished"
        );

        RetrievalOutcome { semantic, keyword }
    }

    /// Semantic branch alone, for related-document lookups
    pub async fn retrieve_semantic(
        &self,
        embedding: &[f64],
        tenant: &str,
        limit: usize,
        deadline: Instant,
    ) -> BranchOutcome {
        self.metrics.record_semantic_search();
        run_branch(
            Branch::Semantic,
            self.semantic_timeout,
            deadline,
            self.semantic_index.search(embedding, tenant, limit),
        )
        .await
    }
}

async fn run_branch<F>(
    branch: Branch,
    branch_timeout: Duration,
    deadline: Instant,
    search: F,
) -> BranchOutcome
where
    F: Future<Output = Result<Vec<Candidate>, RetrievalError>>,
{
    let start = Instant::now();
    let remaining = deadline.saturating_duration_since(start);
    let budget_limited = remaining < branch_timeout;
    let effective = branch_timeout.min(remaining);

    let result = match tokio::time::timeout(effective, search).await {
        Ok(result) => result,
        Err(_) if budget_limited => Err(RetrievalError::BudgetExhausted { branch }),
        Err(_) => Err(RetrievalError::Timeout {
            branch,
            timeout_ms: branch_timeout.as_millis() as u64,
        }),
    };
    let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

    match result {
        Ok(candidates) => BranchOutcome {
            candidates: normalize_branch(candidates, branch),
            elapsed_ms,
            error: None,
        },
        Err(error) => {
            warn!("Retrieval branch degraded: {}", error);
            BranchOutcome {
                candidates: Vec::new(),
                elapsed_ms,
                error: Some(error),
            }
        }
    }
}

/// Collaborator order is trusted; only repeated ids are dropped and ranks
/// re-derived from position.
fn normalize_branch(candidates: Vec<Candidate>, branch: Branch) -> Vec<Candidate> {
    let source = match branch {
        Branch::Semantic => Source::Semantic,
        Branch::Keyword => Source::Keyword,
    };

    let mut candidates = deduplicate_candidates(candidates);
    for candidate in candidates.iter_mut() {
        candidate.source = source;
    }
    assign_ranks(&mut candidates);
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct FixedSemantic {
        ids: Vec<&'static str>,
        delay: Duration,
    }

    #[async_trait]
    impl SemanticIndex for FixedSemantic {
        async fn search(
            &self,
            _embedding: &[f64],
            _tenant: &str,
            limit: usize,
        ) -> Result<Vec<Candidate>, RetrievalError> {
            tokio::time::sleep(self.delay).await;
            Ok(self
                .ids
                .iter()
                .take(limit)
                .enumerate()
                .map(|(i, id)| Candidate::new(*id, *id, *id, 1.0 - i as f64 * 0.1, Source::Semantic))
                .collect())
        }
    }

    struct FailingKeyword;

    #[async_trait]
    impl KeywordIndex for FailingKeyword {
        async fn search(
            &self,
            _text: &str,
            _tenant: &str,
            _limit: usize,
        ) -> Result<Vec<Candidate>, RetrievalError> {
            Err(RetrievalError::backend(Branch::Keyword, "index offline"))
        }
    }

    fn retriever(semantic_delay: Duration) -> (ParallelRetriever, Arc<MetricsCollector>) {
        let metrics = Arc::new(MetricsCollector::new());
        let retriever = ParallelRetriever::new(
            Arc::new(FixedSemantic {
                ids: vec!["a", "b", "a", "c"],
                delay: semantic_delay,
            }),
            Arc::new(FailingKeyword),
            Duration::from_millis(100),
            Duration::from_millis(100),
            Arc::clone(&metrics),
        );
        (retriever, metrics)
    }

    #[tokio::test]
    async fn test_keyword_failure_keeps_semantic() {
        let (retriever, metrics) = retriever(Duration::ZERO);
        let deadline = Instant::now() + Duration::from_secs(1);

        let outcome = retriever
            .retrieve("visa", Some(&[0.1, 0.2]), "g1", 10, deadline)
            .await;

        assert!(outcome.semantic.succeeded());
        assert!(!outcome.keyword.succeeded());
        assert!(!outcome.is_total_failure());
        assert!(outcome.keyword.candidates.is_empty());

        // Duplicate "a" dropped, ranks follow position
        let ids: Vec<&str> = outcome.semantic.candidates.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(outcome.semantic.candidates[2].rank, 2);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.semantic_searches, 1);
        assert_eq!(snapshot.keyword_searches, 1);
    }

    #[tokio::test]
    async fn test_branch_timeout() {
        let (retriever, _) = retriever(Duration::from_millis(500));
        let deadline = Instant::now() + Duration::from_secs(5);

        let outcome = retriever
            .retrieve("visa", Some(&[0.1]), "g1", 10, deadline)
            .await;

        assert!(outcome.is_total_failure());
        assert!(matches!(
            outcome.semantic.error,
            Some(RetrievalError::Timeout { branch: Branch::Semantic, timeout_ms: 100 })
        ));
    }

    #[tokio::test]
    async fn test_budget_caps_branch_timeout() {
        let (retriever, _) = retriever(Duration::from_millis(500));
        let deadline = Instant::now() + Duration::from_millis(20);

        let outcome = retriever
            .retrieve("visa", Some(&[0.1]), "g1", 10, deadline)
            .await;

        assert!(matches!(
            outcome.semantic.error,
            Some(RetrievalError::BudgetExhausted { branch: Branch::Semantic })
        ));
        assert!(outcome.semantic.elapsed_ms < 100.0);
    }

    #[tokio::test]
    async fn test_missing_embedding_skips_semantic() {
        let (retriever, metrics) = retriever(Duration::ZERO);
        let deadline = Instant::now() + Duration::from_secs(1);

        let outcome = retriever.retrieve("visa", None, "g1", 10, deadline).await;

        assert!(matches!(
            outcome.semantic.error,
            Some(RetrievalError::Skipped { .. })
        ));
        assert_eq!(metrics.snapshot().semantic_searches, 0);
    }

    #[tokio::test]
    async fn test_semantic_only() {
        let (retriever, metrics) = retriever(Duration::ZERO);
        let deadline = Instant::now() + Duration::from_secs(1);

        let outcome = retriever.retrieve_semantic(&[0.1], "g1", 2, deadline).await;

        assert!(outcome.succeeded());
        assert_eq!(outcome.candidates.len(), 2);
        assert!(outcome.candidates.iter().all(|c| c.source == Source::Semantic));
        assert_eq!(metrics.snapshot().keyword_searches, 0);
    }
}
