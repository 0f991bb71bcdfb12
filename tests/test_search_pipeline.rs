//! Integration tests for the hybrid search pipeline
//!
//! Drives the orchestrator end to end with in-memory index and scorer
//! collaborators.

use async_trait::async_trait;
use hybrid_search::cache::{CacheStore, MemoryCacheStore};
use hybrid_search::config::Config;
use hybrid_search::retrieval::{
    Branch, Candidate, KeywordIndex, NoopScorer, RelevanceScorer, RerankError, RetrievalError,
    SemanticIndex, Source,
};
use hybrid_search::search::{
    Degradation, HybridSearchOrchestrator, RelatedRequest, SearchRequest, SearchSettings,
};
use hybrid_search::HybridError;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn doc(id: &str, score: f64, source: Source) -> Candidate {
    Candidate::new(
        id,
        format!("Title for {}", id),
        format!("Body text of document {}", id),
        score,
        source,
    )
}

/// 20 semantic hits d0..d19
fn semantic_docs() -> Vec<Candidate> {
    (0..20)
        .map(|i| doc(&format!("d{}", i), 0.95 - i as f64 * 0.02, Source::Semantic))
        .collect()
}

/// 15 keyword hits: d0..d4 overlap the semantic list, k0..k9 do not
fn keyword_docs() -> Vec<Candidate> {
    let overlap = (0..5).map(|i| format!("d{}", i));
    let unique = (0..10).map(|i| format!("k{}", i));
    overlap
        .chain(unique)
        .enumerate()
        .map(|(i, id)| doc(&id, 12.0 - i as f64 * 0.5, Source::Keyword))
        .collect()
}

struct MockSemantic {
    docs: Vec<Candidate>,
    delay: Duration,
    calls: AtomicUsize,
}

impl MockSemantic {
    fn new(docs: Vec<Candidate>) -> Self {
        Self {
            docs,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    fn slow(docs: Vec<Candidate>, delay: Duration) -> Self {
        Self {
            delay,
            ..Self::new(docs)
        }
    }
}

#[async_trait]
impl SemanticIndex for MockSemantic {
    async fn search(
        &self,
        _embedding: &[f64],
        _tenant: &str,
        limit: usize,
    ) -> Result<Vec<Candidate>, RetrievalError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(self.docs.iter().take(limit).cloned().collect())
    }
}

struct MockKeyword {
    docs: Vec<Candidate>,
    fail: bool,
}

#[async_trait]
impl KeywordIndex for MockKeyword {
    async fn search(
        &self,
        _text: &str,
        _tenant: &str,
        limit: usize,
    ) -> Result<Vec<Candidate>, RetrievalError> {
        if self.fail {
            return Err(RetrievalError::backend(Branch::Keyword, "search cluster unavailable"));
        }
        Ok(self.docs.iter().take(limit).cloned().collect())
    }
}

/// Scores later texts higher, reversing the fused order
struct ReverseScorer;

#[async_trait]
impl RelevanceScorer for ReverseScorer {
    async fn score(&self, _query: &str, texts: &[String]) -> Result<Vec<(usize, f64)>, RerankError> {
        Ok((0..texts.len()).map(|i| (i, i as f64)).collect())
    }

    fn name(&self) -> &str {
        "reverse"
    }
}

struct BrokenScorer;

#[async_trait]
impl RelevanceScorer for BrokenScorer {
    async fn score(&self, _query: &str, _texts: &[String]) -> Result<Vec<(usize, f64)>, RerankError> {
        Err(RerankError::RerankingError("model crashed".to_string()))
    }

    fn name(&self) -> &str {
        "broken"
    }
}

fn build(
    settings: SearchSettings,
    semantic: Arc<MockSemantic>,
    keyword_fails: bool,
    scorer: Arc<dyn RelevanceScorer>,
) -> HybridSearchOrchestrator {
    HybridSearchOrchestrator::new(
        settings,
        semantic,
        Arc::new(MockKeyword {
            docs: keyword_docs(),
            fail: keyword_fails,
        }),
        scorer,
        Arc::new(MemoryCacheStore::default()),
    )
}

fn request() -> SearchRequest {
    SearchRequest::new("H1B visa processing time", "g1", vec![0.12, -0.4, 0.33, 0.08])
}

fn ids(results: &[Candidate]) -> Vec<String> {
    results.iter().map(|c| c.id.clone()).collect()
}

#[tokio::test]
async fn test_end_to_end_then_cache_hit() {
    let semantic = Arc::new(MockSemantic::new(semantic_docs()));
    let search = build(
        SearchSettings::default(),
        Arc::clone(&semantic),
        false,
        Arc::new(NoopScorer),
    );

    let first = search.search(&request()).await.unwrap();
    assert!(!first.meta.cache_hit);
    assert_eq!(first.results.len(), 12);
    assert_eq!(first.meta.total_results, 12);
    assert_eq!(first.meta.semantic_count, 20);
    assert_eq!(first.meta.keyword_count, 15);
    assert!(first.meta.degradations.is_empty());

    // Overlapping documents lead the fused list
    assert_eq!(&ids(&first.results)[..5], &["d0", "d1", "d2", "d3", "d4"]);
    for (rank, candidate) in first.results.iter().enumerate() {
        assert_eq!(candidate.rank, rank);
        assert_eq!(candidate.source, Source::Hybrid);
    }

    let latency = &first.meta.latency;
    assert!(latency.total_ms >= latency.semantic_ms.max(latency.keyword_ms));
    assert!(latency.total_ms >= latency.rrf_ms);

    let second = search.search(&request()).await.unwrap();
    assert!(second.meta.cache_hit);
    assert_eq!(ids(&second.results), ids(&first.results));
    assert_eq!(semantic.calls.load(Ordering::SeqCst), 1);

    let metrics = search.get_metrics();
    assert_eq!(metrics.cache_misses, 1);
    assert_eq!(metrics.cache_hits, 1);
    assert_eq!(metrics.semantic_searches, 1);
    assert_eq!(metrics.keyword_searches, 1);
    assert_eq!(metrics.requests, 2);
}

#[tokio::test]
async fn test_normalized_query_shares_cache_entry() {
    let search = build(
        SearchSettings::default(),
        Arc::new(MockSemantic::new(semantic_docs())),
        false,
        Arc::new(NoopScorer),
    );

    search.search(&request()).await.unwrap();
    let mut shouted = request();
    shouted.query = "  h1b VISA   processing time ".to_string();
    assert!(search.search(&shouted).await.unwrap().meta.cache_hit);

    // A different limit is a different cache entry
    let smaller = request().with_limit(5);
    let response = search.search(&smaller).await.unwrap();
    assert!(!response.meta.cache_hit);
    assert_eq!(response.results.len(), 5);
}

#[tokio::test]
async fn test_keyword_failure_serves_semantic_results() {
    let search = build(
        SearchSettings::default(),
        Arc::new(MockSemantic::new(semantic_docs())),
        true,
        Arc::new(NoopScorer),
    );

    let response = search.search(&request()).await.unwrap();

    assert_eq!(response.meta.keyword_count, 0);
    assert!(!response.results.is_empty());
    assert!(response.results.iter().all(|c| c.id.starts_with('d')));
    assert_eq!(
        response.meta.degradations,
        vec![Degradation::KeywordBranchFailed]
    );

    // Degraded results are not cached
    let again = search.search(&request()).await.unwrap();
    assert!(!again.meta.cache_hit);
}

#[tokio::test]
async fn test_total_retrieval_failure_is_empty_not_error() {
    let search = build(
        SearchSettings::default(),
        Arc::new(MockSemantic::slow(semantic_docs(), Duration::from_millis(400))),
        true,
        Arc::new(NoopScorer),
    );

    let response = search.search(&request()).await.unwrap();

    assert!(response.results.is_empty());
    assert!(response
        .meta
        .degradations
        .contains(&Degradation::TotalRetrievalFailure));
    assert!(response
        .meta
        .degradations
        .contains(&Degradation::SemanticBranchFailed));
}

#[tokio::test]
async fn test_rerank_reorders_fused_pool() {
    let search = build(
        SearchSettings::default(),
        Arc::new(MockSemantic::new(semantic_docs())),
        false,
        Arc::new(ReverseScorer),
    );

    let plain = build(
        SearchSettings::default(),
        Arc::new(MockSemantic::new(semantic_docs())),
        false,
        Arc::new(NoopScorer),
    );
    let mut full = request().with_limit(30).with_cache(false);
    full.enable_rerank = false;
    let fused = plain.search(&full).await.unwrap();
    assert_eq!(fused.results.len(), 30);

    let response = search.search(&request()).await.unwrap();

    assert_eq!(response.results.len(), 12);
    assert!(response.results.iter().all(|c| c.source == Source::Reranked));
    assert_eq!(response.results[0].id, fused.results[29].id);
    assert_eq!(search.get_metrics().reranks, 1);
}

#[tokio::test]
async fn test_reranked_results_survive_cache_hit() {
    let semantic = Arc::new(MockSemantic::new(semantic_docs()));
    let search = build(
        SearchSettings::default(),
        Arc::clone(&semantic),
        false,
        Arc::new(ReverseScorer),
    );

    let first = search.search(&request()).await.unwrap();
    assert!(!first.meta.cache_hit);
    assert_eq!(first.results.len(), 12);
    assert!(first.meta.degradations.is_empty());

    let second = search.search(&request()).await.unwrap();
    assert!(second.meta.cache_hit);
    assert_eq!(semantic.calls.load(Ordering::SeqCst), 1);
    assert_eq!(search.get_metrics().reranks, 1);

    assert_eq!(ids(&second.results), ids(&first.results));
    for (rank, (cached, fresh)) in second.results.iter().zip(&first.results).enumerate() {
        assert_eq!(cached.rank, rank);
        assert_eq!(cached.rank, fresh.rank);
        assert_eq!(cached.source, Source::Reranked);
        assert_eq!(cached.score, fresh.score);
    }
}

#[tokio::test]
async fn test_memory_cache_stays_bounded_under_distinct_queries() {
    let store = Arc::new(MemoryCacheStore::new(64));
    let search = HybridSearchOrchestrator::new(
        SearchSettings::default(),
        Arc::new(MockSemantic::new(semantic_docs())),
        Arc::new(MockKeyword {
            docs: keyword_docs(),
            fail: false,
        }),
        Arc::new(NoopScorer),
        Arc::clone(&store) as Arc<dyn CacheStore>,
    );

    for i in 0..1000 {
        let mut request = request().with_cache_ttl(Duration::from_millis(1));
        request.query = format!("visa question {}", i);
        search.search(&request).await.unwrap();
    }

    assert!(store.len().await <= 64);
    assert_eq!(store.capacity().await, 64);
}

#[tokio::test]
async fn test_rerank_failure_falls_back_to_fused_order() {
    let broken = build(
        SearchSettings::default(),
        Arc::new(MockSemantic::new(semantic_docs())),
        false,
        Arc::new(BrokenScorer),
    );
    let baseline = build(
        SearchSettings::default(),
        Arc::new(MockSemantic::new(semantic_docs())),
        false,
        Arc::new(NoopScorer),
    );

    let fallback = broken.search(&request()).await.unwrap();
    let expected = baseline.search(&request().with_rerank(false)).await.unwrap();

    assert_eq!(ids(&fallback.results), ids(&expected.results));
    assert_eq!(fallback.meta.degradations, vec![Degradation::RerankFallback]);
    assert_eq!(broken.get_metrics().reranks, 0);
}

#[tokio::test]
async fn test_request_budget_cancels_slow_branch() {
    let settings = SearchSettings {
        request_budget: Duration::from_millis(60),
        ..Default::default()
    };
    let search = build(
        settings,
        Arc::new(MockSemantic::slow(semantic_docs(), Duration::from_millis(500))),
        false,
        Arc::new(NoopScorer),
    );

    let response = search.search(&request()).await.unwrap();

    assert!(!response.meta.cache_hit);
    assert!(response.meta.degradations.contains(&Degradation::BudgetExceeded));
    assert!(response
        .meta
        .degradations
        .contains(&Degradation::SemanticBranchFailed));
    assert_eq!(response.meta.semantic_count, 0);
    assert_eq!(response.results.len(), 12);
    assert!(response.meta.latency.total_ms < 400.0);
}

#[tokio::test]
async fn test_missing_embedding_rejected_by_default() {
    let search = build(
        SearchSettings::default(),
        Arc::new(MockSemantic::new(semantic_docs())),
        false,
        Arc::new(NoopScorer),
    );

    let request = SearchRequest::new("H1B visa", "g1", Vec::new());
    let err = search.search(&request).await.unwrap_err();
    assert!(matches!(err, HybridError::EmbeddingMissing));
}

#[tokio::test]
async fn test_related_uses_bucket_cache() {
    let semantic = Arc::new(MockSemantic::new(semantic_docs()));
    let search = build(
        SearchSettings::default(),
        Arc::clone(&semantic),
        false,
        Arc::new(NoopScorer),
    );
    let embedding = vec![0.12, -0.41, 0.33, 0.08, 0.5, -0.2, 0.0, 0.7, 0.9];

    let first = search
        .related(&RelatedRequest::new("g1", embedding.clone(), 5).excluding("d0"))
        .await
        .unwrap();
    assert!(!first.meta.cache_hit);
    assert_eq!(ids(&first.results), vec!["d1", "d2", "d3", "d4", "d5"]);
    assert!(first.results.iter().all(|c| c.source == Source::Semantic));
    assert_eq!(first.results[0].rank, 0);

    // A nearby embedding lands in the same bucket
    let mut nearby = embedding.clone();
    nearby[0] = 0.13;
    nearby[8] = -0.9;
    let second = search
        .related(&RelatedRequest::new("g1", nearby, 5).excluding("d1"))
        .await
        .unwrap();
    assert!(second.meta.cache_hit);
    assert_eq!(ids(&second.results), vec!["d0", "d2", "d3", "d4", "d5"]);

    assert_eq!(semantic.calls.load(Ordering::SeqCst), 1);
    assert_eq!(search.get_metrics().keyword_searches, 0);
}

#[tokio::test]
async fn test_flush_cache_and_reset_metrics() {
    let search = build(
        SearchSettings::default(),
        Arc::new(MockSemantic::new(semantic_docs())),
        false,
        Arc::new(NoopScorer),
    );

    search.search(&request()).await.unwrap();
    assert_eq!(search.flush_cache().await.unwrap(), 1);
    assert!(!search.search(&request()).await.unwrap().meta.cache_hit);

    search.reset_metrics();
    let metrics = search.get_metrics();
    assert_eq!(metrics.requests, 0);
    assert_eq!(metrics.cache_misses, 0);
    assert_eq!(metrics.avg_latency_ms(), 0.0);
}

#[tokio::test]
async fn test_orchestrator_from_default_config() {
    let search = HybridSearchOrchestrator::from_config(
        &Config::default(),
        Arc::new(MockSemantic::new(semantic_docs())),
        Arc::new(MockKeyword {
            docs: keyword_docs(),
            fail: false,
        }),
    )
    .unwrap();

    let response = search.search(&request()).await.unwrap();
    assert_eq!(response.results.len(), 12);
    assert!(response.meta.degradations.is_empty());
}
