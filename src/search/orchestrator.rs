//! End-to-end search pipeline

use crate::cache::{
    CacheLayer, CacheParams, CacheSettings, CacheStore, BucketSpec, MemoryCacheStore,
    SqliteCacheStore,
};
use crate::config::{expand_path, parse_duration, Config};
use crate::error::{HybridError, Result};
use crate::metrics::{MetricsCollector, SearchMetrics};
use crate::retrieval::{
    assign_ranks, reciprocal_rank_fusion, BranchOutcome, Candidate, CrossEncoderScorer,
    FusionConfig, KeywordIndex, NoopScorer, ParallelRetriever, RelevanceScorer, RerankError,
    Reranker, RetrievalError, SemanticIndex,
};
use crate::search::{
    Degradation, LatencyBreakdown, MissingEmbeddingPolicy, RelatedRequest, SearchMeta,
    SearchRequest, SearchResponse, Stage, DEFAULT_LIMIT,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Resolved pipeline settings (durations parsed, fusion validated)
#[derive(Debug, Clone)]
pub struct SearchSettings {
    pub per_branch_limit: usize,
    pub semantic_timeout: Duration,
    pub keyword_timeout: Duration,
    pub fusion: FusionConfig,
    pub rerank_enabled: bool,
    pub rerank_pool_size: usize,
    pub rerank_timeout: Duration,
    pub cache: CacheSettings,
    pub related_ttl: Duration,
    pub request_budget: Duration,
    /// Limit applied to requests built through [`HybridSearchOrchestrator::request`]
    pub default_limit: usize,
    pub missing_embedding: MissingEmbeddingPolicy,
}

impl SearchSettings {
    pub fn from_config(config: &Config) -> Result<Self> {
        let fusion = FusionConfig::new(
            config.fusion.rrf_k,
            config.fusion.semantic_weight,
            config.fusion.keyword_weight,
            config.fusion.pool_size,
        )
        .map_err(|e| HybridError::InvalidConfigValue {
            path: "fusion".to_string(),
            message: e.to_string(),
        })?;

        Ok(Self {
            per_branch_limit: config.retrieval.per_branch_limit,
            semantic_timeout: parse_duration(&config.retrieval.semantic_timeout)?,
            keyword_timeout: parse_duration(&config.retrieval.keyword_timeout)?,
            fusion,
            rerank_enabled: config.rerank.enabled,
            rerank_pool_size: config.rerank.pool_size,
            rerank_timeout: parse_duration(&config.rerank.timeout)?,
            cache: CacheSettings {
                default_ttl: parse_duration(&config.cache.default_ttl)?,
                max_ttl: parse_duration(&config.cache.max_ttl)?,
                read_timeout: parse_duration(&config.cache.read_timeout)?,
                write_timeout: parse_duration(&config.cache.write_timeout)?,
                bucket: BucketSpec {
                    dimensions: config.cache.bucket_dimensions,
                    precision: config.cache.bucket_precision,
                },
            },
            related_ttl: parse_duration(&config.cache.related_ttl)?,
            request_budget: parse_duration(&config.pipeline.request_budget)?,
            default_limit: config.pipeline.default_limit,
            missing_embedding: config.pipeline.missing_embedding.parse()?,
        })
    }

    /// L1 key parameters for a request, keyed on whether reranking actually runs
    pub fn cache_params(&self, limit: usize, enable_rerank: bool) -> CacheParams {
        CacheParams::new(limit, enable_rerank && self.rerank_enabled)
    }
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            per_branch_limit: 30,
            semantic_timeout: Duration::from_millis(150),
            keyword_timeout: Duration::from_millis(150),
            fusion: FusionConfig::default(),
            rerank_enabled: true,
            rerank_pool_size: 30,
            rerank_timeout: Duration::from_millis(80),
            cache: CacheSettings::default(),
            related_ttl: Duration::from_secs(900),
            request_budget: Duration::from_millis(250),
            default_limit: DEFAULT_LIMIT,
            missing_embedding: MissingEmbeddingPolicy::Reject,
        }
    }
}

/// Runs cache check, parallel retrieval, fusion, rerank and cache write
///
/// Every stage degrades instead of aborting; the response metadata records
/// what was skipped or fell back.
pub struct HybridSearchOrchestrator {
    cache: CacheLayer,
    retriever: ParallelRetriever,
    reranker: Reranker,
    metrics: Arc<MetricsCollector>,
    settings: SearchSettings,
}

impl HybridSearchOrchestrator {
    pub fn new(
        settings: SearchSettings,
        semantic_index: Arc<dyn SemanticIndex>,
        keyword_index: Arc<dyn KeywordIndex>,
        scorer: Arc<dyn RelevanceScorer>,
        store: Arc<dyn CacheStore>,
    ) -> Self {
        let metrics = Arc::new(MetricsCollector::new());
        Self::with_metrics(settings, semantic_index, keyword_index, scorer, store, metrics)
    }

    /// Build with a caller-owned metrics collector
    pub fn with_metrics(
        settings: SearchSettings,
        semantic_index: Arc<dyn SemanticIndex>,
        keyword_index: Arc<dyn KeywordIndex>,
        scorer: Arc<dyn RelevanceScorer>,
        store: Arc<dyn CacheStore>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        let cache = CacheLayer::new(store, Arc::clone(&metrics), settings.cache.clone());
        let retriever = ParallelRetriever::new(
            semantic_index,
            keyword_index,
            settings.semantic_timeout,
            settings.keyword_timeout,
            Arc::clone(&metrics),
        );
        let reranker = Reranker::new(
            scorer,
            settings.rerank_enabled,
            settings.rerank_pool_size,
            settings.rerank_timeout,
            Arc::clone(&metrics),
        );

        Self {
            cache,
            retriever,
            reranker,
            metrics,
            settings,
        }
    }

    /// Assemble the pipeline from configuration
    ///
    /// Picks the scorer (`rerank.scorer`) and cache store (`cache.backend`).
    /// A cross-encoder that fails to load is replaced by the identity scorer
    /// so search keeps serving RRF order.
    pub fn from_config(
        config: &Config,
        semantic_index: Arc<dyn SemanticIndex>,
        keyword_index: Arc<dyn KeywordIndex>,
    ) -> Result<Self> {
        let settings = SearchSettings::from_config(config)?;

        let scorer: Arc<dyn RelevanceScorer> = match config.rerank.scorer.as_str() {
            "cross-encoder" if config.rerank.enabled => {
                match CrossEncoderScorer::new(&config.rerank.model) {
                    Ok(scorer) => Arc::new(scorer),
                    Err(e) => {
                        warn!("Cross-encoder unavailable, reranking disabled: {}", e);
                        Arc::new(NoopScorer)
                    }
                }
            }
            _ => Arc::new(NoopScorer),
        };

        let store: Arc<dyn CacheStore> = match config.cache.backend.as_str() {
            "sqlite" => {
                let path = expand_path(&config.cache.sqlite_path)?;
                Arc::new(SqliteCacheStore::new(&path, config.cache.compression_threshold)?)
            }
            _ => Arc::new(MemoryCacheStore::new(config.cache.memory_capacity)),
        };

        info!(
            scorer = scorer.name(),
            backend = %config.cache.backend,
            budget_ms = %settings.request_budget.as_millis(),
            "Hybrid search pipeline ready"
        );

        Ok(Self::new(settings, semantic_index, keyword_index, scorer, store))
    }

    pub fn settings(&self) -> &SearchSettings {
        &self.settings
    }

    /// Request carrying the configured default limit
    pub fn request(
        &self,
        query: impl Into<String>,
        tenant_id: impl Into<String>,
        embedding: Vec<f64>,
    ) -> SearchRequest {
        SearchRequest::new(query, tenant_id, embedding).with_limit(self.settings.default_limit)
    }

    /// Shared collector, for callers that export metrics elsewhere
    pub fn metrics(&self) -> Arc<MetricsCollector> {
        Arc::clone(&self.metrics)
    }

    pub fn get_metrics(&self) -> SearchMetrics {
        self.metrics.snapshot()
    }

    pub fn reset_metrics(&self) {
        self.metrics.reset();
    }

    /// Drop every cached entry in both tiers
    pub async fn flush_cache(&self) -> Result<u64> {
        Ok(self.cache.flush().await?)
    }

    /// Answer a search query
    ///
    /// Fails only on malformed requests and on a missing embedding under the
    /// reject policy; everything else degrades into the response metadata.
    pub async fn search(&self, request: &SearchRequest) -> Result<SearchResponse> {
        let start = Instant::now();
        let deadline = start + self.settings.request_budget;

        if request.query.trim().is_empty() {
            return Err(HybridError::InvalidRequest(
                "Query text cannot be empty".to_string(),
            ));
        }
        if request.limit == 0 {
            return Err(HybridError::InvalidRequest(
                "Limit must be greater than 0".to_string(),
            ));
        }
        check_embedding(&request.embedding)?;
        if request.cache_ttl == Some(Duration::ZERO) {
            return Err(HybridError::InvalidRequest(
                "Cache TTL must be greater than 0".to_string(),
            ));
        }

        let embedding = if request.embedding.is_empty() {
            match self.settings.missing_embedding {
                MissingEmbeddingPolicy::Reject => return Err(HybridError::EmbeddingMissing),
                MissingEmbeddingPolicy::KeywordOnly => None,
            }
        } else {
            Some(request.embedding.as_slice())
        };

        let params = self.settings.cache_params(request.limit, request.enable_rerank);
        let rerank = params.rerank;
        let mut degradations = Vec::new();
        // Filtered result lists are request-specific and bypass the cache
        let cacheable = request.use_cache && request.options.is_empty();

        let mut latency = LatencyBreakdown::default();
        let mut stage = Stage::CacheCheck;
        debug!(stage = %stage, tenant = %request.tenant_id, "Search started");

        if cacheable {
            let cache_start = Instant::now();
            let cached = self
                .cache
                .lookup(&request.query, &request.tenant_id, &params)
                .await;
            latency.cache_ms = elapsed_ms(cache_start);

            if let Some(results) = cached {
                latency.total_ms = elapsed_ms(start);
                self.metrics.record_latency(latency.total_ms);
                debug!(total_ms = latency.total_ms, "Served from cache");
                return Ok(SearchResponse {
                    meta: SearchMeta {
                        total_results: results.len(),
                        cache_hit: true,
                        latency,
                        semantic_count: 0,
                        keyword_count: 0,
                        degradations,
                    },
                    results,
                });
            }
        }

        // A cached list came from a full request, so only a miss runs keyword-only
        if embedding.is_none() {
            push_unique(&mut degradations, Degradation::KeywordOnly);
        }

        stage = Stage::Retrieve;
        debug!(stage = %stage, "Cache miss, retrieving");
        let outcome = self
            .retriever
            .retrieve(
                &request.query,
                embedding,
                &request.tenant_id,
                self.settings.per_branch_limit,
                deadline,
            )
            .await;
        latency.semantic_ms = outcome.semantic.elapsed_ms;
        latency.keyword_ms = outcome.keyword.elapsed_ms;

        note_branch(&mut degradations, &outcome.semantic, Degradation::SemanticBranchFailed);
        note_branch(&mut degradations, &outcome.keyword, Degradation::KeywordBranchFailed);
        if outcome.is_total_failure() {
            push_unique(&mut degradations, Degradation::TotalRetrievalFailure);
        }

        let semantic_count = outcome.semantic.candidates.len();
        let keyword_count = outcome.keyword.candidates.len();
        let semantic = exclude(outcome.semantic.candidates, &request.options.exclude_ids);
        let keyword = exclude(outcome.keyword.candidates, &request.options.exclude_ids);

        stage = Stage::Merge;
        debug!(stage = %stage, semantic = semantic.len(), keyword = keyword.len());
        let rrf_start = Instant::now();
        let fused = reciprocal_rank_fusion(&semantic, &keyword, &self.settings.fusion);
        latency.rrf_ms = elapsed_ms(rrf_start);

        stage = Stage::Rerank;
        debug!(stage = %stage, pool = fused.len(), rerank);
        let mut results = if rerank {
            let outcome = self
                .reranker
                .rerank_before(&request.query, fused, request.limit, deadline)
                .await;
            latency.rerank_ms = outcome.elapsed_ms;
            if let Some(error) = &outcome.error {
                push_unique(&mut degradations, Degradation::RerankFallback);
                if matches!(error, RerankError::BudgetExhausted) {
                    push_unique(&mut degradations, Degradation::BudgetExceeded);
                }
            }
            outcome.candidates
        } else {
            let mut fused = fused;
            fused.truncate(request.limit);
            fused
        };

        if let Some(min_score) = request.options.min_score {
            results.retain(|c| c.score >= min_score);
            assign_ranks(&mut results);
        }

        stage = Stage::CacheWrite;
        // Degraded lists are not cached so a transient failure is not served for a full TTL
        if cacheable && degradations.is_empty() && !results.is_empty() {
            debug!(stage = %stage);
            let write_start = Instant::now();
            self.cache
                .store(
                    &request.query,
                    &request.tenant_id,
                    &params,
                    &results,
                    request.cache_ttl,
                )
                .await;
            latency.cache_ms += elapsed_ms(write_start);
        }

        stage = Stage::Done;
        latency.total_ms = elapsed_ms(start);
        self.metrics.record_latency(latency.total_ms);

        if degradations.is_empty() {
            debug!(stage = %stage, total_ms = latency.total_ms, results = results.len(), "Search finished");
        } else {
            warn!(
                stage = %stage,
                total_ms = latency.total_ms,
                degradations = ?degradations,
                "Search finished degraded"
            );
        }

        Ok(SearchResponse {
            meta: SearchMeta {
                total_results: results.len(),
                cache_hit: false,
                latency,
                semantic_count,
                keyword_count,
                degradations,
            },
            results,
        })
    }

    /// Related documents for a sidebar: L2 cache first, semantic only, no rerank
    pub async fn related(&self, request: &RelatedRequest) -> Result<SearchResponse> {
        let start = Instant::now();
        let deadline = start + self.settings.request_budget;

        if request.embedding.is_empty() {
            return Err(HybridError::EmbeddingMissing);
        }
        check_embedding(&request.embedding)?;
        if request.limit == 0 {
            return Err(HybridError::InvalidRequest(
                "Limit must be greater than 0".to_string(),
            ));
        }

        let mut latency = LatencyBreakdown::default();
        let mut degradations = Vec::new();

        let cache_start = Instant::now();
        let cached = self
            .cache
            .lookup_bucket(&request.tenant_id, &request.embedding)
            .await;
        latency.cache_ms = elapsed_ms(cache_start);

        let (pool, cache_hit, semantic_count) = match cached {
            Some(pool) => (pool, true, 0),
            None => {
                let outcome = self
                    .retriever
                    .retrieve_semantic(
                        &request.embedding,
                        &request.tenant_id,
                        self.settings.per_branch_limit,
                        deadline,
                    )
                    .await;
                latency.semantic_ms = outcome.elapsed_ms;
                note_branch(&mut degradations, &outcome, Degradation::SemanticBranchFailed);

                // The whole pool is cached; exclusion and limit are per request
                if outcome.succeeded() && !outcome.candidates.is_empty() {
                    let write_start = Instant::now();
                    self.cache
                        .store_bucket(
                            &request.tenant_id,
                            &request.embedding,
                            &outcome.candidates,
                            Some(self.settings.related_ttl),
                        )
                        .await;
                    latency.cache_ms += elapsed_ms(write_start);
                }
                let count = outcome.candidates.len();
                (outcome.candidates, false, count)
            }
        };

        let mut results: Vec<Candidate> = pool
            .into_iter()
            .filter(|c| request.exclude_id.as_deref() != Some(c.id.as_str()))
            .take(request.limit)
            .collect();
        assign_ranks(&mut results);

        latency.total_ms = elapsed_ms(start);
        self.metrics.record_latency(latency.total_ms);
        debug!(
            tenant = %request.tenant_id,
            cache_hit,
            results = results.len(),
            total_ms = latency.total_ms,
            "Related lookup finished"
        );

        Ok(SearchResponse {
            meta: SearchMeta {
                total_results: results.len(),
                cache_hit,
                latency,
                semantic_count,
                keyword_count: 0,
                degradations,
            },
            results,
        })
    }
}

fn note_branch(degradations: &mut Vec<Degradation>, branch: &BranchOutcome, failed: Degradation) {
    match &branch.error {
        None | Some(RetrievalError::Skipped { .. }) => {}
        Some(RetrievalError::BudgetExhausted { .. }) => {
            push_unique(degradations, failed);
            push_unique(degradations, Degradation::BudgetExceeded);
        }
        Some(_) => push_unique(degradations, failed),
    }
}

fn check_embedding(embedding: &[f64]) -> Result<()> {
    if embedding.iter().any(|v| !v.is_finite()) {
        return Err(HybridError::InvalidRequest(
            "Embedding contains non-finite values".to_string(),
        ));
    }
    Ok(())
}

fn push_unique(degradations: &mut Vec<Degradation>, degradation: Degradation) {
    if !degradations.contains(&degradation) {
        degradations.push(degradation);
    }
}

fn exclude(mut candidates: Vec<Candidate>, exclude_ids: &[String]) -> Vec<Candidate> {
    if exclude_ids.is_empty() {
        return candidates;
    }
    candidates.retain(|c| !exclude_ids.contains(&c.id));
    assign_ranks(&mut candidates);
    candidates
}

fn elapsed_ms(since: Instant) -> f64 {
    since.elapsed().as_secs_f64() * 1000.0
}
