//! Process-wide search counters
//!
//! A [`MetricsCollector`] is created once and shared (behind an `Arc`) by the
//! cache layer, the retriever, the reranker and the orchestrator. All
//! counters live behind a single lock so that [`MetricsCollector::reset`]
//! and [`MetricsCollector::snapshot`] see every counter at the same instant.

use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard};

/// Point-in-time copy of the accumulated counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchMetrics {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub semantic_searches: u64,
    pub keyword_searches: u64,
    pub reranks: u64,
    /// Number of latency samples folded into `total_latency_ms`
    pub requests: u64,
    pub total_latency_ms: f64,
}

impl SearchMetrics {
    /// Mean end-to-end latency, or 0 when nothing has been recorded
    pub fn avg_latency_ms(&self) -> f64 {
        if self.requests == 0 {
            0.0
        } else {
            self.total_latency_ms / self.requests as f64
        }
    }

    /// Fraction of cache lookups that hit, or 0 when there were none
    pub fn cache_hit_rate(&self) -> f64 {
        let lookups = self.cache_hits + self.cache_misses;
        if lookups == 0 {
            0.0
        } else {
            self.cache_hits as f64 / lookups as f64
        }
    }
}

/// Thread-safe accumulator for [`SearchMetrics`]
#[derive(Debug, Default)]
pub struct MetricsCollector {
    inner: Mutex<SearchMetrics>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SearchMetrics> {
        // Counters stay meaningful even if a holder panicked mid-update
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn record_cache_hit(&self) {
        self.lock().cache_hits += 1;
    }

    pub fn record_cache_miss(&self) {
        self.lock().cache_misses += 1;
    }

    pub fn record_semantic_search(&self) {
        self.lock().semantic_searches += 1;
    }

    pub fn record_keyword_search(&self) {
        self.lock().keyword_searches += 1;
    }

    pub fn record_rerank(&self) {
        self.lock().reranks += 1;
    }

    /// Fold one end-to-end latency sample into the running total
    pub fn record_latency(&self, ms: f64) {
        let mut metrics = self.lock();
        metrics.requests += 1;
        metrics.total_latency_ms += ms.max(0.0);
    }

    pub fn snapshot(&self) -> SearchMetrics {
        self.lock().clone()
    }

    /// Zero every counter in one step
    pub fn reset(&self) {
        *self.lock() = SearchMetrics::default();
    }
}
