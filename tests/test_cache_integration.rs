//! Integration tests for the persistent cache tier

use async_trait::async_trait;
use hybrid_search::cache::{
    exact_key, CacheLayer, CacheParams, CacheSettings, CacheStore, SqliteCacheStore,
};
use hybrid_search::config::Config;
use hybrid_search::retrieval::{Candidate, KeywordIndex, RetrievalError, SemanticIndex, Source};
use hybrid_search::search::{HybridSearchOrchestrator, SearchRequest};
use hybrid_search::MetricsCollector;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

struct FixedIndex(Vec<Candidate>);

#[async_trait]
impl SemanticIndex for FixedIndex {
    async fn search(
        &self,
        _embedding: &[f64],
        _tenant: &str,
        limit: usize,
    ) -> Result<Vec<Candidate>, RetrievalError> {
        Ok(self.0.iter().take(limit).cloned().collect())
    }
}

#[async_trait]
impl KeywordIndex for FixedIndex {
    async fn search(
        &self,
        _text: &str,
        _tenant: &str,
        limit: usize,
    ) -> Result<Vec<Candidate>, RetrievalError> {
        Ok(self.0.iter().rev().take(limit).cloned().collect())
    }
}

fn corpus() -> Vec<Candidate> {
    (0..8)
        .map(|i| {
            Candidate::new(
                format!("doc-{}", i),
                format!("Visa guide part {}", i),
                "Processing times vary by service center. ".repeat(40),
                1.0 - i as f64 * 0.1,
                Source::Semantic,
            )
        })
        .collect()
}

fn sqlite_config(temp: &TempDir) -> Config {
    let mut config = Config::default();
    config.cache.backend = "sqlite".to_string();
    config.cache.sqlite_path = temp.path().join("cache.sqlite");
    config.cache.read_timeout = "2s".to_string();
    config.cache.write_timeout = "2s".to_string();
    config
}

#[tokio::test]
async fn test_sqlite_cache_survives_restart() {
    let temp = TempDir::new().unwrap();
    let config = sqlite_config(&temp);
    let request = SearchRequest::new("visa processing", "tenant-a", vec![0.3, 0.1]).with_limit(5);

    let first_ids: Vec<String> = {
        let search = HybridSearchOrchestrator::from_config(
            &config,
            Arc::new(FixedIndex(corpus())),
            Arc::new(FixedIndex(corpus())),
        )
        .unwrap();
        let response = search.search(&request).await.unwrap();
        assert!(!response.meta.cache_hit);
        response.results.iter().map(|c| c.id.clone()).collect()
    };

    let search = HybridSearchOrchestrator::from_config(
        &config,
        Arc::new(FixedIndex(Vec::new())),
        Arc::new(FixedIndex(Vec::new())),
    )
    .unwrap();
    let response = search.search(&request).await.unwrap();

    assert!(response.meta.cache_hit);
    let ids: Vec<String> = response.results.iter().map(|c| c.id.clone()).collect();
    assert_eq!(ids, first_ids);
}

#[tokio::test]
async fn test_sqlite_cache_layer_compresses_and_overwrites() {
    let temp = TempDir::new().unwrap();
    let store = Arc::new(SqliteCacheStore::new(&temp.path().join("cache.sqlite"), 256).unwrap());
    let metrics = Arc::new(MetricsCollector::new());
    let settings = CacheSettings {
        read_timeout: Duration::from_secs(2),
        write_timeout: Duration::from_secs(2),
        ..Default::default()
    };
    let cache = CacheLayer::new(
        Arc::clone(&store) as Arc<dyn CacheStore>,
        Arc::clone(&metrics),
        settings,
    );
    let params = CacheParams::new(8, true);
    let results = corpus();

    cache
        .store("visa", "tenant-a", &params, &results, Some(Duration::from_secs(3600)))
        .await;
    cache
        .store("visa", "tenant-a", &params, &results, Some(Duration::from_secs(60)))
        .await;

    let stats = store.stats().await.unwrap();
    assert_eq!(stats.entry_count, 1);
    assert_eq!(stats.compressed_count, 1);

    let cached = cache.lookup("VISA", "tenant-a", &params).await.unwrap();
    assert_eq!(cached, results);
    assert!(cache.lookup("visa", "tenant-b", &params).await.is_none());

    let key = exact_key("visa", "tenant-a", &params);
    assert!(store.get(&key).await.unwrap().is_some());
    assert_eq!(metrics.snapshot().cache_hits, 1);
    assert_eq!(metrics.snapshot().cache_misses, 1);
}
