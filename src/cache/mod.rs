//! Two-tier result cache
//!
//! The L1 tier maps an exact (normalized) query to its final result list.
//! The L2 tier maps a coarse embedding bucket to a related-documents list.
//! Both sit on top of a [`CacheStore`]; every failure below this layer is
//! logged and reported to callers as a miss, never as an error.

mod keys;
mod sqlite;
mod store;

pub use keys::{bucket_key, exact_key, normalize_query, BucketSpec, CacheParams};
pub use sqlite::{CachePool, CacheStats, SqliteCacheStore};
pub use store::{CacheStore, MemoryCacheStore, DEFAULT_MEMORY_CAPACITY};

use crate::metrics::MetricsCollector;
use crate::retrieval::Candidate;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache backend error: {0}")]
    Backend(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("IO error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Cache {operation} timed out after {timeout_ms}ms")]
    Timeout {
        operation: &'static str,
        timeout_ms: u64,
    },

    #[error("Background task failed: {0}")]
    Task(String),
}

/// Envelope written to the store for every cached result list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub payload: Vec<Candidate>,
    #[serde(with = "duration_ms")]
    pub ttl: Duration,
    pub created_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(key: impl Into<String>, payload: Vec<Candidate>, ttl: Duration) -> Self {
        Self {
            key: key.into(),
            payload,
            ttl,
            created_at: Utc::now(),
        }
    }

    /// Past its TTL, whether or not the store has evicted it yet
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        // A TTL reaching past the representable calendar never expires
        chrono::Duration::from_std(self.ttl)
            .ok()
            .and_then(|ttl| self.created_at.checked_add_signed(ttl))
            .map_or(false, |deadline| now >= deadline)
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Timing and bucketing knobs for a [`CacheLayer`]
#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub default_ttl: Duration,
    /// Upper bound applied to every TTL handed to the store
    pub max_ttl: Duration,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub bucket: BucketSpec,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(3600),
            max_ttl: Duration::from_secs(24 * 3600),
            read_timeout: Duration::from_millis(20),
            write_timeout: Duration::from_millis(50),
            bucket: BucketSpec::default(),
        }
    }
}

/// Key derivation, serialization and failure policy over a [`CacheStore`]
pub struct CacheLayer {
    store: Arc<dyn CacheStore>,
    metrics: Arc<MetricsCollector>,
    settings: CacheSettings,
}

impl CacheLayer {
    pub fn new(
        store: Arc<dyn CacheStore>,
        metrics: Arc<MetricsCollector>,
        settings: CacheSettings,
    ) -> Self {
        Self {
            store,
            metrics,
            settings,
        }
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    /// L1 read for an exact query
    pub async fn lookup(
        &self,
        query: &str,
        tenant: &str,
        params: &CacheParams,
    ) -> Option<Vec<Candidate>> {
        let key = exact_key(query, tenant, params);
        self.read(&key).await
    }

    /// L1 write; `ttl` falls back to the configured default
    pub async fn store(
        &self,
        query: &str,
        tenant: &str,
        params: &CacheParams,
        results: &[Candidate],
        ttl: Option<Duration>,
    ) {
        let key = exact_key(query, tenant, params);
        self.write(key, results, ttl).await;
    }

    /// L2 read for the bucket an embedding falls into
    pub async fn lookup_bucket(&self, tenant: &str, embedding: &[f64]) -> Option<Vec<Candidate>> {
        let key = bucket_key(tenant, embedding, &self.settings.bucket);
        self.read(&key).await
    }

    pub async fn store_bucket(
        &self,
        tenant: &str,
        embedding: &[f64],
        results: &[Candidate],
        ttl: Option<Duration>,
    ) {
        let key = bucket_key(tenant, embedding, &self.settings.bucket);
        self.write(key, results, ttl).await;
    }

    /// Drop every entry in the underlying store
    pub async fn flush(&self) -> Result<u64, CacheError> {
        let removed = self.store.flush().await?;
        debug!(removed, "Cache flushed");
        Ok(removed)
    }

    async fn read(&self, key: &str) -> Option<Vec<Candidate>> {
        let result = with_timeout("read", self.settings.read_timeout, self.store.get(key)).await;

        let hit = match result {
            Ok(Some(bytes)) => match serde_json::from_slice::<CacheEntry>(&bytes) {
                Ok(entry) if entry.key != key => {
                    warn!(key, stored = %entry.key, "Cache entry key mismatch, ignoring");
                    None
                }
                Ok(entry) if entry.is_expired(Utc::now()) => {
                    debug!(key, "Cache entry past its TTL");
                    None
                }
                Ok(entry) => Some(entry.payload),
                Err(e) => {
                    warn!(key, "Undecodable cache entry: {}", e);
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(key, "Cache read failed: {}", e);
                None
            }
        };

        if hit.is_some() {
            self.metrics.record_cache_hit();
            debug!(key, "Cache hit");
        } else {
            self.metrics.record_cache_miss();
            debug!(key, "Cache miss");
        }
        hit
    }

    async fn write(&self, key: String, results: &[Candidate], ttl: Option<Duration>) {
        let ttl = ttl
            .unwrap_or(self.settings.default_ttl)
            .min(self.settings.max_ttl);
        let entry = CacheEntry::new(key, results.to_vec(), ttl);

        let bytes = match serde_json::to_vec(&entry) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(key = %entry.key, "Failed to encode cache entry: {}", e);
                return;
            }
        };

        match with_timeout(
            "write",
            self.settings.write_timeout,
            self.store.set(&entry.key, bytes, ttl),
        )
        .await
        {
            Ok(()) => debug!(key = %entry.key, ttl_ms = %ttl.as_millis(), "Cache write"),
            Err(e) => warn!(key = %entry.key, "Cache write failed: {}", e),
        }
    }
}

async fn with_timeout<T, F>(operation: &'static str, limit: Duration, fut: F) -> Result<T, CacheError>
where
    F: Future<Output = Result<T, CacheError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(CacheError::Timeout {
            operation,
            timeout_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
        }),
    }
}
