//! Key/value stores backing the cache layer

use crate::cache::CacheError;
use async_trait::async_trait;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Entry cap used when none is configured
pub const DEFAULT_MEMORY_CAPACITY: usize = 10_000;

/// External key/value cache with per-key TTL
///
/// Writes are plain overwrites: setting an existing key replaces both its
/// value and its TTL.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Read a live value; expired keys read as `None`
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError>;

    /// Drop every entry, returning how many were removed
    async fn flush(&self) -> Result<u64, CacheError>;
}

struct MemoryEntry {
    value: Vec<u8>,
    /// `None` when the TTL reaches past what `Instant` can represent
    expires_at: Option<Instant>,
}

impl MemoryEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// In-process cache store, bounded by least-recently-used eviction
pub struct MemoryCacheStore {
    entries: Mutex<LruCache<String, MemoryEntry>>,
}

impl MemoryCacheStore {
    /// Store holding at most `capacity` entries (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub async fn capacity(&self) -> usize {
        self.entries.lock().await.cap().get()
    }

    /// Time left before `key` expires, if it is live
    pub async fn remaining_ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        let entries = self.entries.lock().await;
        let entry = entries.peek(key).filter(|entry| entry.is_live(now))?;
        Some(
            entry
                .expires_at
                .map_or(Duration::MAX, |at| at.saturating_duration_since(now)),
        )
    }

    /// Remove expired entries, returning how many were dropped
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| !entry.is_live(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            entries.pop(key);
        }
        expired.len()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

impl Default for MemoryCacheStore {
    fn default() -> Self {
        Self::new(DEFAULT_MEMORY_CAPACITY)
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        let found = entries
            .get(key)
            .map(|entry| entry.is_live(now).then(|| entry.value.clone()));
        match found {
            Some(Some(value)) => Ok(Some(value)),
            Some(None) => {
                entries.pop(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        let now = Instant::now();
        let entry = MemoryEntry {
            value,
            expires_at: now.checked_add(ttl),
        };

        let mut entries = self.entries.lock().await;
        // Prefer evicting a dead entry over the least recently used live one
        let full = entries.len() == entries.cap().get() && !entries.contains(key);
        let oldest_live = entries
            .peek_lru()
            .map_or(false, |(_, oldest)| oldest.is_live(now));
        if full && oldest_live {
            let dead = entries
                .iter()
                .find(|(_, entry)| !entry.is_live(now))
                .map(|(key, _)| key.clone());
            if let Some(dead) = dead {
                entries.pop(&dead);
            }
        }
        entries.put(key.to_string(), entry);
        Ok(())
    }

    async fn flush(&self) -> Result<u64, CacheError> {
        let mut entries = self.entries.lock().await;
        let removed = entries.len() as u64;
        entries.clear();
        Ok(removed)
    }
}
