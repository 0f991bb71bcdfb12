//! Persistent cache store on SQLite
//!
//! Entries survive process restarts, which keeps the L1 tier warm across
//! deploys. Large payloads are zstd-compressed before they hit the table.

use crate::cache::{CacheError, CacheStore};
use async_trait::async_trait;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};
use std::path::Path;
use std::time::Duration;

/// Cache connection pool
pub type CachePool = Pool<SqliteConnectionManager>;

/// SQLite-backed [`CacheStore`] with migration support
#[derive(Clone)]
pub struct SqliteCacheStore {
    pool: CachePool,
    compression_threshold: usize,
}

/// Cache table statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub entry_count: usize,
    pub expired_count: usize,
    pub compressed_count: usize,
    pub total_size_bytes: u64,
}

impl SqliteCacheStore {
    /// Open (or create) a cache database
    pub fn new(db_path: &Path, compression_threshold: usize) -> Result<Self, CacheError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| CacheError::Io {
                source: e,
                context: format!("Failed to create cache directory: {:?}", parent),
            })?;
        }

        let manager = SqliteConnectionManager::file(db_path);
        let pool = Pool::builder().max_size(16).build(manager)?;

        {
            let conn = pool.get()?;

            // WAL lets readers proceed while a write is in flight
            conn.execute_batch(
                "
                PRAGMA journal_mode = WAL;
                PRAGMA synchronous = NORMAL;
                PRAGMA busy_timeout = 5000;
                ",
            )?;
        }

        let store = Self {
            pool,
            compression_threshold,
        };
        store.migrate()?;

        Ok(store)
    }

    fn migrate(&self) -> Result<(), CacheError> {
        let conn = self.pool.get()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS _migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            )",
            [],
        )?;

        let current_version: i32 = conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM _migrations",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);

        for (version, migration) in MIGRATIONS.iter().enumerate() {
            let version = version as i32 + 1;

            if version > current_version {
                tracing::info!("Applying cache migration {}", version);

                conn.execute_batch(migration)?;
                conn.execute(
                    "INSERT INTO _migrations (version, applied_at) VALUES (?1, datetime('now'))",
                    params![version],
                )?;
            }
        }

        Ok(())
    }

    /// Run a blocking closure against a pooled connection off the async workers
    async fn with_conn<T, F>(&self, f: F) -> Result<T, CacheError>
    where
        T: Send + 'static,
        F: FnOnce(&rusqlite::Connection) -> Result<T, CacheError> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get()?;
            f(&*conn)
        })
        .await
        .map_err(|e| CacheError::Task(e.to_string()))?
    }

    /// Delete entries whose TTL has elapsed
    pub async fn purge_expired(&self) -> Result<u64, CacheError> {
        self.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM cache_entries WHERE expires_at <= ?1",
                params![now_millis()],
            )?;
            Ok(removed as u64)
        })
        .await
    }

    pub async fn stats(&self) -> Result<CacheStats, CacheError> {
        self.with_conn(|conn| {
            let now = now_millis();
            let entry_count: i64 =
                conn.query_row("SELECT COUNT(*) FROM cache_entries", [], |row| row.get(0))?;
            let expired_count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM cache_entries WHERE expires_at <= ?1",
                params![now],
                |row| row.get(0),
            )?;
            let compressed_count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM cache_entries WHERE compressed = 1",
                [],
                |row| row.get(0),
            )?;
            let total_size: i64 = conn.query_row(
                "SELECT COALESCE(SUM(LENGTH(value)), 0) FROM cache_entries",
                [],
                |row| row.get(0),
            )?;

            Ok(CacheStats {
                entry_count: entry_count as usize,
                expired_count: expired_count as usize,
                compressed_count: compressed_count as usize,
                total_size_bytes: total_size as u64,
            })
        })
        .await
    }
}

#[async_trait]
impl CacheStore for SqliteCacheStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            let row: Option<(Vec<u8>, bool)> = conn
                .query_row(
                    "SELECT value, compressed FROM cache_entries
                     WHERE key = ?1 AND expires_at > ?2",
                    params![key, now_millis()],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;

            match row {
                Some((value, true)) => {
                    let decompressed = zstd::decode_all(&value[..]).map_err(|e| CacheError::Io {
                        source: e,
                        context: format!("Failed to decompress cache entry {}", key),
                    })?;
                    Ok(Some(decompressed))
                }
                Some((value, false)) => Ok(Some(value)),
                None => Ok(None),
            }
        })
        .await
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        let key = key.to_string();
        let threshold = self.compression_threshold;
        self.with_conn(move |conn| {
            let should_compress = value.len() >= threshold;
            let stored = if should_compress {
                zstd::encode_all(&value[..], 3).map_err(|e| CacheError::Io {
                    source: e,
                    context: "Failed to compress cache entry".to_string(),
                })?
            } else {
                value
            };

            let now = now_millis();
            let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
            let expires_at = now.saturating_add(ttl_ms);
            conn.execute(
                "INSERT INTO cache_entries (key, value, compressed, created_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(key) DO UPDATE SET
                    value = excluded.value,
                    compressed = excluded.compressed,
                    created_at = excluded.created_at,
                    expires_at = excluded.expires_at",
                params![key, stored, should_compress, now, expires_at],
            )?;
            Ok(())
        })
        .await
    }

    async fn flush(&self) -> Result<u64, CacheError> {
        self.with_conn(|conn| {
            let removed = conn.execute("DELETE FROM cache_entries", [])?;
            Ok(removed as u64)
        })
        .await
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Cache migrations (each string is one migration)
const MIGRATIONS: &[&str] = &[
    // Migration 1: Initial schema
    r#"
    CREATE TABLE cache_entries (
        key TEXT PRIMARY KEY,
        value BLOB NOT NULL,
        compressed BOOLEAN NOT NULL,
        created_at INTEGER NOT NULL,
        expires_at INTEGER NOT NULL
    );

    CREATE INDEX idx_cache_entries_expires_at ON cache_entries(expires_at);
    "#,
];
