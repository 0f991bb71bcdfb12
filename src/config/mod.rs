//! Configuration management for hybrid search
//!
//! Handles loading, validation, profile overlays and environment overrides.
//! Durations are kept as human strings (`"250ms"`, `"1h"`) in the file and
//! parsed with [`parse_duration`] when the pipeline is assembled.

use crate::error::{HybridError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

mod validator;

pub use validator::ConfigValidator;

/// Schema version understood by this build
pub const SCHEMA_VERSION: &str = "1.0.0";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "_meta")]
    pub meta: MetaConfig,
    pub retrieval: RetrievalConfig,
    pub fusion: FusionSettings,
    pub rerank: RerankConfig,
    pub cache: CacheConfig,
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub profiles: HashMap<String, ProfileOverrides>,
}

/// Metadata about the configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaConfig {
    pub schema_version: String,
    #[serde(default = "current_timestamp")]
    pub created_at: String,
    #[serde(default = "current_timestamp")]
    pub last_modified: String,
}

fn current_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Parallel retrieval settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Candidates requested from each branch before fusion
    pub per_branch_limit: usize,
    pub semantic_timeout: String,
    pub keyword_timeout: String,
}

/// Reciprocal Rank Fusion parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusionSettings {
    pub rrf_k: f64,
    pub semantic_weight: f64,
    pub keyword_weight: f64,
    /// Number of fused candidates handed to the reranker
    pub pool_size: usize,
}

/// Reranker settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankConfig {
    pub enabled: bool,
    /// "noop" or "cross-encoder"
    pub scorer: String,
    pub model: String,
    /// Maximum number of candidates sent to the scorer
    pub pool_size: usize,
    pub timeout: String,
}

/// Cache settings for both tiers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// "memory" or "sqlite"
    pub backend: String,
    pub sqlite_path: PathBuf,
    pub default_ttl: String,
    pub related_ttl: String,
    /// Ceiling for any TTL, including per-request overrides
    #[serde(default = "default_max_ttl")]
    pub max_ttl: String,
    /// Entry cap for the in-memory backend
    #[serde(default = "default_memory_capacity")]
    pub memory_capacity: usize,
    pub read_timeout: String,
    pub write_timeout: String,
    /// Leading embedding dimensions folded into the L2 bucket key
    pub bucket_dimensions: usize,
    /// Decimal places kept per dimension in the L2 bucket key
    pub bucket_precision: u32,
    /// Payloads at least this large are zstd-compressed by the SQLite store
    pub compression_threshold: usize,
}

fn default_max_ttl() -> String {
    "24h".to_string()
}

fn default_memory_capacity() -> usize {
    crate::cache::DEFAULT_MEMORY_CAPACITY
}

/// End-to-end pipeline policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub request_budget: String,
    pub default_limit: usize,
    /// "reject" or "keyword_only"
    pub missing_embedding: String,
}

/// Profile-specific configuration overrides
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rerank_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rerank_scorer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_budget: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub per_branch_limit: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_backend: Option<String>,
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(HybridError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| HybridError::Io {
            source: e,
            context: format!("Failed to read config file: {:?}", path),
        })?;
        let mut config: Config = toml::from_str(&content)?;

        config.apply_env_overrides();

        ConfigValidator::validate(&config)?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| HybridError::Io {
                source: e,
                context: format!("Failed to create config directory: {:?}", parent),
            })?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| HybridError::Io {
            source: e,
            context: format!("Failed to write config file: {:?}", path),
        })?;
        Ok(())
    }

    /// Load configuration with a specific profile applied
    pub fn load_with_profile(path: &Path, profile: &str) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_profile(profile)?;
        ConfigValidator::validate(&config)?;
        Ok(config)
    }

    /// Apply a profile's overrides to the configuration
    pub fn apply_profile(&mut self, profile: &str) -> Result<()> {
        let overrides = self
            .profiles
            .get(profile)
            .cloned()
            .ok_or_else(|| HybridError::Config(format!("Unknown profile: {}", profile)))?;

        if let Some(enabled) = overrides.rerank_enabled {
            self.rerank.enabled = enabled;
        }
        if let Some(scorer) = overrides.rerank_scorer {
            self.rerank.scorer = scorer;
        }
        if let Some(budget) = overrides.request_budget {
            self.pipeline.request_budget = budget;
        }
        if let Some(limit) = overrides.per_branch_limit {
            self.retrieval.per_branch_limit = limit;
        }
        if let Some(backend) = overrides.cache_backend {
            self.cache.backend = backend;
        }
        Ok(())
    }

    /// Apply environment variable overrides
    /// Environment variables in format: HYBRID_SECTION__KEY=value
    pub fn apply_env_overrides(&mut self) {
        for (key, value) in std::env::vars() {
            if let Some(config_key) = key.strip_prefix("HYBRID_") {
                if let Err(e) = self.set_value_from_env(config_key, &value) {
                    tracing::warn!("Failed to apply env override {}: {}", key, e);
                }
            }
        }
    }

    fn set_value_from_env(&mut self, path: &str, value: &str) -> Result<()> {
        match path {
            "RERANK__ENABLED" => {
                self.rerank.enabled = parse_env(path, value)?;
            }
            "RERANK__SCORER" => {
                self.rerank.scorer = value.to_string();
            }
            "FUSION__RRF_K" => {
                self.fusion.rrf_k = parse_env(path, value)?;
            }
            "RETRIEVAL__PER_BRANCH_LIMIT" => {
                self.retrieval.per_branch_limit = parse_env(path, value)?;
            }
            "CACHE__BACKEND" => {
                self.cache.backend = value.to_string();
            }
            "CACHE__SQLITE_PATH" => {
                self.cache.sqlite_path = PathBuf::from(value);
            }
            "CACHE__DEFAULT_TTL" => {
                self.cache.default_ttl = value.to_string();
            }
            "CACHE__MAX_TTL" => {
                self.cache.max_ttl = value.to_string();
            }
            "CACHE__MEMORY_CAPACITY" => {
                self.cache.memory_capacity = parse_env(path, value)?;
            }
            "PIPELINE__DEFAULT_LIMIT" => {
                self.pipeline.default_limit = parse_env(path, value)?;
            }
            "PIPELINE__REQUEST_BUDGET" => {
                self.pipeline.request_budget = value.to_string();
            }
            "PIPELINE__MISSING_EMBEDDING" => {
                self.pipeline.missing_embedding = value.to_string();
            }
            _ => {
                tracing::debug!("Unknown env config key: {}", path);
            }
        }
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| HybridError::Config("Cannot determine config directory".to_string()))?;

        Ok(config_dir.join("hybrid-search").join("config.toml"))
    }
}

fn parse_env<T: std::str::FromStr>(path: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| HybridError::InvalidConfigValue {
        path: path.to_string(),
        message: format!("Cannot parse '{}'", value),
    })
}

/// Parse a duration string such as `"250ms"`, `"5s"`, `"10m"` or `"1h"`.
/// A bare number is read as seconds.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    let invalid = || HybridError::InvalidConfigValue {
        path: "duration".to_string(),
        message: format!("Invalid duration format: '{}'", s),
    };

    let (digits, unit) = match s.find(|c: char| !c.is_ascii_digit()) {
        Some(idx) => s.split_at(idx),
        None => (s, "s"),
    };
    if digits.is_empty() {
        return Err(invalid());
    }
    let amount: u64 = digits.parse().map_err(|_| invalid())?;

    let secs = |scale: u64| {
        amount
            .checked_mul(scale)
            .map(Duration::from_secs)
            .ok_or_else(invalid)
    };
    match unit {
        "ms" => Ok(Duration::from_millis(amount)),
        "s" => Ok(Duration::from_secs(amount)),
        "m" => secs(60),
        "h" => secs(3600),
        _ => Err(invalid()),
    }
}

/// Expand a leading `~` to the user's home directory
pub fn expand_path(path: &Path) -> Result<PathBuf> {
    match path.strip_prefix("~") {
        Ok(rest) => {
            let home = dirs::home_dir()
                .ok_or_else(|| HybridError::Config("Cannot determine home directory".to_string()))?;
            Ok(home.join(rest))
        }
        Err(_) => Ok(path.to_path_buf()),
    }
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = PathBuf::from("~/.hybrid-search");

        let mut profiles = HashMap::new();
        profiles.insert(
            "fast".to_string(),
            ProfileOverrides {
                rerank_enabled: Some(false),
                request_budget: Some("120ms".to_string()),
                per_branch_limit: Some(20),
                ..Default::default()
            },
        );
        profiles.insert(
            "accuracy".to_string(),
            ProfileOverrides {
                rerank_enabled: Some(true),
                rerank_scorer: Some("cross-encoder".to_string()),
                request_budget: Some("800ms".to_string()),
                ..Default::default()
            },
        );

        Self {
            meta: MetaConfig {
                schema_version: SCHEMA_VERSION.to_string(),
                created_at: current_timestamp(),
                last_modified: current_timestamp(),
            },
            retrieval: RetrievalConfig {
                per_branch_limit: 30,
                semantic_timeout: "150ms".to_string(),
                keyword_timeout: "150ms".to_string(),
            },
            fusion: FusionSettings {
                rrf_k: 60.0,
                semantic_weight: 0.7,
                keyword_weight: 0.3,
                pool_size: 30,
            },
            rerank: RerankConfig {
                enabled: true,
                scorer: "noop".to_string(),
                model: "BAAI/bge-reranker-base".to_string(),
                pool_size: 30,
                timeout: "80ms".to_string(),
            },
            cache: CacheConfig {
                backend: "memory".to_string(),
                sqlite_path: data_dir.join("cache.sqlite"),
                default_ttl: "1h".to_string(),
                related_ttl: "15m".to_string(),
                max_ttl: default_max_ttl(),
                memory_capacity: default_memory_capacity(),
                read_timeout: "20ms".to_string(),
                write_timeout: "50ms".to_string(),
                bucket_dimensions: 8,
                bucket_precision: 1,
                compression_threshold: 1024,
            },
            pipeline: PipelineConfig {
                request_budget: "250ms".to_string(),
                default_limit: 12,
                missing_embedding: "reject".to_string(),
            },
            profiles,
        }
    }
}
