use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the hybrid search crate
#[derive(Error, Debug)]
pub enum HybridError {
    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration validation errors
    #[error("Configuration validation failed: {errors:?}")]
    ConfigValidation { errors: Vec<ValidationError> },

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    /// Invalid configuration value
    #[error("Invalid configuration value at {path}: {message}")]
    InvalidConfigValue { path: String, message: String },

    /// The caller did not supply a query embedding
    #[error("Query embedding is missing or empty; semantic search cannot proceed")]
    EmbeddingMissing,

    /// Malformed search request
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Cache store errors (only surfaced by administrative operations)
    #[error("Cache error: {0}")]
    Cache(#[from] crate::cache::CacheError),

    /// IO errors
    #[error("IO error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },

    /// TOML deserialization errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization errors
    #[error("TOML serialization error: {0}")]
    TomlSerialization(#[from] toml::ser::Error),

    /// Generic errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Configuration validation error
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// Path to the configuration key that failed validation
    pub path: String,
    /// Error message describing the validation failure
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result type for hybrid search operations
pub type Result<T> = std::result::Result<T, HybridError>;
