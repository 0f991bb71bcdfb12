//! Collaborator interfaces for the two retrieval branches
//!
//! The pipeline never builds queries for the underlying document store. It
//! only talks to these narrow traits, which the surrounding system
//! implements on top of whatever vector and full-text engines it runs.

use crate::retrieval::Candidate;
use async_trait::async_trait;
use std::fmt;
use thiserror::Error;

/// One of the two concurrent retrieval branches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Branch {
    Semantic,
    Keyword,
}

impl fmt::Display for Branch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Branch::Semantic => f.write_str("semantic"),
            Branch::Keyword => f.write_str("keyword"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RetrievalError {
    #[error("{branch} search failed: {message}")]
    Backend { branch: Branch, message: String },

    #[error("{branch} search timed out after {timeout_ms}ms")]
    Timeout { branch: Branch, timeout_ms: u64 },

    #[error("{branch} search cancelled: request budget exhausted")]
    BudgetExhausted { branch: Branch },

    #[error("{branch} search skipped: {reason}")]
    Skipped { branch: Branch, reason: String },
}

impl RetrievalError {
    /// Build a backend failure for a collaborator error message
    pub fn backend(branch: Branch, message: impl Into<String>) -> Self {
        Self::Backend {
            branch,
            message: message.into(),
        }
    }

    pub fn branch(&self) -> Branch {
        match self {
            Self::Backend { branch, .. }
            | Self::Timeout { branch, .. }
            | Self::BudgetExhausted { branch }
            | Self::Skipped { branch, .. } => *branch,
        }
    }
}

/// Nearest-neighbour search over document embeddings
///
/// Implementations return candidates sorted by descending similarity.
#[async_trait]
pub trait SemanticIndex: Send + Sync {
    async fn search(
        &self,
        embedding: &[f64],
        tenant: &str,
        limit: usize,
    ) -> Result<Vec<Candidate>, RetrievalError>;
}

/// Full-text search over the same document store
///
/// Implementations return candidates sorted by descending keyword relevance.
#[async_trait]
pub trait KeywordIndex: Send + Sync {
    async fn search(
        &self,
        text: &str,
        tenant: &str,
        limit: usize,
    ) -> Result<Vec<Candidate>, RetrievalError>;
}
