//! Query embedding
//!
//! The search pipeline takes a precomputed query vector; callers that only
//! have text use an [`EmbeddingProvider`] to produce one first.

mod provider;

pub use provider::{EmbeddingError, EmbeddingProvider, FastEmbedProvider};
