//! Cache key derivation for both tiers
//!
//! L1 keys identify an exact (normalized) query; L2 keys identify a coarse
//! region of embedding space. Both hash their inputs with BLAKE3 and keep
//! 32 hex characters, so every key has a fixed width regardless of input.

use serde::{Deserialize, Serialize};

const L1_PREFIX: &str = "hybrid";
const L2_PREFIX: &str = "bucket";

/// Request parameters that change the cached result list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheParams {
    pub limit: usize,
    pub rerank: bool,
}

impl CacheParams {
    pub fn new(limit: usize, rerank: bool) -> Self {
        Self { limit, rerank }
    }

    fn fingerprint(&self) -> String {
        format!("limit={};rerank={}", self.limit, self.rerank)
    }
}

/// How an embedding is collapsed into an L2 bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketSpec {
    /// Leading dimensions that take part in the key
    pub dimensions: usize,
    /// Decimal places kept per dimension
    pub precision: u32,
}

impl Default for BucketSpec {
    fn default() -> Self {
        Self {
            dimensions: 8,
            precision: 1,
        }
    }
}

/// Lower-case and trim a query, collapsing inner whitespace runs
pub fn normalize_query(query: &str) -> String {
    query
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// L1 key: `hybrid:{tenant}:{hash(normalized query, tenant, params)}`
pub fn exact_key(query: &str, tenant: &str, params: &CacheParams) -> String {
    let material = format!(
        "{}\u{1f}{}\u{1f}{}",
        normalize_query(query),
        tenant,
        params.fingerprint()
    );
    format!("{}:{}:{}", L1_PREFIX, tenant, short_hash(material.as_bytes()))
}

/// L2 key: `bucket:{tenant}:{hash(rounded embedding prefix)}`
///
/// Coarser precision or fewer dimensions merge more paraphrases into one
/// bucket (more hits, more false positives); finer settings do the reverse.
pub fn bucket_key(tenant: &str, embedding: &[f64], spec: &BucketSpec) -> String {
    let scale = 10f64.powi(spec.precision as i32);
    let bucket = embedding
        .iter()
        .take(spec.dimensions)
        .map(|v| ((v * scale).round() as i64).to_string())
        .collect::<Vec<_>>()
        .join(",");

    let material = format!("{}\u{1f}{}\u{1f}{}", tenant, spec.precision, bucket);
    format!("{}:{}:{}", L2_PREFIX, tenant, short_hash(material.as_bytes()))
}

fn short_hash(data: &[u8]) -> String {
    let hash = blake3::hash(data);
    format!("{:.32}", hash.to_hex())
}
