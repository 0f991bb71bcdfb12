//! Candidate deduplication by document ID

use crate::retrieval::Candidate;
use std::collections::HashSet;

/// Deduplicate candidates by id, keeping the first (best-ranked) instance
///
/// # Arguments
/// * `candidates` - Ranked candidates potentially with duplicates
///
/// # Returns
/// Deduplicated candidates, maintaining input order
pub fn deduplicate_candidates(candidates: Vec<Candidate>) -> Vec<Candidate> {
    let mut seen: HashSet<String> = HashSet::new();

    candidates
        .into_iter()
        .filter(|candidate| seen.insert(candidate.id.clone()))
        .collect()
}
