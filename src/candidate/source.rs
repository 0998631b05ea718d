//! Candidate Sources
//!
//! Boundary to the session/store that owns candidates. The annotator only needs
//! an ordered enumeration of one split; everything else about the store stays outside.

use super::types::{Candidate, CandidateKey, Split};
use crate::error::Result;

use dashmap::DashMap;

/// Supplies the candidates of a split.
pub trait CandidateSource: Send + Sync {
    /// Returns every candidate of `split`. Order is not significant; the
    /// candidate set sorts by key.
    fn fetch(&self, split: &Split) -> Result<Vec<Candidate>>;
}

/// In-memory store, keyed by split then candidate key.
#[derive(Default)]
pub struct InMemoryCandidateStore {
    splits: DashMap<Split, DashMap<CandidateKey, Candidate>>,
}

impl InMemoryCandidateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a candidate; a candidate with the same key in the same split is replaced.
    pub fn insert(&self, candidate: Candidate) {
        let split_map = self
            .splits
            .entry(candidate.split.clone())
            .or_insert_with(DashMap::new);
        split_map.insert(candidate.key, candidate);
    }

    pub fn extend(&self, candidates: impl IntoIterator<Item = Candidate>) {
        for candidate in candidates {
            self.insert(candidate);
        }
    }

    pub fn remove(&self, split: &Split, key: CandidateKey) -> Option<Candidate> {
        self.splits
            .get(split)
            .and_then(|split_map| split_map.remove(&key).map(|(_, c)| c))
    }

    pub fn len(&self, split: &Split) -> usize {
        self.splits.get(split).map(|m| m.len()).unwrap_or(0)
    }

    pub fn splits(&self) -> Vec<Split> {
        let mut splits: Vec<Split> = self.splits.iter().map(|e| e.key().clone()).collect();
        splits.sort();
        splits
    }
}

impl CandidateSource for InMemoryCandidateStore {
    fn fetch(&self, split: &Split) -> Result<Vec<Candidate>> {
        match self.splits.get(split) {
            Some(split_map) => Ok(split_map.iter().map(|e| e.value().clone()).collect()),
            None => {
                tracing::debug!("No candidates stored for split {}", split);
                Ok(Vec::new())
            }
        }
    }
}
