//! Error types for the annotator.
//!
//! Every variant carries the context needed to reproduce the failure without
//! re-running the whole pipeline: split, cache key, function and candidate key.

use crate::candidate::types::{CandidateKey, Split};
use crate::storage::cache::CacheKey;
use thiserror::Error;

/// Result type for annotator operations.
pub type Result<T> = std::result::Result<T, AnnotatorError>;

/// Error type for annotator operations.
#[derive(Error, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum AnnotatorError {
    /// A value could not cross the worker boundary.
    #[error("Serialization error ({context}): {message}")]
    Serialization { context: String, message: String },

    /// Broadcast attempted without a running cluster session.
    #[error("Broadcast unavailable: cluster session is {state}")]
    BroadcastUnavailable { state: String },

    /// The cached partitioning no longer matches the candidate collection.
    #[error(
        "Stale cache for {key}: cached version {cached_version:#x} ({cached_rows} rows), \
         current version {current_version:#x} ({current_rows} rows)"
    )]
    StaleCache {
        key: CacheKey,
        cached_version: u64,
        cached_rows: usize,
        current_version: u64,
        current_rows: usize,
    },

    /// A labeling function faulted on a candidate.
    #[error(
        "Labeling function '{function}' failed on candidate {candidate} (split {split}, cache {cache_key}): {message}"
    )]
    LfExecution {
        function: String,
        candidate: CandidateKey,
        split: Split,
        cache_key: CacheKey,
        message: String,
    },

    /// Assembly found a duplicate or out-of-range coordinate.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// A function name that is not registered on the workers.
    #[error("Unknown labeling function: {0}")]
    UnknownFunction(String),

    /// A broadcast handle that the worker does not hold.
    #[error("Unknown broadcast resource: {0}")]
    UnknownResource(u64),

    /// No cached candidate set exists for the key.
    #[error("No cached candidate set for {0}")]
    CacheMiss(CacheKey),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A worker mailbox is closed or the worker dropped its reply.
    #[error("Worker unavailable: {0}")]
    WorkerUnavailable(String),

    /// The run was aborted before all partitions reported.
    #[error("Labeling run {0} was cancelled")]
    Cancelled(String),
}

impl AnnotatorError {
    /// Create a serialization error.
    pub fn serialization(context: impl Into<String>, err: impl std::fmt::Display) -> Self {
        AnnotatorError::Serialization {
            context: context.into(),
            message: err.to_string(),
        }
    }

    /// Create an invariant violation.
    pub fn invariant(msg: impl Into<String>) -> Self {
        AnnotatorError::InvariantViolation(msg.into())
    }

    /// Create an invalid input error.
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        AnnotatorError::InvalidInput(msg.into())
    }

    /// Create a worker unavailable error.
    pub fn worker_unavailable(msg: impl Into<String>) -> Self {
        AnnotatorError::WorkerUnavailable(msg.into())
    }

    /// Whether the caller can recover by re-preparing the candidate set.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            AnnotatorError::StaleCache { .. } | AnnotatorError::CacheMiss(_)
        )
    }
}
