//! Candidate Partitioning & Cache Module
//!
//! Keeps candidate sets resident on workers across labeling runs.
//!
//! ## Core Concepts
//! - **Stable Rows**: Candidates are enumerated in ascending key order; row `i` is the i-th key.
//! - **Partitioning**: Rows are assigned round-robin to a fixed number of partitions
//!   (`row % num_partitions`), and partitions to workers by sorted worker id.
//! - **Caching**: `CandidateCache` maps `(split, set name)` to the partition assignment and a
//!   content version. Re-preparing unchanged content costs no data movement.
//! - **Staleness**: A changed set under a cached key is rejected (`StalePolicy::Reject`) or
//!   re-distributed (`StalePolicy::Invalidate`).

pub mod cache;
pub mod partitioner;
