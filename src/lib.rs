//! Distributed Labeling Function Annotator
//!
//! Runs a set of heuristic labeling functions over a large candidate set on a
//! pool of workers and produces a sparse matrix of weak labels, plus
//! per-function coverage, overlap and conflict statistics.
//!
//! ## Architecture Modules
//! - **`cluster`**: The worker pool. Coordinator and workers talk through bincode-encoded
//!   messages, with transport counters on every transfer.
//! - **`broadcast`**: One-time distribution of read-only resources to every worker.
//! - **`candidate`**: Candidate schema, slot values, candidate sets and sources.
//! - **`storage`**: Partitioning of candidate sets and the session cache that keeps them resident.
//! - **`executor`**: Labeling function registry and the dispatcher that applies functions.
//! - **`matrix`**: The sparse label matrix and its assembler.
//! - **`stats`**: Coverage, overlap, conflict and empirical accuracy.
//! - **`annotator`**: The public `Annotator` facade and its HTTP surface.

pub mod annotator;
pub mod broadcast;
pub mod candidate;
pub mod cluster;
pub mod config;
pub mod error;
pub mod executor;
pub mod matrix;
pub mod stats;
pub mod storage;

#[cfg(test)]
pub(crate) mod testing;

pub use annotator::service::{Annotator, LabelRun};
pub use config::AnnotatorConfig;
pub use error::{AnnotatorError, Result};
pub use executor::types::{FailureMode, Vote};
pub use matrix::assembler::assemble;
pub use stats::engine::{lf_stats, lf_summary};
