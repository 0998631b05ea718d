//! Labeling Function Statistics Module
//!
//! Derives per-function quality metrics from an assembled label matrix.
//!
//! ## Metrics
//! - **Coverage**: fraction of rows where the function votes.
//! - **Overlap**: fraction of rows where the function votes and at least one other function votes.
//! - **Conflict**: fraction of rows where the function votes and another function votes with a
//!   different sign.
//! - **Empirical accuracy**: with gold labels, the fraction of the function's votes that match.
//!
//! Every fraction is taken over the matrix row count. A matrix with no rows reports
//! `Metric::Undefined` instead of dividing by zero.

pub mod engine;
pub mod types;
