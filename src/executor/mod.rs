//! Labeling Function Execution Module
//!
//! This module runs labeling functions against cached candidate partitions.
//!
//! ## Architecture Overview
//! 1. **Registration**: Functions are registered by name in the `LfRegistry`, which every worker
//!    shares the way deployed code is shared.
//! 2. **Shipping**: A labeling run ships only the ordered list of names. Position in that list is
//!    the column of the label matrix.
//! 3. **Evaluation**: Each worker evaluates its resident partitions in parallel on the blocking
//!    pool, emitting only non-abstain votes.
//! 4. **Faults**: An error or panic in a function is never silently turned into an abstain. In
//!    fail-fast mode (default) it aborts the run; in isolated mode the cell abstains and the
//!    fault is logged and returned.
//!
//! ## Submodules
//! - **`registry`**: Maps function names to closures; builds combined functions.
//! - **`dispatcher`**: Worker-side partition evaluation and coordinator-side run dispatch.
//! - **`types`**: Votes, failure modes, faults and per-partition results.

pub mod dispatcher;
pub mod registry;
pub mod types;
