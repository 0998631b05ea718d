//! Label Matrix Module
//!
//! The sparse matrix of weak labels produced by a labeling run, and the
//! assembler that builds it from per-partition results.
//!
//! Rows follow the cached candidate order and columns follow the order of the
//! function list passed to `apply`. Abstain votes are never stored.

pub mod assembler;
pub mod types;
