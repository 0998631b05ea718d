//! Annotator Service Module
//!
//! The public surface of the engine. An `Annotator` owns one cluster session
//! and wires the components together:
//!
//! 1. **Broadcast**: `broadcast` ships read-only resources to every worker once.
//! 2. **Prepare**: `prepare` partitions a candidate set and caches it on the workers.
//! 3. **Apply**: `apply` ships an ordered function list, gathers per-partition rows and
//!    assembles the label matrix.
//! 4. **Stats**: `lf_stats` / `report` derive function quality metrics from the matrix.
//!
//! ## Submodules
//! - **`service`**: The `Annotator` itself.
//! - **`handlers`**: HTTP request handlers for the Axum web server.
//! - **`protocol`**: Request/response DTOs and endpoint paths of the HTTP surface.

pub mod handlers;
pub mod protocol;
pub mod service;

#[cfg(test)]
mod tests;
