//! Resource Broadcast Module
//!
//! Makes large read-only reference data (knowledge-base tables, dictionaries)
//! available to every worker exactly once per cluster session.
//!
//! ## Core Concepts
//! - **Handles**: `broadcast` returns a typed `BroadcastHandle<T>`. The handle is just an id,
//!   so it is cheap to capture in labeling function closures and to serialize.
//! - **One Transfer**: The value is encoded once on the coordinator and its bytes are sent to
//!   each worker once, regardless of how many functions or runs use it.
//! - **Lazy Decode**: Workers keep the bytes and decode on first access, caching the decoded value.
//! - **Read-Only Context**: Functions reach resources through an injected `ResourceContext`;
//!   there is no API to mutate a broadcast value in place.

pub mod service;
pub mod store;
pub mod types;
