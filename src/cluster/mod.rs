//! Cluster Runtime Module
//!
//! Provides the worker pool the annotator runs on: a coordinator-owned
//! `ClusterSession` and N workers, each with its own mailbox.
//!
//! ## Core Mechanisms
//! - **Wire Boundary**: Every coordinator -> worker message is a bincode-encoded `WorkerMessage`
//!   and every reply a bincode-encoded `WorkerReply`. Nothing is shared by reference across the
//!   boundary except the labeling function registry, which plays the role of deployed code.
//! - **Transport Accounting**: `TransportStats` counts messages, bytes, broadcasts, partitions
//!   and function shipments, making the "ship data once, ship code per run" contract observable.
//! - **Worker Loop**: Workers decode messages in order, keep candidate partitions and broadcast
//!   resources resident, and evaluate labeling runs on the blocking pool.

pub mod protocol;
pub mod service;
pub mod types;
pub mod worker;

#[cfg(test)]
mod tests;
