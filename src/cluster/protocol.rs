//! Worker Wire Protocol
//!
//! Defines the messages exchanged between the coordinator and workers.
//! Both directions are encoded with bincode, so everything a worker sees has
//! crossed a real serialization boundary.

use crate::broadcast::types::BroadcastId;
use crate::candidate::types::Candidate;
use crate::error::{AnnotatorError, Result};
use crate::executor::types::{FailureMode, PartitionRows, RunId};
use crate::storage::cache::CacheKey;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

/// One candidate together with its stable row index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PartitionRow {
    pub row: u64,
    pub candidate: Candidate,
}

/// The candidates of one partition, in ascending row order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PartitionPayload {
    pub partition: u32,
    pub rows: Vec<PartitionRow>,
}

/// Coordinator -> worker messages.
///
/// - `StoreBroadcast/DropBroadcast`: resident read-only resources.
/// - `StorePartition/EvictCache`: resident candidate partitions of a cached set.
/// - `Apply/CancelRun`: one labeling run over the worker's partitions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WorkerMessage {
    StoreBroadcast {
        id: BroadcastId,
        bytes: Vec<u8>,
    },

    DropBroadcast {
        id: BroadcastId,
    },

    StorePartition {
        cache_key: CacheKey,
        version: u64,
        payload: PartitionPayload,
    },

    EvictCache {
        cache_key: CacheKey,
    },

    Apply {
        run_id: RunId,
        cache_key: CacheKey,
        version: u64,
        partitions: Vec<u32>,
        functions: Vec<String>,
        mode: FailureMode,
        max_abs_vote: i32,
    },

    CancelRun {
        run_id: RunId,
    },

    Shutdown,
}

impl WorkerMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            WorkerMessage::StoreBroadcast { .. } => "store_broadcast",
            WorkerMessage::DropBroadcast { .. } => "drop_broadcast",
            WorkerMessage::StorePartition { .. } => "store_partition",
            WorkerMessage::EvictCache { .. } => "evict_cache",
            WorkerMessage::Apply { .. } => "apply",
            WorkerMessage::CancelRun { .. } => "cancel_run",
            WorkerMessage::Shutdown => "shutdown",
        }
    }
}

/// Worker -> coordinator replies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WorkerReply {
    Ack,
    Applied { partitions: Vec<PartitionRows> },
    Failed { message: String },
}

/// What actually travels through a worker mailbox.
pub struct Envelope {
    pub payload: Vec<u8>,
    pub reply: Option<oneshot::Sender<Vec<u8>>>,
}

pub fn encode<T: Serialize>(context: &str, value: &T) -> Result<Vec<u8>> {
    bincode::serialize(value).map_err(|e| AnnotatorError::serialization(context, e))
}

pub fn decode<T: DeserializeOwned>(context: &str, bytes: &[u8]) -> Result<T> {
    bincode::deserialize(bytes).map_err(|e| AnnotatorError::serialization(context, e))
}
