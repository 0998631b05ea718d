use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(pub String);

impl WorkerId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for WorkerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle of a cluster session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SessionState {
    /// Created, workers not spawned yet.
    Idle,
    Running,
    /// Shut down; workers have exited and resident data is gone.
    Stopped,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => f.write_str("idle"),
            SessionState::Running => f.write_str("running"),
            SessionState::Stopped => f.write_str("stopped"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum WorkerState {
    Running,
    Stopped,
}

/// Represents a single worker of the session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerInfo {
    pub id: WorkerId,
    pub index: usize,
    pub state: WorkerState,
}

/// Counters for everything that crossed the coordinator -> worker boundary.
#[derive(Debug, Default)]
pub struct TransportStats {
    messages_sent: AtomicU64,
    bytes_sent: AtomicU64,
    replies_received: AtomicU64,
    bytes_received: AtomicU64,
    broadcasts_sent: AtomicU64,
    partitions_sent: AtomicU64,
    function_shipments: AtomicU64,
}

impl TransportStats {
    pub fn record_message(&self, bytes: usize) {
        self.messages_sent.fetch_add(1, Ordering::SeqCst);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::SeqCst);
    }

    pub fn record_reply(&self, bytes: usize) {
        self.replies_received.fetch_add(1, Ordering::SeqCst);
        self.bytes_received.fetch_add(bytes as u64, Ordering::SeqCst);
    }

    /// One broadcast value delivered to `workers` workers.
    pub fn record_broadcast(&self, workers: usize) {
        self.broadcasts_sent
            .fetch_add(workers as u64, Ordering::SeqCst);
    }

    pub fn record_partition(&self) {
        self.partitions_sent.fetch_add(1, Ordering::SeqCst);
    }

    /// A function list shipped to `workers` workers for one run.
    pub fn record_function_shipment(&self, workers: usize) {
        self.function_shipments
            .fetch_add(workers as u64, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> TransportSnapshot {
        TransportSnapshot {
            messages_sent: self.messages_sent.load(Ordering::SeqCst),
            bytes_sent: self.bytes_sent.load(Ordering::SeqCst),
            replies_received: self.replies_received.load(Ordering::SeqCst),
            bytes_received: self.bytes_received.load(Ordering::SeqCst),
            broadcasts_sent: self.broadcasts_sent.load(Ordering::SeqCst),
            partitions_sent: self.partitions_sent.load(Ordering::SeqCst),
            function_shipments: self.function_shipments.load(Ordering::SeqCst),
        }
    }
}

/// Point-in-time copy of `TransportStats`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransportSnapshot {
    pub messages_sent: u64,
    pub bytes_sent: u64,
    pub replies_received: u64,
    pub bytes_received: u64,
    pub broadcasts_sent: u64,
    pub partitions_sent: u64,
    pub function_shipments: u64,
}
