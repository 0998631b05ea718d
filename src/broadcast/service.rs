use super::types::{BroadcastHandle, BroadcastId, BroadcastRecord};
use crate::cluster::protocol::{WorkerMessage, WorkerReply};
use crate::cluster::service::ClusterSession;
use crate::cluster::types::SessionState;
use crate::error::{AnnotatorError, Result};

use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Coordinator side of the resource broadcast.
#[derive(Default)]
pub struct Broadcaster {
    next_id: AtomicU64,
    live: DashMap<BroadcastId, BroadcastRecord>,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Encodes `value` once and ships the bytes to every worker once.
    ///
    /// # Errors
    /// * `BroadcastUnavailable` if the session is not running.
    /// * `Serialization` if the value cannot be encoded.
    pub async fn broadcast<T>(
        &self,
        session: &Arc<ClusterSession>,
        value: &T,
    ) -> Result<BroadcastHandle<T>>
    where
        T: Serialize,
    {
        let state = session.state().await;
        if state != SessionState::Running {
            return Err(AnnotatorError::BroadcastUnavailable {
                state: state.to_string(),
            });
        }

        let type_name = std::any::type_name::<T>();
        let bytes = bincode::serialize(value)
            .map_err(|e| AnnotatorError::serialization(format!("broadcast of {}", type_name), e))?;

        let id = BroadcastId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let size_bytes = bytes.len();
        let replies = session
            .request_all(&WorkerMessage::StoreBroadcast { id, bytes })
            .await?;

        for (worker_id, reply) in &replies {
            if let WorkerReply::Failed { message } = reply {
                return Err(AnnotatorError::worker_unavailable(format!(
                    "worker {} rejected {}: {}",
                    worker_id, id, message
                )));
            }
        }
        session.transport().record_broadcast(replies.len());

        self.live.insert(
            id,
            BroadcastRecord {
                id,
                type_name: type_name.to_string(),
                size_bytes,
                workers: replies.len(),
            },
        );

        tracing::info!(
            "Broadcast {} ({}, {} bytes) to {} workers",
            id,
            type_name,
            size_bytes,
            replies.len()
        );

        Ok(BroadcastHandle::new(id))
    }

    /// Drops a broadcast from every worker. Later dereferences fail with `UnknownResource`.
    pub async fn unpersist<T>(
        &self,
        session: &Arc<ClusterSession>,
        handle: &BroadcastHandle<T>,
    ) -> Result<()> {
        if self.live.remove(&handle.id).is_none() {
            return Err(AnnotatorError::UnknownResource(handle.id.0));
        }
        session
            .request_all(&WorkerMessage::DropBroadcast { id: handle.id })
            .await?;
        tracing::info!("Unpersisted {}", handle.id);
        Ok(())
    }

    /// Live broadcasts, ordered by id.
    pub fn records(&self) -> Vec<BroadcastRecord> {
        let mut records: Vec<BroadcastRecord> =
            self.live.iter().map(|e| e.value().clone()).collect();
        records.sort_by_key(|r| r.id);
        records
    }
}
