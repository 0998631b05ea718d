use super::protocol::{Envelope, WorkerMessage, WorkerReply, decode, encode};
use super::types::{SessionState, TransportStats, WorkerId, WorkerInfo, WorkerState};
use super::worker::Worker;
use crate::config::AnnotatorConfig;
use crate::error::{AnnotatorError, Result};
use crate::executor::registry::LfRegistry;

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{RwLock, mpsc, oneshot};
use tokio::task::JoinSet;

struct WorkerHandle {
    info: WorkerInfo,
    worker: Arc<Worker>,
    mailbox: mpsc::Sender<Envelope>,
}

/// Coordinator view of the worker pool for one session.
pub struct ClusterSession {
    config: AnnotatorConfig,
    registry: Arc<LfRegistry>,
    workers: DashMap<WorkerId, WorkerHandle>,
    state: RwLock<SessionState>,
    transport: Arc<TransportStats>,
}

impl ClusterSession {
    pub fn new(config: AnnotatorConfig, registry: Arc<LfRegistry>) -> Arc<Self> {
        Arc::new(Self {
            config,
            registry,
            workers: DashMap::new(),
            state: RwLock::new(SessionState::Idle),
            transport: Arc::new(TransportStats::default()),
        })
    }

    /// Spawns the workers. Starting a running session is a no-op.
    pub async fn start(&self) -> Result<()> {
        let mut state = self.state.write().await;
        match *state {
            SessionState::Running => return Ok(()),
            SessionState::Stopped => {
                return Err(AnnotatorError::worker_unavailable(
                    "cluster session was shut down",
                ));
            }
            SessionState::Idle => {}
        }

        tracing::info!("Starting {} annotator workers", self.config.worker_count);

        for index in 0..self.config.worker_count {
            let id = WorkerId::new();
            let (mailbox, inbox) = mpsc::channel(self.config.mailbox_capacity);
            let worker = Worker::new(id.clone(), index, self.registry.clone());

            let runner = worker.clone();
            tokio::spawn(async move {
                runner.run(inbox).await;
            });

            self.workers.insert(
                id.clone(),
                WorkerHandle {
                    info: WorkerInfo {
                        id,
                        index,
                        state: WorkerState::Running,
                    },
                    worker,
                    mailbox,
                },
            );
        }

        *state = SessionState::Running;
        tracing::info!("Cluster session started with {} workers", self.workers.len());
        Ok(())
    }

    /// Stops every worker. Resident partitions and broadcasts are dropped with them.
    pub async fn shutdown(&self) -> Result<()> {
        let mut state = self.state.write().await;
        if *state != SessionState::Running {
            *state = SessionState::Stopped;
            return Ok(());
        }

        for worker_id in self.worker_ids() {
            if let Err(e) = self.request(&worker_id, &WorkerMessage::Shutdown).await {
                tracing::warn!("Worker {} did not acknowledge shutdown: {}", worker_id, e);
            }
            if let Some(mut handle) = self.workers.get_mut(&worker_id) {
                handle.info.state = WorkerState::Stopped;
            }
        }

        *state = SessionState::Stopped;
        tracing::info!("Cluster session stopped");
        Ok(())
    }

    pub async fn state(&self) -> SessionState {
        *self.state.read().await
    }

    pub async fn is_running(&self) -> bool {
        self.state().await == SessionState::Running
    }

    pub fn config(&self) -> &AnnotatorConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<LfRegistry> {
        &self.registry
    }

    pub fn transport(&self) -> &TransportStats {
        &self.transport
    }

    /// Running worker ids, sorted. The sort order drives partition placement.
    pub fn worker_ids(&self) -> Vec<WorkerId> {
        let mut ids: Vec<WorkerId> = self
            .workers
            .iter()
            .filter(|entry| entry.value().info.state == WorkerState::Running)
            .map(|entry| entry.key().clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn workers(&self) -> Vec<WorkerInfo> {
        let mut infos: Vec<WorkerInfo> = self
            .workers
            .iter()
            .map(|entry| entry.value().info.clone())
            .collect();
        infos.sort_by_key(|info| info.index);
        infos
    }

    pub fn worker(&self, worker_id: &WorkerId) -> Option<Arc<Worker>> {
        self.workers
            .get(worker_id)
            .map(|entry| entry.value().worker.clone())
    }

    /// Encodes `message`, delivers it to one worker and waits for the reply.
    pub async fn request(&self, worker_id: &WorkerId, message: &WorkerMessage) -> Result<WorkerReply> {
        let payload = encode(message.kind(), message)?;
        self.send_payload(worker_id, payload).await
    }

    async fn send_payload(&self, worker_id: &WorkerId, payload: Vec<u8>) -> Result<WorkerReply> {
        let mailbox = self
            .workers
            .get(worker_id)
            .map(|entry| entry.value().mailbox.clone())
            .ok_or_else(|| {
                AnnotatorError::worker_unavailable(format!("unknown worker {}", worker_id))
            })?;

        let (reply_tx, reply_rx) = oneshot::channel();
        self.transport.record_message(payload.len());

        mailbox
            .send(Envelope {
                payload,
                reply: Some(reply_tx),
            })
            .await
            .map_err(|_| {
                AnnotatorError::worker_unavailable(format!("mailbox of {} is closed", worker_id))
            })?;

        let bytes = reply_rx.await.map_err(|_| {
            AnnotatorError::worker_unavailable(format!("worker {} dropped its reply", worker_id))
        })?;
        self.transport.record_reply(bytes.len());

        decode("worker reply", &bytes)
    }

    /// Sends the same message to every running worker concurrently.
    ///
    /// The message is encoded once; replies come back in worker id order.
    pub async fn request_all(
        self: &Arc<Self>,
        message: &WorkerMessage,
    ) -> Result<Vec<(WorkerId, WorkerReply)>> {
        let payload = encode(message.kind(), message)?;

        let mut pending = JoinSet::new();
        for worker_id in self.worker_ids() {
            let session = self.clone();
            let payload = payload.clone();
            pending.spawn(async move {
                let reply = session.send_payload(&worker_id, payload).await;
                (worker_id, reply)
            });
        }

        let mut replies = Vec::new();
        while let Some(joined) = pending.join_next().await {
            let (worker_id, reply) = joined.map_err(|e| {
                AnnotatorError::worker_unavailable(format!("request task failed: {}", e))
            })?;
            replies.push((worker_id, reply?));
        }
        replies.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(replies)
    }

    /// Fire-and-forget delivery, usable from synchronous code such as `Drop`.
    pub fn notify(&self, worker_id: &WorkerId, message: &WorkerMessage) {
        let payload = match encode(message.kind(), message) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!("Failed to encode {} for {}: {}", message.kind(), worker_id, e);
                return;
            }
        };

        if let Some(entry) = self.workers.get(worker_id) {
            let len = payload.len();
            match entry.value().mailbox.try_send(Envelope {
                payload,
                reply: None,
            }) {
                Ok(()) => self.transport.record_message(len),
                Err(e) => tracing::warn!("Failed to notify worker {}: {}", worker_id, e),
            }
        }
    }
}
