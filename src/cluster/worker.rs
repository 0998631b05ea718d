//! Worker Implementation
//!
//! A worker owns a mailbox and everything resident on it: broadcast resources
//! and the candidate partitions of cached sets. It processes messages in
//! arrival order; labeling runs are evaluated off the mailbox loop so that
//! cancellation requests can still be received while a run is in flight.

use super::protocol::{Envelope, PartitionPayload, WorkerMessage, WorkerReply, decode, encode};
use super::types::WorkerId;
use crate::broadcast::store::{ResourceContext, ResourceStore};
use crate::executor::dispatcher::{EvalOptions, evaluate_partition};
use crate::executor::registry::LfRegistry;
use crate::executor::types::{FailureMode, RunId};
use crate::storage::cache::CacheKey;

use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{mpsc, oneshot};

/// Partitions of one cached set held by this worker.
struct ResidentSet {
    version: u64,
    partitions: BTreeMap<u32, Arc<PartitionPayload>>,
}

struct ApplyRequest {
    run_id: RunId,
    cache_key: CacheKey,
    version: u64,
    partitions: Vec<u32>,
    functions: Vec<String>,
    mode: FailureMode,
    max_abs_vote: i32,
}

pub struct Worker {
    pub id: WorkerId,
    pub index: usize,
    registry: Arc<LfRegistry>,
    resources: Arc<ResourceStore>,
    resident: DashMap<CacheKey, ResidentSet>,
    /// Runs in flight on this worker and their cancellation flags.
    runs: DashMap<RunId, Arc<AtomicBool>>,
}

impl Worker {
    pub fn new(id: WorkerId, index: usize, registry: Arc<LfRegistry>) -> Arc<Self> {
        Arc::new(Self {
            id,
            index,
            registry,
            resources: ResourceStore::new(),
            resident: DashMap::new(),
            runs: DashMap::new(),
        })
    }

    pub fn resources(&self) -> &Arc<ResourceStore> {
        &self.resources
    }

    /// Number of resident partitions for `cache_key`.
    pub fn resident_partitions(&self, cache_key: &CacheKey) -> usize {
        self.resident
            .get(cache_key)
            .map(|set| set.partitions.len())
            .unwrap_or(0)
    }

    /// Number of runs currently being evaluated.
    pub fn active_runs(&self) -> usize {
        self.runs.len()
    }

    /// The main loop: decode, handle, reply, until `Shutdown` or the mailbox closes.
    pub async fn run(self: Arc<Self>, mut inbox: mpsc::Receiver<Envelope>) {
        tracing::debug!("Worker {} ({}) started", self.index, self.id);

        while let Some(envelope) = inbox.recv().await {
            let message: WorkerMessage = match decode("worker message", &envelope.payload) {
                Ok(message) => message,
                Err(e) => {
                    tracing::warn!("Worker {} failed to decode message: {}", self.index, e);
                    respond(
                        envelope.reply,
                        &WorkerReply::Failed {
                            message: e.to_string(),
                        },
                    );
                    continue;
                }
            };

            tracing::trace!("Worker {} received {}", self.index, message.kind());

            match message {
                WorkerMessage::Shutdown => {
                    respond(envelope.reply, &WorkerReply::Ack);
                    break;
                }
                WorkerMessage::Apply {
                    run_id,
                    cache_key,
                    version,
                    partitions,
                    functions,
                    mode,
                    max_abs_vote,
                } => {
                    let cancelled = Arc::new(AtomicBool::new(false));
                    self.runs.insert(run_id.clone(), cancelled.clone());

                    let worker = self.clone();
                    let request = ApplyRequest {
                        run_id,
                        cache_key,
                        version,
                        partitions,
                        functions,
                        mode,
                        max_abs_vote,
                    };
                    tokio::spawn(async move {
                        let run_id = request.run_id.clone();
                        let reply = worker.clone().handle_apply(request, cancelled).await;
                        worker.runs.remove(&run_id);
                        respond(envelope.reply, &reply);
                    });
                }
                other => {
                    let reply = self.handle_message(other);
                    respond(envelope.reply, &reply);
                }
            }
        }

        tracing::debug!("Worker {} ({}) stopped", self.index, self.id);
    }

    fn handle_message(&self, message: WorkerMessage) -> WorkerReply {
        match message {
            WorkerMessage::StoreBroadcast { id, bytes } => {
                self.resources.store(id, bytes);
                WorkerReply::Ack
            }

            WorkerMessage::DropBroadcast { id } => {
                self.resources.remove(id);
                WorkerReply::Ack
            }

            WorkerMessage::StorePartition {
                cache_key,
                version,
                payload,
            } => {
                self.store_partition(cache_key, version, payload);
                WorkerReply::Ack
            }

            WorkerMessage::EvictCache { cache_key } => {
                if let Some((_, set)) = self.resident.remove(&cache_key) {
                    tracing::debug!(
                        "Worker {} evicted {} partitions of {}",
                        self.index,
                        set.partitions.len(),
                        cache_key
                    );
                }
                WorkerReply::Ack
            }

            WorkerMessage::CancelRun { run_id } => {
                match self.runs.get(&run_id) {
                    Some(cancelled) => {
                        tracing::debug!("Worker {} cancelling run {}", self.index, run_id);
                        cancelled.store(true, Ordering::SeqCst);
                    }
                    None => {
                        tracing::trace!("Worker {} is not running {}", self.index, run_id);
                    }
                }
                WorkerReply::Ack
            }

            WorkerMessage::Apply { .. } | WorkerMessage::Shutdown => WorkerReply::Failed {
                message: "message must be handled by the worker loop".to_string(),
            },
        }
    }

    fn store_partition(&self, cache_key: CacheKey, version: u64, payload: PartitionPayload) {
        let mut set = self
            .resident
            .entry(cache_key.clone())
            .or_insert_with(|| ResidentSet {
                version,
                partitions: BTreeMap::new(),
            });

        if set.version != version {
            tracing::debug!(
                "Worker {} replacing {} version {:#x} with {:#x}",
                self.index,
                cache_key,
                set.version,
                version
            );
            set.version = version;
            set.partitions.clear();
        }

        tracing::debug!(
            "Worker {} stored partition {} of {} ({} rows)",
            self.index,
            payload.partition,
            cache_key,
            payload.rows.len()
        );
        set.partitions
            .insert(payload.partition, Arc::new(payload));
    }

    async fn handle_apply(
        self: Arc<Self>,
        request: ApplyRequest,
        cancelled: Arc<AtomicBool>,
    ) -> WorkerReply {
        let payloads = match self.resident_payloads(&request) {
            Ok(payloads) => payloads,
            Err(message) => return WorkerReply::Failed { message },
        };

        let functions = match self.registry.resolve(&request.functions) {
            Ok(functions) => Arc::new(functions),
            Err(e) => {
                return WorkerReply::Failed {
                    message: e.to_string(),
                };
            }
        };

        let options = EvalOptions {
            mode: request.mode,
            max_abs_vote: request.max_abs_vote,
        };
        let ctx = ResourceContext::new(self.resources.clone());

        let mut handles = Vec::with_capacity(payloads.len());
        for payload in payloads {
            let functions = functions.clone();
            let ctx = ctx.clone();
            let cancelled = cancelled.clone();
            handles.push(tokio::task::spawn_blocking(move || {
                evaluate_partition(&payload, &functions, &ctx, options, || {
                    cancelled.load(Ordering::SeqCst)
                })
            }));
        }

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(rows) => results.push(rows),
                Err(e) => {
                    return WorkerReply::Failed {
                        message: format!("partition evaluation aborted: {}", e),
                    };
                }
            }
        }

        tracing::debug!(
            "Worker {} finished run {} over {} partitions",
            self.index,
            request.run_id,
            results.len()
        );
        WorkerReply::Applied {
            partitions: results,
        }
    }

    fn resident_payloads(
        &self,
        request: &ApplyRequest,
    ) -> std::result::Result<Vec<Arc<PartitionPayload>>, String> {
        let set = self.resident.get(&request.cache_key).ok_or_else(|| {
            format!(
                "worker {} holds no partitions of {}",
                self.id, request.cache_key
            )
        })?;

        if set.version != request.version {
            return Err(format!(
                "worker {} holds {} version {:#x}, run expects {:#x}",
                self.id, request.cache_key, set.version, request.version
            ));
        }

        request
            .partitions
            .iter()
            .map(|partition| {
                set.partitions.get(partition).cloned().ok_or_else(|| {
                    format!(
                        "partition {} of {} is not resident on worker {}",
                        partition, request.cache_key, self.id
                    )
                })
            })
            .collect()
    }
}

fn respond(reply_tx: Option<oneshot::Sender<Vec<u8>>>, reply: &WorkerReply) {
    let Some(reply_tx) = reply_tx else {
        return;
    };

    let bytes = match encode("worker reply", reply) {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::error!("Failed to encode worker reply: {}", e);
            match encode(
                "worker reply",
                &WorkerReply::Failed {
                    message: e.to_string(),
                },
            ) {
                Ok(bytes) => bytes,
                Err(_) => return,
            }
        }
    };

    if reply_tx.send(bytes).is_err() {
        tracing::debug!("Requester went away before the reply was sent");
    }
}
