//! Session Candidate Cache
//!
//! Registry of candidate sets whose partitions are resident on workers, keyed
//! by `(split, set name)` and versioned by content fingerprint. Preparing an
//! unchanged set again is a lookup; data moves to workers only on first
//! preparation or after invalidation.

use super::partitioner::PartitionManager;
use crate::candidate::types::{CandidateKey, CandidateSet, Split};
use crate::cluster::protocol::{PartitionPayload, PartitionRow, WorkerMessage, WorkerReply};
use crate::cluster::service::ClusterSession;
use crate::cluster::types::WorkerId;
use crate::error::{AnnotatorError, Result};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;

/// Identity of a cached candidate set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    pub split: Split,
    pub set_name: String,
}

impl CacheKey {
    pub fn new(set_name: impl Into<String>, split: Split) -> Self {
        Self {
            split,
            set_name: set_name.into(),
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.set_name, self.split)
    }
}

/// What `prepare` does when the set under a cached key has changed.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum StalePolicy {
    /// Fail with `StaleCache`; the caller re-prepares explicitly.
    #[default]
    Reject,
    /// Evict the old partitions and distribute the new content.
    Invalidate,
}

impl FromStr for StalePolicy {
    type Err = AnnotatorError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reject" => Ok(StalePolicy::Reject),
            "invalidate" | "auto" => Ok(StalePolicy::Invalidate),
            other => Err(AnnotatorError::invalid_input(format!(
                "unknown stale policy '{}'",
                other
            ))),
        }
    }
}

/// Caller-facing reference to a cached set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheHandle {
    pub key: CacheKey,
    pub version: u64,
    pub row_count: usize,
    pub partition_count: usize,
    pub schema: String,
}

/// Partition assignment record of a cached set.
#[derive(Debug, Clone)]
pub struct CachedSet {
    pub handle: CacheHandle,
    /// Candidate key of each row, in row order.
    pub row_keys: Vec<CandidateKey>,
    /// Partition -> owning worker.
    pub assignments: BTreeMap<u32, WorkerId>,
    pub prepared_at_ms: u64,
}

impl CachedSet {
    /// Worker -> partitions it owns, ascending.
    pub fn owners(&self) -> BTreeMap<WorkerId, Vec<u32>> {
        let mut owners: BTreeMap<WorkerId, Vec<u32>> = BTreeMap::new();
        for (partition, worker_id) in &self.assignments {
            owners.entry(worker_id.clone()).or_default().push(*partition);
        }
        owners
    }
}

type Slot = Arc<Mutex<Option<CachedSet>>>;

/// Session-scoped registry of cached candidate sets.
///
/// Each key has its own async mutex, so concurrent `prepare` calls for the
/// same key distribute at most once and converge on the same handle.
#[derive(Default)]
pub struct CandidateCache {
    slots: DashMap<CacheKey, Slot>,
    /// Handles of committed entries; readable while a slot is locked.
    committed: DashMap<CacheKey, CacheHandle>,
    distributions: AtomicU64,
}

impl CandidateCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn slot(&self, key: &CacheKey) -> Slot {
        self.slots
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .value()
            .clone()
    }

    /// Number of physical distributions performed since the cache was created.
    pub fn distribution_count(&self) -> u64 {
        self.distributions.load(Ordering::SeqCst)
    }

    /// Returns the cached handle for `set`, distributing it first if needed.
    pub async fn prepare(
        &self,
        session: &Arc<ClusterSession>,
        partitioner: &PartitionManager,
        set: &CandidateSet,
        split: &Split,
        policy: StalePolicy,
    ) -> Result<CacheHandle> {
        if set.split() != split {
            return Err(AnnotatorError::invalid_input(format!(
                "candidate set '{}' is split {}, asked to prepare split {}",
                set.name(),
                set.split(),
                split
            )));
        }

        let key = CacheKey::new(set.name(), split.clone());
        let version = set.fingerprint();
        let slot = self.slot(&key);
        let mut cached = slot.lock().await;

        if let Some(existing) = cached.as_ref() {
            if existing.handle.version == version {
                tracing::debug!("Cache hit for {} (version {:#x})", key, version);
                return Ok(existing.handle.clone());
            }

            match policy {
                StalePolicy::Reject => {
                    tracing::warn!("Stale cache for {}, rejecting", key);
                    return Err(AnnotatorError::StaleCache {
                        key,
                        cached_version: existing.handle.version,
                        cached_rows: existing.handle.row_count,
                        current_version: version,
                        current_rows: set.len(),
                    });
                }
                StalePolicy::Invalidate => {
                    tracing::info!("Stale cache for {}, re-distributing", key);
                    evict(session, existing).await?;
                    self.committed.remove(&key);
                    *cached = None;
                }
            }
        }

        let fresh = self
            .distribute(session, partitioner, set, key, version)
            .await?;
        let handle = fresh.handle.clone();
        self.committed.insert(handle.key.clone(), handle.clone());
        *cached = Some(fresh);
        Ok(handle)
    }

    async fn distribute(
        &self,
        session: &Arc<ClusterSession>,
        partitioner: &PartitionManager,
        set: &CandidateSet,
        key: CacheKey,
        version: u64,
    ) -> Result<CachedSet> {
        if !session.is_running().await {
            return Err(AnnotatorError::worker_unavailable(format!(
                "cannot distribute {}: cluster session is {}",
                key,
                session.state().await
            )));
        }

        let plan = partitioner.plan(set.len(), &session.worker_ids())?;
        let candidates = set.candidates();

        for (partition, rows) in &plan.rows {
            let owner = &plan.owners[partition];
            let payload = PartitionPayload {
                partition: *partition,
                rows: rows
                    .iter()
                    .map(|&row| PartitionRow {
                        row,
                        candidate: candidates[row as usize].clone(),
                    })
                    .collect(),
            };

            let reply = session
                .request(
                    owner,
                    &WorkerMessage::StorePartition {
                        cache_key: key.clone(),
                        version,
                        payload,
                    },
                )
                .await?;

            if let WorkerReply::Failed { message } = reply {
                return Err(AnnotatorError::worker_unavailable(format!(
                    "worker {} rejected partition {} of {}: {}",
                    owner, partition, key, message
                )));
            }
            session.transport().record_partition();
        }

        self.distributions.fetch_add(1, Ordering::SeqCst);
        tracing::info!(
            "Distributed {} ({} rows) as {} partitions over {} workers",
            key,
            set.len(),
            plan.rows.len(),
            plan.owners.values().collect::<std::collections::BTreeSet<_>>().len()
        );

        Ok(CachedSet {
            handle: CacheHandle {
                key,
                version,
                row_count: set.len(),
                partition_count: plan.rows.len(),
                schema: set.schema().name.clone(),
            },
            row_keys: set.keys(),
            assignments: plan.owners,
            prepared_at_ms: now_ms(),
        })
    }

    /// Looks up a cached set and checks it still matches `handle`.
    pub async fn validate(&self, handle: &CacheHandle) -> Result<CachedSet> {
        let cached = self.lookup(&handle.key).await?;
        if cached.handle.version != handle.version {
            return Err(AnnotatorError::StaleCache {
                key: handle.key.clone(),
                cached_version: cached.handle.version,
                cached_rows: cached.handle.row_count,
                current_version: handle.version,
                current_rows: handle.row_count,
            });
        }
        Ok(cached)
    }

    pub async fn lookup(&self, key: &CacheKey) -> Result<CachedSet> {
        let slot = self
            .slots
            .get(key)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| AnnotatorError::CacheMiss(key.clone()))?;
        let cached = slot.lock().await;
        cached
            .clone()
            .ok_or_else(|| AnnotatorError::CacheMiss(key.clone()))
    }

    /// Evicts a cached set from its workers. Returns false if nothing was cached.
    pub async fn invalidate(&self, session: &Arc<ClusterSession>, key: &CacheKey) -> Result<bool> {
        let Some(slot) = self.slots.get(key).map(|entry| entry.value().clone()) else {
            return Ok(false);
        };
        let mut cached = slot.lock().await;
        match cached.take() {
            Some(existing) => {
                self.committed.remove(key);
                evict(session, &existing).await?;
                tracing::info!("Invalidated {}", key);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Handles of every cached set, ordered by key.
    ///
    /// Reads the committed snapshot, so an in-flight `prepare` does not block it.
    pub fn handles(&self) -> Vec<CacheHandle> {
        let mut handles: Vec<CacheHandle> =
            self.committed.iter().map(|e| e.value().clone()).collect();
        handles.sort_by(|a, b| a.key.cmp(&b.key));
        handles
    }
}

async fn evict(session: &Arc<ClusterSession>, cached: &CachedSet) -> Result<()> {
    for worker_id in cached.owners().keys() {
        session
            .request(
                worker_id,
                &WorkerMessage::EvictCache {
                    cache_key: cached.handle.key.clone(),
                },
            )
            .await?;
    }
    Ok(())
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
