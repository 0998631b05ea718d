use crate::broadcast::service::Broadcaster;
use crate::broadcast::types::{BroadcastHandle, BroadcastRecord};
use crate::candidate::source::CandidateSource;
use crate::candidate::types::{CandidateSchema, CandidateSet, Split};
use crate::cluster::service::ClusterSession;
use crate::cluster::types::TransportSnapshot;
use crate::config::AnnotatorConfig;
use crate::error::{AnnotatorError, Result};
use crate::executor::dispatcher::dispatch;
use crate::executor::registry::LfRegistry;
use crate::executor::types::{FailureMode, FaultLog, RunId, Vote};
use crate::matrix::assembler::assemble;
use crate::matrix::types::LabelMatrix;
use crate::stats::engine;
use crate::stats::types::{LfStats, StatsReport};
use crate::storage::cache::{CacheHandle, CacheKey, CandidateCache};
use crate::storage::partitioner::PartitionManager;

use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

/// Outcome of one `apply` call.
#[derive(Debug, Clone)]
pub struct LabelRun {
    pub run_id: RunId,
    pub matrix: LabelMatrix,
    /// Faults recorded as abstain; always empty in fail-fast mode.
    pub faults: FaultLog,
    pub elapsed_ms: u64,
}

/// Distributed labeling function engine bound to one cluster session.
pub struct Annotator {
    config: AnnotatorConfig,
    session: Arc<ClusterSession>,
    registry: Arc<LfRegistry>,
    cache: CandidateCache,
    broadcaster: Broadcaster,
    partitioner: PartitionManager,
}

impl Annotator {
    /// Creates an annotator with an idle session. Call `start` before use.
    pub fn new(config: AnnotatorConfig, registry: Arc<LfRegistry>) -> Result<Arc<Self>> {
        config.validate()?;
        let session = ClusterSession::new(config.clone(), registry.clone());
        let partitioner = PartitionManager::new(config.num_partitions());

        Ok(Arc::new(Self {
            config,
            session,
            registry,
            cache: CandidateCache::new(),
            broadcaster: Broadcaster::new(),
            partitioner,
        }))
    }

    /// `new` followed by `start`.
    pub async fn connect(config: AnnotatorConfig, registry: Arc<LfRegistry>) -> Result<Arc<Self>> {
        let annotator = Self::new(config, registry)?;
        annotator.start().await?;
        Ok(annotator)
    }

    pub async fn start(&self) -> Result<()> {
        self.session.start().await
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.session.shutdown().await
    }

    pub fn config(&self) -> &AnnotatorConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<LfRegistry> {
        &self.registry
    }

    pub fn session(&self) -> &Arc<ClusterSession> {
        &self.session
    }

    pub fn transport(&self) -> TransportSnapshot {
        self.session.transport().snapshot()
    }

    /// Physical candidate distributions performed so far.
    pub fn distribution_count(&self) -> u64 {
        self.cache.distribution_count()
    }

    pub async fn broadcast<T: Serialize>(&self, value: &T) -> Result<BroadcastHandle<T>> {
        self.broadcaster.broadcast(&self.session, value).await
    }

    pub async fn unpersist<T>(&self, handle: &BroadcastHandle<T>) -> Result<()> {
        self.broadcaster.unpersist(&self.session, handle).await
    }

    pub fn broadcasts(&self) -> Vec<BroadcastRecord> {
        self.broadcaster.records()
    }

    /// Partitions `set` across the workers, or returns the cached handle if unchanged.
    pub async fn prepare(&self, set: &CandidateSet, split: &Split) -> Result<CacheHandle> {
        self.cache
            .prepare(
                &self.session,
                &self.partitioner,
                set,
                split,
                self.config.stale_policy,
            )
            .await
    }

    /// Fetches `split` from `source` and prepares it under `set_name`.
    pub async fn prepare_from(
        &self,
        source: &dyn CandidateSource,
        set_name: &str,
        schema: CandidateSchema,
        split: &Split,
    ) -> Result<CacheHandle> {
        let candidates = source.fetch(split)?;
        let set = CandidateSet::new(set_name, split.clone(), schema, candidates)?;
        self.prepare(&set, split).await
    }

    /// Drops any cached partitioning of `set` and distributes it again.
    pub async fn reprepare(&self, set: &CandidateSet, split: &Split) -> Result<CacheHandle> {
        self.invalidate(&CacheKey::new(set.name(), split.clone()))
            .await?;
        self.prepare(set, split).await
    }

    pub async fn invalidate(&self, key: &CacheKey) -> Result<bool> {
        self.cache.invalidate(&self.session, key).await
    }

    pub fn cached_handles(&self) -> Vec<CacheHandle> {
        self.cache.handles()
    }

    /// Current handle of a cached set.
    pub async fn handle_for(&self, set_name: &str, split: &Split) -> Result<CacheHandle> {
        let key = CacheKey::new(set_name, split.clone());
        Ok(self.cache.lookup(&key).await?.handle)
    }

    /// Applies `functions` with the configured failure mode.
    pub async fn apply<S: AsRef<str>>(
        &self,
        handle: &CacheHandle,
        functions: &[S],
    ) -> Result<LabelRun> {
        self.apply_with_mode(handle, functions, self.config.failure_mode)
            .await
    }

    /// Applies `functions`, in order, to every candidate of the cached set.
    ///
    /// Column `j` of the matrix is `functions[j]`; row `i` is the i-th cached candidate.
    pub async fn apply_with_mode<S: AsRef<str>>(
        &self,
        handle: &CacheHandle,
        functions: &[S],
        mode: FailureMode,
    ) -> Result<LabelRun> {
        let started = Instant::now();

        let resolved = self.registry.resolve(functions)?;
        let mut names = HashSet::new();
        for lf in &resolved {
            if !names.insert(lf.name.as_str()) {
                return Err(AnnotatorError::invalid_input(format!(
                    "labeling function '{}' listed more than once",
                    lf.name
                )));
            }
        }

        let cached = self.cache.validate(handle).await?;
        if !self.session.is_running().await {
            return Err(AnnotatorError::worker_unavailable(format!(
                "cannot apply to {}: cluster session is {}",
                handle.key,
                self.session.state().await
            )));
        }

        let output = dispatch(&self.session, &cached, &resolved, mode).await?;
        let matrix = assemble(
            output.partitions,
            cached.handle.row_count,
            resolved.len(),
            resolved.iter().map(|lf| lf.name.clone()).collect(),
            cached.row_keys.clone(),
        )?;

        let elapsed_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            "Run {} on {}: {}x{} matrix, {} votes, {} faults in {} ms",
            output.run_id,
            handle.key,
            matrix.row_count(),
            matrix.col_count(),
            matrix.nnz(),
            output.faults.len(),
            elapsed_ms
        );

        Ok(LabelRun {
            run_id: output.run_id,
            matrix,
            faults: output.faults,
            elapsed_ms,
        })
    }

    pub fn lf_stats(&self, matrix: &LabelMatrix) -> Vec<LfStats> {
        engine::lf_stats(matrix)
    }

    pub fn report(&self, matrix: &LabelMatrix, gold: Option<&[Vote]>) -> Result<StatsReport> {
        engine::report(matrix, gold)
    }
}
