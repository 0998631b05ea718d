//! Annotator configuration.
//!
//! Values come from `Default`, the `with_*` setters, or `ANNOTATOR_*`
//! environment variables through [`AnnotatorConfig::from_env`].

use crate::error::{AnnotatorError, Result};
use crate::executor::types::FailureMode;
use crate::storage::cache::StalePolicy;

use serde::{Deserialize, Serialize};
use std::str::FromStr;

pub const ENV_WORKERS: &str = "ANNOTATOR_WORKERS";
pub const ENV_PARTITIONS_PER_WORKER: &str = "ANNOTATOR_PARTITIONS_PER_WORKER";
pub const ENV_FAILURE_MODE: &str = "ANNOTATOR_FAILURE_MODE";
pub const ENV_STALE_POLICY: &str = "ANNOTATOR_STALE_POLICY";
pub const ENV_MAILBOX_CAPACITY: &str = "ANNOTATOR_MAILBOX_CAPACITY";
pub const ENV_MAX_ABS_VOTE: &str = "ANNOTATOR_MAX_ABS_VOTE";

const DEFAULT_PARTITIONS_PER_WORKER: usize = 4;
const DEFAULT_MAILBOX_CAPACITY: usize = 256;
const DEFAULT_MAX_ABS_VOTE: i32 = 127;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnnotatorConfig {
    /// Number of workers spawned by the session.
    pub worker_count: usize,
    /// Partitions per worker; the partition count is `worker_count * partitions_per_worker`.
    pub partitions_per_worker: usize,
    pub failure_mode: FailureMode,
    pub stale_policy: StalePolicy,
    /// Bound of each worker mailbox.
    pub mailbox_capacity: usize,
    /// Votes with a larger magnitude are treated as faults.
    pub max_abs_vote: i32,
}

impl Default for AnnotatorConfig {
    fn default() -> Self {
        let worker_count = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        Self {
            worker_count,
            partitions_per_worker: DEFAULT_PARTITIONS_PER_WORKER,
            failure_mode: FailureMode::default(),
            stale_policy: StalePolicy::default(),
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
            max_abs_vote: DEFAULT_MAX_ABS_VOTE,
        }
    }
}

impl AnnotatorConfig {
    /// Reads `ANNOTATOR_*` variables, falling back to defaults for unset ones.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as `from_env`, with an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(value) = lookup(ENV_WORKERS) {
            config.worker_count = parse_var(ENV_WORKERS, &value)?;
        }
        if let Some(value) = lookup(ENV_PARTITIONS_PER_WORKER) {
            config.partitions_per_worker = parse_var(ENV_PARTITIONS_PER_WORKER, &value)?;
        }
        if let Some(value) = lookup(ENV_FAILURE_MODE) {
            config.failure_mode = value.parse()?;
        }
        if let Some(value) = lookup(ENV_STALE_POLICY) {
            config.stale_policy = value.parse()?;
        }
        if let Some(value) = lookup(ENV_MAILBOX_CAPACITY) {
            config.mailbox_capacity = parse_var(ENV_MAILBOX_CAPACITY, &value)?;
        }
        if let Some(value) = lookup(ENV_MAX_ABS_VOTE) {
            config.max_abs_vote = parse_var(ENV_MAX_ABS_VOTE, &value)?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn with_workers(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    pub fn with_partitions_per_worker(mut self, partitions_per_worker: usize) -> Self {
        self.partitions_per_worker = partitions_per_worker;
        self
    }

    pub fn with_failure_mode(mut self, failure_mode: FailureMode) -> Self {
        self.failure_mode = failure_mode;
        self
    }

    pub fn with_stale_policy(mut self, stale_policy: StalePolicy) -> Self {
        self.stale_policy = stale_policy;
        self
    }

    pub fn with_max_abs_vote(mut self, max_abs_vote: i32) -> Self {
        self.max_abs_vote = max_abs_vote;
        self
    }

    pub fn num_partitions(&self) -> u32 {
        (self.worker_count * self.partitions_per_worker) as u32
    }

    pub fn validate(&self) -> Result<()> {
        if self.worker_count == 0 {
            return Err(AnnotatorError::invalid_input("worker_count must be > 0"));
        }
        if self.partitions_per_worker == 0 {
            return Err(AnnotatorError::invalid_input(
                "partitions_per_worker must be > 0",
            ));
        }
        if self.mailbox_capacity == 0 {
            return Err(AnnotatorError::invalid_input("mailbox_capacity must be > 0"));
        }
        if self.max_abs_vote <= 0 {
            return Err(AnnotatorError::invalid_input("max_abs_vote must be > 0"));
        }
        Ok(())
    }
}

fn parse_var<T>(name: &str, value: &str) -> Result<T>
where
    T: FromStr,
    <T as FromStr>::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: <T as FromStr>::Err| {
        AnnotatorError::invalid_input(format!("{}='{}': {}", name, value, e))
    })
}
