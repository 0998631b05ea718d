use crate::cluster::types::WorkerId;
use crate::error::{AnnotatorError, Result};
use std::collections::BTreeMap;

/// Placement of rows into partitions and partitions onto workers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionPlan {
    /// Partition -> row indices, ascending. Empty partitions are omitted.
    pub rows: BTreeMap<u32, Vec<u64>>,
    /// Partition -> owning worker.
    pub owners: BTreeMap<u32, WorkerId>,
}

/// Round-robin row partitioning with modulo placement over sorted worker ids.
#[derive(Debug, Clone)]
pub struct PartitionManager {
    num_partitions: u32,
}

impl PartitionManager {
    pub fn new(num_partitions: u32) -> Self {
        Self {
            num_partitions: num_partitions.max(1),
        }
    }

    pub fn num_partitions(&self) -> u32 {
        self.num_partitions
    }

    pub fn get_partition(&self, row: u64) -> u32 {
        (row % self.num_partitions as u64) as u32
    }

    pub fn get_owner(&self, partition: u32, workers: &[WorkerId]) -> Option<WorkerId> {
        if workers.is_empty() {
            return None;
        }
        let mut worker_ids = workers.to_vec();
        worker_ids.sort();
        let owner_idx = (partition as usize) % worker_ids.len();
        Some(worker_ids[owner_idx].clone())
    }

    /// Assigns `row_count` rows to partitions and partitions to `workers`.
    pub fn plan(&self, row_count: usize, workers: &[WorkerId]) -> Result<PartitionPlan> {
        let mut rows: BTreeMap<u32, Vec<u64>> = BTreeMap::new();
        for row in 0..row_count as u64 {
            rows.entry(self.get_partition(row)).or_default().push(row);
        }

        let mut owners = BTreeMap::new();
        for &partition in rows.keys() {
            let owner = self.get_owner(partition, workers).ok_or_else(|| {
                AnnotatorError::worker_unavailable("no running workers to place partitions on")
            })?;
            owners.insert(partition, owner);
        }

        Ok(PartitionPlan { rows, owners })
    }
}
