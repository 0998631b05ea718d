use super::types::{LabelEntry, LabelMatrix};
use crate::candidate::types::CandidateKey;
use crate::error::{AnnotatorError, Result};
use crate::executor::types::PartitionRows;

use std::collections::HashSet;

/// Merges per-partition rows into one matrix.
///
/// Arrival order does not matter; coordinates define position. A partition
/// reported twice, a cell emitted twice or a coordinate out of range is an
/// `InvariantViolation`.
pub fn assemble(
    parts: Vec<PartitionRows>,
    row_count: usize,
    col_count: usize,
    column_names: Vec<String>,
    row_keys: Vec<CandidateKey>,
) -> Result<LabelMatrix> {
    let mut seen_partitions = HashSet::new();
    let mut entries = Vec::with_capacity(parts.iter().map(|p| p.entries.len()).sum());

    for part in parts {
        if !seen_partitions.insert(part.partition) {
            return Err(AnnotatorError::invariant(format!(
                "partition {} reported more than once",
                part.partition
            )));
        }
        entries.extend(part.entries);
    }

    tracing::debug!(
        "Assembling {} cells from {} partitions into {}x{}",
        entries.len(),
        seen_partitions.len(),
        row_count,
        col_count
    );

    build_matrix(row_count, col_count, column_names, row_keys, entries)
}

/// Validates triples and builds the compressed row layout.
pub(crate) fn build_matrix(
    row_count: usize,
    col_count: usize,
    column_names: Vec<String>,
    row_keys: Vec<CandidateKey>,
    mut entries: Vec<LabelEntry>,
) -> Result<LabelMatrix> {
    if column_names.len() != col_count {
        return Err(AnnotatorError::invariant(format!(
            "{} column names for {} columns",
            column_names.len(),
            col_count
        )));
    }
    if row_keys.len() != row_count {
        return Err(AnnotatorError::invariant(format!(
            "{} row keys for {} rows",
            row_keys.len(),
            row_count
        )));
    }

    for entry in &entries {
        if entry.row >= row_count as u64 || entry.col as usize >= col_count {
            return Err(AnnotatorError::invariant(format!(
                "cell ({}, {}) outside {}x{} matrix",
                entry.row, entry.col, row_count, col_count
            )));
        }
        if entry.vote.is_abstain() {
            return Err(AnnotatorError::invariant(format!(
                "cell ({}, {}) stores an explicit abstain",
                entry.row, entry.col
            )));
        }
    }

    entries.sort_by_key(|e| e.coordinate());
    if let Some(pair) = entries
        .windows(2)
        .find(|w| w[0].coordinate() == w[1].coordinate())
    {
        return Err(AnnotatorError::invariant(format!(
            "cell ({}, {}) emitted more than once (votes {} and {})",
            pair[0].row, pair[0].col, pair[0].vote, pair[1].vote
        )));
    }

    let mut indptr = vec![0usize; row_count + 1];
    for entry in &entries {
        indptr[entry.row as usize + 1] += 1;
    }
    for row in 0..row_count {
        indptr[row + 1] += indptr[row];
    }

    Ok(LabelMatrix {
        row_count,
        col_count,
        column_names,
        row_keys,
        indptr,
        indices: entries.iter().map(|e| e.col).collect(),
        votes: entries.iter().map(|e| e.vote).collect(),
    })
}
