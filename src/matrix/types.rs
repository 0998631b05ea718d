use super::assembler::build_matrix;
use crate::candidate::types::CandidateKey;
use crate::error::{AnnotatorError, Result};
use crate::executor::types::Vote;

use serde::{Deserialize, Serialize};

/// One stored cell of a label matrix.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LabelEntry {
    pub row: u64,
    pub col: u32,
    pub vote: Vote,
}

impl LabelEntry {
    pub fn new(row: u64, col: u32, vote: Vote) -> Self {
        Self { row, col, vote }
    }

    pub fn coordinate(&self) -> (u64, u32) {
        (self.row, self.col)
    }
}

/// Lossless hand-off form of a label matrix: shape, names, row keys and triples.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SerializedLabelMatrix {
    pub row_count: usize,
    pub col_count: usize,
    pub column_names: Vec<String>,
    pub row_keys: Vec<CandidateKey>,
    pub entries: Vec<LabelEntry>,
}

/// Sparse matrix of votes in compressed sparse row layout.
///
/// Rows are candidates in cached order, columns are labeling functions in
/// application order. Cells that are not stored are abstain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "SerializedLabelMatrix", try_from = "SerializedLabelMatrix")]
pub struct LabelMatrix {
    pub(crate) row_count: usize,
    pub(crate) col_count: usize,
    pub(crate) column_names: Vec<String>,
    pub(crate) row_keys: Vec<CandidateKey>,
    pub(crate) indptr: Vec<usize>,
    pub(crate) indices: Vec<u32>,
    pub(crate) votes: Vec<Vote>,
}

impl LabelMatrix {
    pub fn row_count(&self) -> usize {
        self.row_count
    }

    pub fn col_count(&self) -> usize {
        self.col_count
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.row_count, self.col_count)
    }

    pub fn column_names(&self) -> &[String] {
        &self.column_names
    }

    pub fn row_keys(&self) -> &[CandidateKey] {
        &self.row_keys
    }

    /// Number of stored (non-abstain) cells.
    pub fn nnz(&self) -> usize {
        self.votes.len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.column_names.iter().position(|c| c == name)
    }

    /// Row index of a candidate key.
    pub fn row_index(&self, key: CandidateKey) -> Option<usize> {
        self.row_keys.binary_search(&key).ok()
    }

    /// Stored cells of one row, ascending by column.
    pub fn row(&self, row: usize) -> impl Iterator<Item = (u32, Vote)> + '_ {
        let (start, end) = if row < self.row_count {
            (self.indptr[row], self.indptr[row + 1])
        } else {
            (0, 0)
        };
        self.indices[start..end]
            .iter()
            .copied()
            .zip(self.votes[start..end].iter().copied())
    }

    pub fn get(&self, row: usize, col: usize) -> Vote {
        if row >= self.row_count {
            return Vote::ABSTAIN;
        }
        let (start, end) = (self.indptr[row], self.indptr[row + 1]);
        match self.indices[start..end].binary_search(&(col as u32)) {
            Ok(offset) => self.votes[start + offset],
            Err(_) => Vote::ABSTAIN,
        }
    }

    /// Dense copy of one column.
    pub fn column(&self, col: usize) -> Vec<Vote> {
        (0..self.row_count).map(|row| self.get(row, col)).collect()
    }

    pub fn column_by_name(&self, name: &str) -> Option<Vec<Vote>> {
        self.column_index(name).map(|col| self.column(col))
    }

    /// All stored cells, ordered by (row, col).
    pub fn to_triples(&self) -> Vec<LabelEntry> {
        let mut entries = Vec::with_capacity(self.nnz());
        for row in 0..self.row_count {
            for (col, vote) in self.row(row) {
                entries.push(LabelEntry::new(row as u64, col, vote));
            }
        }
        entries
    }

    pub fn to_serialized(&self) -> SerializedLabelMatrix {
        SerializedLabelMatrix {
            row_count: self.row_count,
            col_count: self.col_count,
            column_names: self.column_names.clone(),
            row_keys: self.row_keys.clone(),
            entries: self.to_triples(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| AnnotatorError::serialization("label matrix", e))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| AnnotatorError::serialization("label matrix", e))
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serialize(&self.to_serialized())
            .map_err(|e| AnnotatorError::serialization("label matrix", e))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let serialized: SerializedLabelMatrix = bincode::deserialize(bytes)
            .map_err(|e| AnnotatorError::serialization("label matrix", e))?;
        Self::try_from(serialized)
    }
}

impl From<LabelMatrix> for SerializedLabelMatrix {
    fn from(matrix: LabelMatrix) -> Self {
        matrix.to_serialized()
    }
}

impl TryFrom<SerializedLabelMatrix> for LabelMatrix {
    type Error = AnnotatorError;

    fn try_from(serialized: SerializedLabelMatrix) -> Result<Self> {
        build_matrix(
            serialized.row_count,
            serialized.col_count,
            serialized.column_names,
            serialized.row_keys,
            serialized.entries,
        )
    }
}
