use crate::candidate::types::CandidateKey;
use crate::error::{AnnotatorError, Result};
use crate::matrix::types::LabelEntry;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A weak label emitted by a labeling function. `0` means abstain.
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
pub struct Vote(pub i32);

impl Vote {
    pub const ABSTAIN: Vote = Vote(0);
    pub const POSITIVE: Vote = Vote(1);
    pub const NEGATIVE: Vote = Vote(-1);

    pub fn is_abstain(self) -> bool {
        self.0 == 0
    }

    pub fn signum(self) -> i32 {
        self.0.signum()
    }

    /// Combines two votes: abstain if either operand abstains, otherwise the
    /// product of their signs.
    pub fn combine(self, other: Vote) -> Vote {
        if self.is_abstain() || other.is_abstain() {
            Vote::ABSTAIN
        } else {
            Vote(self.signum() * other.signum())
        }
    }
}

impl From<i32> for Vote {
    fn from(value: i32) -> Self {
        Vote(value)
    }
}

impl fmt::Display for Vote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:+}", self.0)
    }
}

/// Unique identifier of one labeling run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct RunId(pub String);

impl RunId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How the dispatcher reacts to a labeling function fault.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum FailureMode {
    /// Abort the whole run on the first fault.
    #[default]
    FailFast,
    /// Record the faulting cell as abstain and keep going.
    Isolated,
}

impl FromStr for FailureMode {
    type Err = AnnotatorError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fail_fast" | "fail-fast" | "failfast" => Ok(FailureMode::FailFast),
            "isolated" | "isolate" => Ok(FailureMode::Isolated),
            other => Err(AnnotatorError::invalid_input(format!(
                "unknown failure mode '{}'",
                other
            ))),
        }
    }
}

/// A single labeling function fault, with everything needed to reproduce it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LfFault {
    pub function: String,
    pub column: u32,
    pub candidate: CandidateKey,
    pub row: u64,
    pub partition: u32,
    pub message: String,
}

impl LfFault {
    /// Position of the faulting cell, used to pick a deterministic first failure.
    pub fn coordinate(&self) -> (u64, u32) {
        (self.row, self.column)
    }
}

/// Faults recorded during an isolated-mode run, ordered by (row, column).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FaultLog {
    faults: Vec<LfFault>,
}

impl FaultLog {
    pub fn new(mut faults: Vec<LfFault>) -> Self {
        faults.sort_by_key(|f| f.coordinate());
        Self { faults }
    }

    pub fn len(&self) -> usize {
        self.faults.len()
    }

    pub fn is_empty(&self) -> bool {
        self.faults.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LfFault> {
        self.faults.iter()
    }

    pub fn for_function<'a>(&'a self, function: &'a str) -> impl Iterator<Item = &'a LfFault> {
        self.faults.iter().filter(move |f| f.function == function)
    }
}

/// Output of one partition for one labeling run.
///
/// `entries` only holds non-abstain cells. `failure` is set when the partition
/// stopped on a fault in fail-fast mode.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PartitionRows {
    pub partition: u32,
    pub entries: Vec<LabelEntry>,
    pub faults: Vec<LfFault>,
    pub failure: Option<LfFault>,
    pub rows_processed: usize,
    pub cancelled: bool,
}
