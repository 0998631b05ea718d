use serde::{Deserialize, Serialize};
use std::fmt;

/// A fraction that may be undefined (empty denominator).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Metric {
    Value(f64),
    Undefined,
}

impl Metric {
    pub fn ratio(numerator: usize, denominator: usize) -> Self {
        if denominator == 0 {
            Metric::Undefined
        } else {
            Metric::Value(numerator as f64 / denominator as f64)
        }
    }

    pub fn value(self) -> Option<f64> {
        match self {
            Metric::Value(v) => Some(v),
            Metric::Undefined => None,
        }
    }

    pub fn is_undefined(self) -> bool {
        matches!(self, Metric::Undefined)
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Metric::Value(v) => write!(f, "{:.3}", v),
            Metric::Undefined => f.write_str("undefined"),
        }
    }
}

/// Agreement with gold labels, over the rows where the function voted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct EmpiricalAccuracy {
    pub correct: usize,
    pub incorrect: usize,
    pub accuracy: Metric,
}

/// Per-function statistics, one per matrix column.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LfStats {
    pub column: usize,
    pub name: String,
    /// Distinct non-abstain votes the function emitted, ascending.
    pub polarity: Vec<i32>,
    pub coverage: Metric,
    pub overlap: Metric,
    pub conflict: Metric,
    pub empirical: Option<EmpiricalAccuracy>,
}

/// Matrix-level fractions of rows with at least one vote, two votes, and a disagreement.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct LabelCoverage {
    pub coverage: Metric,
    pub overlap: Metric,
    pub conflict: Metric,
}

/// Summary report of one label matrix.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatsReport {
    pub row_count: usize,
    pub col_count: usize,
    pub nnz: usize,
    pub totals: LabelCoverage,
    pub functions: Vec<LfStats>,
}

impl fmt::Display for StatsReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name_width = self
            .functions
            .iter()
            .map(|s| s.name.len())
            .max()
            .unwrap_or(0)
            .max("function".len());

        writeln!(
            f,
            "{} candidates x {} functions, {} votes",
            self.row_count, self.col_count, self.nnz
        )?;
        writeln!(
            f,
            "{:<w$}  {:>3}  {:>9}  {:>9}  {:>9}  {:>9}  {}",
            "function",
            "j",
            "coverage",
            "overlap",
            "conflict",
            "accuracy",
            "polarity",
            w = name_width
        )?;

        for stats in &self.functions {
            let accuracy = stats
                .empirical
                .map(|e| e.accuracy.to_string())
                .unwrap_or_else(|| "-".to_string());
            let polarity = stats
                .polarity
                .iter()
                .map(|p| format!("{:+}", p))
                .collect::<Vec<_>>()
                .join(",");
            writeln!(
                f,
                "{:<w$}  {:>3}  {:>9}  {:>9}  {:>9}  {:>9}  [{}]",
                stats.name,
                stats.column,
                stats.coverage.to_string(),
                stats.overlap.to_string(),
                stats.conflict.to_string(),
                accuracy,
                polarity,
                w = name_width
            )?;
        }

        write!(
            f,
            "total coverage {}, overlap {}, conflict {}",
            self.totals.coverage, self.totals.overlap, self.totals.conflict
        )
    }
}
