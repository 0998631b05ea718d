use super::types::{EmpiricalAccuracy, LabelCoverage, LfStats, Metric, StatsReport};
use crate::error::{AnnotatorError, Result};
use crate::executor::types::Vote;
use crate::matrix::types::LabelMatrix;

use std::collections::BTreeSet;

#[derive(Default, Clone)]
struct ColumnCounts {
    voted: usize,
    overlapped: usize,
    conflicted: usize,
    polarity: BTreeSet<i32>,
    correct: usize,
    incorrect: usize,
}

fn count_columns(matrix: &LabelMatrix, gold: Option<&[Vote]>) -> Vec<ColumnCounts> {
    let mut counts = vec![ColumnCounts::default(); matrix.col_count()];

    for row in 0..matrix.row_count() {
        let cells: Vec<(u32, Vote)> = matrix.row(row).collect();
        let overlapping = cells.len() >= 2;

        for &(col, vote) in &cells {
            let column = &mut counts[col as usize];
            column.voted += 1;
            column.polarity.insert(vote.0);

            if overlapping {
                column.overlapped += 1;
            }
            if cells
                .iter()
                .any(|&(other, other_vote)| other != col && other_vote.signum() != vote.signum())
            {
                column.conflicted += 1;
            }
            if let Some(gold) = gold {
                if gold[row] == vote {
                    column.correct += 1;
                } else {
                    column.incorrect += 1;
                }
            }
        }
    }

    counts
}

fn build_stats(matrix: &LabelMatrix, counts: Vec<ColumnCounts>, with_gold: bool) -> Vec<LfStats> {
    let rows = matrix.row_count();
    counts
        .into_iter()
        .enumerate()
        .map(|(column, c)| LfStats {
            column,
            name: matrix.column_names()[column].clone(),
            polarity: c.polarity.into_iter().collect(),
            coverage: Metric::ratio(c.voted, rows),
            overlap: Metric::ratio(c.overlapped, rows),
            conflict: Metric::ratio(c.conflicted, rows),
            empirical: with_gold.then(|| EmpiricalAccuracy {
                correct: c.correct,
                incorrect: c.incorrect,
                accuracy: Metric::ratio(c.correct, c.correct + c.incorrect),
            }),
        })
        .collect()
}

/// Coverage, overlap and conflict of every column, in column order.
pub fn lf_stats(matrix: &LabelMatrix) -> Vec<LfStats> {
    build_stats(matrix, count_columns(matrix, None), false)
}

/// `lf_stats` plus empirical accuracy against `gold`, one gold vote per row.
pub fn lf_summary(matrix: &LabelMatrix, gold: Option<&[Vote]>) -> Result<Vec<LfStats>> {
    if let Some(gold) = gold
        && gold.len() != matrix.row_count()
    {
        return Err(AnnotatorError::invalid_input(format!(
            "{} gold labels for {} rows",
            gold.len(),
            matrix.row_count()
        )));
    }
    Ok(build_stats(
        matrix,
        count_columns(matrix, gold),
        gold.is_some(),
    ))
}

/// Matrix-level coverage, overlap and conflict.
pub fn label_coverage(matrix: &LabelMatrix) -> LabelCoverage {
    let mut covered = 0;
    let mut overlapped = 0;
    let mut conflicted = 0;

    for row in 0..matrix.row_count() {
        let signs: BTreeSet<i32> = matrix.row(row).map(|(_, vote)| vote.signum()).collect();
        let votes = matrix.row(row).count();
        if votes >= 1 {
            covered += 1;
        }
        if votes >= 2 {
            overlapped += 1;
        }
        if signs.len() >= 2 {
            conflicted += 1;
        }
    }

    let rows = matrix.row_count();
    LabelCoverage {
        coverage: Metric::ratio(covered, rows),
        overlap: Metric::ratio(overlapped, rows),
        conflict: Metric::ratio(conflicted, rows),
    }
}

/// Full report: per-function statistics plus matrix totals.
pub fn report(matrix: &LabelMatrix, gold: Option<&[Vote]>) -> Result<StatsReport> {
    Ok(StatsReport {
        row_count: matrix.row_count(),
        col_count: matrix.col_count(),
        nnz: matrix.nnz(),
        totals: label_coverage(matrix),
        functions: lf_summary(matrix, gold)?,
    })
}
