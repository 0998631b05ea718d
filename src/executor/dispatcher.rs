//! Function Dispatcher
//!
//! Applies an ordered list of labeling functions to cached candidate partitions.
//!
//! ## Responsibilities
//! - **Worker side**: `evaluate_partition` runs every function on every row of one partition,
//!   keeps only non-abstain votes and turns errors and panics into `LfFault`s.
//! - **Coordinator side**: `dispatch` ships one `Apply` per owning worker, gathers the
//!   per-partition rows and applies the failure policy.
//! - **Cancellation**: dropping an in-flight `dispatch` notifies the workers, which stop at the
//!   next row. Resident partitions are untouched.

use super::registry::ResolvedLf;
use super::types::{FailureMode, FaultLog, LfFault, PartitionRows, RunId};
use crate::broadcast::store::ResourceContext;
use crate::cluster::protocol::{PartitionPayload, WorkerMessage, WorkerReply};
use crate::cluster::service::ClusterSession;
use crate::cluster::types::WorkerId;
use crate::error::{AnnotatorError, Result};
use crate::matrix::types::LabelEntry;
use crate::storage::cache::CachedSet;

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use tokio::task::JoinSet;

#[derive(Debug, Clone, Copy)]
pub struct EvalOptions {
    pub mode: FailureMode,
    pub max_abs_vote: i32,
}

/// Evaluates `functions` over one partition, row by row, in column order.
///
/// `is_cancelled` is polled before each row.
pub fn evaluate_partition<C>(
    payload: &PartitionPayload,
    functions: &[ResolvedLf],
    ctx: &ResourceContext,
    options: EvalOptions,
    is_cancelled: C,
) -> PartitionRows
where
    C: Fn() -> bool,
{
    let mut output = PartitionRows {
        partition: payload.partition,
        ..Default::default()
    };

    for row in &payload.rows {
        if is_cancelled() {
            tracing::debug!(
                "Partition {} cancelled after {} rows",
                payload.partition,
                output.rows_processed
            );
            output.cancelled = true;
            return output;
        }

        for lf in functions {
            let outcome = catch_unwind(AssertUnwindSafe(|| (lf.function)(&row.candidate, ctx)));

            let message = match outcome {
                Ok(Ok(vote)) if vote.0.unsigned_abs() <= options.max_abs_vote.unsigned_abs() => {
                    if !vote.is_abstain() {
                        output.entries.push(LabelEntry::new(row.row, lf.column, vote));
                    }
                    continue;
                }
                Ok(Ok(vote)) => format!(
                    "vote {} is outside the alphabet bound ±{}",
                    vote, options.max_abs_vote
                ),
                Ok(Err(e)) => format!("{:#}", e),
                Err(panic) => panic_message(panic.as_ref()),
            };

            let fault = LfFault {
                function: lf.name.clone(),
                column: lf.column,
                candidate: row.candidate.key,
                row: row.row,
                partition: payload.partition,
                message,
            };

            match options.mode {
                FailureMode::FailFast => {
                    tracing::error!(
                        "Labeling function '{}' failed on candidate {}: {}",
                        fault.function,
                        fault.candidate,
                        fault.message
                    );
                    output.failure = Some(fault);
                    return output;
                }
                FailureMode::Isolated => {
                    tracing::warn!(
                        "Labeling function '{}' failed on candidate {}, recording abstain: {}",
                        fault.function,
                        fault.candidate,
                        fault.message
                    );
                    output.faults.push(fault);
                }
            }
        }

        output.rows_processed += 1;
    }

    output
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("panicked: {}", message)
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("panicked: {}", message)
    } else {
        "panicked".to_string()
    }
}

/// Sends `CancelRun` to the workers of a run unless the run completed.
struct RunGuard {
    session: Arc<ClusterSession>,
    run_id: RunId,
    workers: Vec<WorkerId>,
    completed: bool,
}

impl RunGuard {
    fn complete(mut self) {
        self.completed = true;
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if self.completed {
            return;
        }
        tracing::warn!(
            "Run {} aborted, cancelling on {} workers",
            self.run_id,
            self.workers.len()
        );
        for worker_id in &self.workers {
            self.session.notify(
                worker_id,
                &WorkerMessage::CancelRun {
                    run_id: self.run_id.clone(),
                },
            );
        }
    }
}

/// Result of a dispatched run, before assembly.
#[derive(Debug, Clone)]
pub struct DispatchOutput {
    pub run_id: RunId,
    pub partitions: Vec<PartitionRows>,
    pub faults: FaultLog,
}

/// Runs `functions` over every partition of `cached` and gathers the results.
///
/// In fail-fast mode, the failure with the smallest (row, column) coordinate
/// across partitions is returned as `LfExecution`. Each partition stops at its
/// own first failure, but the coordinator waits for every partition: rows are
/// interleaved across partitions, so a lower failing row may still be pending.
pub async fn dispatch(
    session: &Arc<ClusterSession>,
    cached: &CachedSet,
    functions: &[ResolvedLf],
    mode: FailureMode,
) -> Result<DispatchOutput> {
    let run_id = RunId::new();
    let owners = cached.owners();
    let names: Vec<String> = functions.iter().map(|lf| lf.name.clone()).collect();
    let max_abs_vote = session.config().max_abs_vote;

    tracing::info!(
        "Run {}: {} functions over {} ({} rows, {} partitions on {} workers)",
        run_id,
        names.len(),
        cached.handle.key,
        cached.handle.row_count,
        cached.assignments.len(),
        owners.len()
    );

    let guard = RunGuard {
        session: session.clone(),
        run_id: run_id.clone(),
        workers: owners.keys().cloned().collect(),
        completed: false,
    };

    let mut pending = JoinSet::new();
    for (worker_id, partitions) in owners {
        let message = WorkerMessage::Apply {
            run_id: run_id.clone(),
            cache_key: cached.handle.key.clone(),
            version: cached.handle.version,
            partitions,
            functions: names.clone(),
            mode,
            max_abs_vote,
        };
        let session = session.clone();
        pending.spawn(async move {
            let reply = session.request(&worker_id, &message).await;
            (worker_id, reply)
        });
    }
    session
        .transport()
        .record_function_shipment(guard.workers.len());

    let mut partitions = Vec::with_capacity(cached.assignments.len());
    while let Some(joined) = pending.join_next().await {
        let (worker_id, reply) = joined.map_err(|e| {
            AnnotatorError::worker_unavailable(format!("apply task failed: {}", e))
        })?;

        match reply? {
            WorkerReply::Applied {
                partitions: worker_rows,
            } => {
                tracing::debug!(
                    "Run {}: worker {} returned {} partitions",
                    run_id,
                    worker_id,
                    worker_rows.len()
                );
                partitions.extend(worker_rows);
            }
            WorkerReply::Failed { message } => {
                return Err(AnnotatorError::worker_unavailable(format!(
                    "worker {} failed run {}: {}",
                    worker_id, run_id, message
                )));
            }
            WorkerReply::Ack => {
                return Err(AnnotatorError::invariant(format!(
                    "worker {} acknowledged run {} without results",
                    worker_id, run_id
                )));
            }
        }
    }
    guard.complete();

    if partitions.iter().any(|p| p.cancelled) {
        return Err(AnnotatorError::Cancelled(run_id.to_string()));
    }

    let first_failure = partitions
        .iter()
        .filter_map(|p| p.failure.as_ref())
        .min_by_key(|fault| fault.coordinate());

    if let Some(fault) = first_failure {
        return Err(AnnotatorError::LfExecution {
            function: fault.function.clone(),
            candidate: fault.candidate,
            split: cached.handle.key.split.clone(),
            cache_key: cached.handle.key.clone(),
            message: fault.message.clone(),
        });
    }

    let faults = FaultLog::new(
        partitions
            .iter_mut()
            .flat_map(|p| std::mem::take(&mut p.faults))
            .collect(),
    );

    if !faults.is_empty() {
        tracing::warn!("Run {} finished with {} isolated faults", run_id, faults.len());
    }

    Ok(DispatchOutput {
        run_id,
        partitions,
        faults,
    })
}
