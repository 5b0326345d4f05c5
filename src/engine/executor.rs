//! Runs one batch of checks against one target with bounded concurrency.
//!
//! The executor filters the batch down to applicable checks (severity
//! overlap, aggressivity floor, `when` predicate, dedupe claim, and the
//! `skip_if_found_by` short-circuit), then drives each surviving check
//! with a per-task timeout. Check failures are recorded, never fatal;
//! interruption stops the pool and propagates.

use crate::engine::context::{is_applicable, ContextBuilder};
use crate::engine::events::ScanEvent;
use crate::engine::history::{
    CheckExecutionRecord, ExecutionFailure, ExecutionStatus, StepExecutionRecord,
};
use crate::engine::interpreter::{drive, StepLog, TaskOutcome};
use crate::engine::model::{Finding, ScanTarget};
use crate::engine::registry::{CheckDefinition, CheckOutput};
use crate::engine::runner::ScanShared;
use crate::error::Error;
use chrono::Utc;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::debug;

struct TaskBundle {
    check: Arc<CheckDefinition>,
    outcome: TaskOutcome,
    findings: Vec<Finding>,
    steps: Vec<StepExecutionRecord>,
}

/// Executes one batch for one target.
///
/// # Errors
///
/// `ScanInterrupted` once any task observes the interrupt flag; a
/// `ScanRuntimeError` aggregating any uncategorizable task failures after
/// the batch drains.
pub(crate) async fn run_batch(
    shared: &Arc<ScanShared>,
    ctx_builder: &Arc<ContextBuilder>,
    batch: &[Arc<CheckDefinition>],
    target: &ScanTarget,
) -> Result<(), Error> {
    // Filter in registration order; the first check to claim a dedupe key
    // wins it.
    let mut applicable: Vec<Arc<CheckDefinition>> = Vec::new();
    for check in batch {
        if !is_applicable(check, target, &shared.config, &shared.dedupe) {
            continue;
        }
        if let Some(found_by) = &check.metadata().skip_if_found_by {
            if shared.has_findings(found_by) {
                debug!(
                    check_id = check.id(),
                    found_by, "skipping check: referenced check already has findings"
                );
                continue;
            }
        }
        applicable.push(Arc::clone(check));
    }

    if applicable.is_empty() {
        return Ok(());
    }

    let semaphore = Arc::new(Semaphore::new(shared.config.concurrent_checks.max(1)));
    let mut pool: JoinSet<Result<TaskBundle, Error>> = JoinSet::new();

    for check in applicable {
        let shared = Arc::clone(shared);
        let ctx_builder = Arc::clone(ctx_builder);
        let target = target.clone();
        let semaphore = Arc::clone(&semaphore);

        pool.spawn(async move {
            let _permit = semaphore
                .acquire()
                .await
                .map_err(|_| Error::Runtime("check pool semaphore closed".into()))?;
            shared.interrupt.check()?;

            shared.bus.emit(&ScanEvent::CheckStarted {
                check_id: check.id().to_string(),
                target_request_id: target.request_id().to_string(),
            });

            let task = Arc::clone(&check).create(ctx_builder.for_check(&target, &check));
            let steps: StepLog = Arc::new(Mutex::new(Vec::new()));
            let timeout_secs = shared.config.check_timeout;

            let driven = if timeout_secs > 0 {
                match tokio::time::timeout(
                    Duration::from_secs(timeout_secs),
                    drive(task, &shared.interrupt, &shared.bus, &steps),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_elapsed) => {
                        let (code, message) =
                            Error::check_timeout(check.id(), timeout_secs).as_failure();
                        let steps = std::mem::take(&mut *steps.lock().expect("step log poisoned"));
                        return Ok(TaskBundle {
                            check,
                            outcome: TaskOutcome::Failed { code, message },
                            findings: Vec::new(),
                            steps,
                        });
                    }
                }
            } else {
                drive(task, &shared.interrupt, &shared.bus, &steps).await
            };

            let result = driven?;
            let steps = std::mem::take(&mut *steps.lock().expect("step log poisoned"));
            Ok(TaskBundle {
                check,
                outcome: result.outcome,
                findings: result.findings,
                steps,
            })
        });
    }

    let mut interrupted: Option<Error> = None;
    let mut stray_errors: Vec<String> = Vec::new();

    while let Some(joined) = pool.join_next().await {
        match joined {
            Ok(Ok(bundle)) => settle(shared, target, bundle),
            Ok(Err(err)) if err.is_interrupted() => {
                // The flag is already tripped; remaining tasks unwind at
                // their next suspension point while the pool drains.
                interrupted.get_or_insert(err);
            }
            Ok(Err(err)) => stray_errors.push(err.to_string()),
            Err(join_err) => stray_errors.push(join_err.to_string()),
        }
    }

    if let Some(err) = interrupted {
        return Err(err);
    }
    if !stray_errors.is_empty() {
        return Err(Error::Runtime(stray_errors.join("; ")));
    }
    Ok(())
}

/// Applies a terminated task to shared state: findings, dependency
/// outputs, history, and the finished/failed events.
fn settle(shared: &Arc<ScanShared>, target: &ScanTarget, bundle: TaskBundle) {
    let check_id = bundle.check.id().to_string();
    let target_request_id = target.request_id().to_string();

    match bundle.outcome {
        TaskOutcome::Completed { output } => {
            shared.record_findings(&check_id, bundle.findings);
            if let Some(output) = &output {
                shared.dependencies.insert(&check_id, output.clone());
            }
            shared.history.append(record(
                &check_id,
                &target_request_id,
                bundle.steps,
                ExecutionStatus::Completed,
                output,
                None,
            ));
        }
        TaskOutcome::Failed { code, message } => {
            shared.history.append(record(
                &check_id,
                &target_request_id,
                bundle.steps,
                ExecutionStatus::Failed,
                None,
                Some(ExecutionFailure {
                    code: code.clone(),
                    message: message.clone(),
                }),
            ));
            shared.bus.emit(&ScanEvent::CheckFailed {
                check_id: check_id.clone(),
                target_request_id: target_request_id.clone(),
                error_code: code,
                error_message: message,
            });
        }
    }

    shared.bus.emit(&ScanEvent::CheckFinished {
        check_id,
        target_request_id,
    });
}

fn record(
    check_id: &str,
    target_request_id: &str,
    steps: Vec<StepExecutionRecord>,
    status: ExecutionStatus,
    final_output: Option<CheckOutput>,
    error: Option<ExecutionFailure>,
) -> CheckExecutionRecord {
    CheckExecutionRecord {
        check_id: check_id.to_string(),
        target_request_id: target_request_id.to_string(),
        recorded_at: Utc::now(),
        steps,
        status,
        final_output,
        error,
    }
}
