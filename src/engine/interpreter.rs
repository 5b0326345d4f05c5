//! The task interpreter: drives a check's state machine to completion.
//!
//! One tick is one step invocation. Around every tick the interpreter
//! snapshots the state, emits findings in order, and appends a step record
//! to the shared step log — so even a task that later times out leaves its
//! completed ticks in history.

use crate::engine::context::RuntimeContext;
use crate::engine::events::{EventBus, ScanEvent};
use crate::engine::history::{StepDisposition, StepExecutionRecord};
use crate::engine::interrupt::Interrupt;
use crate::engine::model::{Finding, ScanTarget};
use crate::engine::registry::{CheckDefinition, CheckOutput, CheckState, StepAction};
use crate::error::Error;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// A live check execution: the current step name, the mutable state, and
/// the accumulated output.
pub struct CheckTask {
    definition: Arc<CheckDefinition>,
    context: Arc<RuntimeContext>,
    step_name: String,
    state: CheckState,
    output: Option<CheckOutput>,
    done: bool,
}

impl CheckTask {
    pub(crate) fn new(
        definition: Arc<CheckDefinition>,
        context: Arc<RuntimeContext>,
        entry: String,
        state: CheckState,
    ) -> Self {
        Self {
            definition,
            context,
            step_name: entry,
            state,
            output: None,
            done: false,
        }
    }

    #[must_use]
    pub fn current_step_name(&self) -> &str {
        &self.step_name
    }

    #[must_use]
    pub const fn current_state(&self) -> &CheckState {
        &self.state
    }

    #[must_use]
    pub fn target(&self) -> &ScanTarget {
        self.context.target()
    }

    #[must_use]
    pub const fn output(&self) -> Option<&CheckOutput> {
        self.output.as_ref()
    }

    #[must_use]
    pub fn check_id(&self) -> &str {
        self.definition.id()
    }

    /// Runs the current step once, applying its transition.
    ///
    /// # Errors
    ///
    /// Whatever the step raises, plus a runtime error when the machine
    /// names a step that does not exist.
    pub async fn tick(&mut self) -> Result<StepAction, Error> {
        let step = self.definition.step_fn(&self.step_name).ok_or_else(|| {
            Error::Runtime(format!(
                "check '{}' has no step named '{}'",
                self.definition.id(),
                self.step_name
            ))
        })?;

        let action = step(self.state.clone(), Arc::clone(&self.context)).await?;
        match &action {
            StepAction::Continue {
                next_step, state, ..
            } => {
                self.step_name.clone_from(next_step);
                self.state = state.clone();
            }
            StepAction::Done { state, output, .. } => {
                if let Some(state) = state {
                    self.state = state.clone();
                }
                self.output.clone_from(output);
                self.done = true;
            }
        }
        Ok(action)
    }
}

/// Shared step log: the interpreter appends records as ticks complete so
/// the executor can recover them after a timeout drops the drive future.
pub(crate) type StepLog = Arc<Mutex<Vec<StepExecutionRecord>>>;

/// How a driven task ended.
#[derive(Debug)]
pub(crate) enum TaskOutcome {
    Completed { output: Option<CheckOutput> },
    Failed { code: String, message: String },
}

#[derive(Debug)]
pub(crate) struct DriveResult {
    pub findings: Vec<Finding>,
    pub outcome: TaskOutcome,
}

/// Drives a task until `Done`, a failure, or an interruption.
///
/// Per tick: re-check the interrupt flag (nothing is recorded for an
/// aborted tick), snapshot state, run the step, emit each finding in
/// order, append a step record. Check-level errors are caught and turned
/// into a `Failed` outcome.
///
/// # Errors
///
/// Only `ScanInterrupted` propagates.
pub(crate) async fn drive(
    mut task: CheckTask,
    interrupt: &Interrupt,
    bus: &EventBus,
    steps: &StepLog,
) -> Result<DriveResult, Error> {
    let check_id = task.check_id().to_string();
    let target_request_id = task.target().request_id().to_string();
    let mut findings: Vec<Finding> = Vec::new();

    loop {
        interrupt.check()?;

        let state_before = task.current_state().clone();
        let step_name = task.current_step_name().to_string();

        let action = match task.tick().await {
            Ok(action) => action,
            Err(err) if err.is_interrupted() => return Err(err),
            Err(err) => {
                let (code, message) = err.as_failure();
                debug!(check_id, step = step_name, code, "check step failed");
                return Ok(DriveResult {
                    findings,
                    outcome: TaskOutcome::Failed { code, message },
                });
            }
        };

        let (step_findings, disposition, finished) = match &action {
            StepAction::Continue {
                next_step,
                findings,
                ..
            } => (
                findings.clone(),
                StepDisposition::Continue {
                    next_step: next_step.clone(),
                },
                false,
            ),
            StepAction::Done { findings, .. } => (findings.clone(), StepDisposition::Done, true),
        };

        for finding in &step_findings {
            bus.emit(&ScanEvent::Finding {
                target_request_id: target_request_id.clone(),
                check_id: check_id.clone(),
                finding: finding.clone(),
            });
        }

        steps
            .lock()
            .expect("step log poisoned")
            .push(StepExecutionRecord {
                step_name,
                state_before,
                state_after: task.current_state().clone(),
                findings: step_findings.clone(),
                disposition,
            });
        findings.extend(step_findings);

        if finished {
            return Ok(DriveResult {
                findings,
                outcome: TaskOutcome::Completed {
                    output: task.output().cloned(),
                },
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::context::{ContextBuilder, DependencyOutputs, HtmlCache};
    use crate::engine::model::{
        CheckMetadata, CheckType, Correlation, ScanConfig, Severity,
    };
    use crate::engine::queue::RequestQueue;
    use crate::host::{HostSdk, HttpRequest, MemoryHost, RequestSpec};
    use serde_json::json;

    fn harness() -> (ContextBuilder, Arc<Interrupt>, Arc<EventBus>, ScanTarget) {
        let host: Arc<dyn HostSdk> = Arc::new(MemoryHost::new());
        let interrupt = Arc::new(Interrupt::new());
        let bus = Arc::new(EventBus::new());
        let queue = Arc::new(RequestQueue::new(
            Arc::clone(&host),
            1,
            0,
            Arc::clone(&interrupt),
            Arc::clone(&bus),
        ));
        let builder = ContextBuilder {
            host: Arc::clone(&host),
            queue,
            config: Arc::new(ScanConfig::default()),
            html: Arc::new(HtmlCache::new(Arc::clone(&host))),
            dependencies: Arc::new(DependencyOutputs::new()),
        };
        let target = ScanTarget {
            request: Arc::new(HttpRequest::from_spec(
                "req-1".into(),
                RequestSpec::get("https", "example.com", 443, "/"),
            )),
            response: None,
        };
        (builder, interrupt, bus, target)
    }

    fn metadata(id: &str) -> CheckMetadata {
        CheckMetadata {
            id: id.into(),
            name: id.into(),
            description: String::new(),
            check_type: CheckType::Passive,
            tags: vec![],
            severities: vec![Severity::Low],
            aggressivity: None,
            min_aggressivity: None,
            depends_on: vec![],
            skip_if_found_by: None,
        }
    }

    fn finding(name: &str) -> Finding {
        Finding {
            name: name.into(),
            description: String::new(),
            severity: Severity::Low,
            correlation: Correlation {
                request_id: "req-1".into(),
                locations: vec![],
            },
        }
    }

    #[tokio::test]
    async fn multi_step_machine_records_each_tick() {
        let check = Arc::new(
            CheckDefinition::builder(metadata("counter"))
                .init_state(|_| json!({"count": 0}))
                .step("first", |state, _| async move {
                    let count = state["count"].as_u64().unwrap();
                    Ok(StepAction::continue_with("second", json!({"count": count + 1})))
                })
                .step("second", |state, _| async move {
                    Ok(StepAction::done()
                        .with_output(state.clone())
                        .with_finding(Finding {
                            name: "observed".into(),
                            description: String::new(),
                            severity: Severity::Low,
                            correlation: Correlation {
                                request_id: "req-1".into(),
                                locations: vec![],
                            },
                        }))
                })
                .build()
                .unwrap(),
        );

        let (builder, interrupt, bus, target) = harness();
        let task = Arc::clone(&check).create(builder.for_check(&target, &check));
        let steps: StepLog = Arc::new(Mutex::new(Vec::new()));
        let result = drive(task, &interrupt, &bus, &steps).await.unwrap();

        assert!(matches!(
            result.outcome,
            TaskOutcome::Completed { output: Some(ref o) } if o == &json!({"count": 1})
        ));
        assert_eq!(result.findings.len(), 1);

        let steps = steps.lock().unwrap();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].step_name, "first");
        assert_eq!(steps[0].state_before, json!({"count": 0}));
        assert_eq!(steps[0].state_after, json!({"count": 1}));
        assert!(matches!(
            steps[0].disposition,
            StepDisposition::Continue { ref next_step } if next_step == "second"
        ));
        assert_eq!(steps[1].step_name, "second");
        assert!(matches!(steps[1].disposition, StepDisposition::Done));
        assert_eq!(steps[1].findings.len(), 1);
    }

    #[tokio::test]
    async fn runnable_errors_become_failed_outcomes_with_their_code() {
        let check = Arc::new(
            CheckDefinition::builder(metadata("raiser"))
                .step("scan", |_, _| async {
                    Err(Error::runnable("PAYLOAD_EXHAUSTED", "nothing to send"))
                })
                .build()
                .unwrap(),
        );
        let (builder, interrupt, bus, target) = harness();
        let task = Arc::clone(&check).create(builder.for_check(&target, &check));
        let steps: StepLog = Arc::new(Mutex::new(Vec::new()));
        let result = drive(task, &interrupt, &bus, &steps).await.unwrap();

        match result.outcome {
            TaskOutcome::Failed { code, .. } => assert_eq!(code, "PAYLOAD_EXHAUSTED"),
            other => panic!("unexpected outcome: {other:?}"),
        }
        // The failing tick is not recorded
        assert!(steps.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_next_step_fails_as_unknown_check_error() {
        let check = Arc::new(
            CheckDefinition::builder(metadata("lost"))
                .step("scan", |_, _| async {
                    Ok(StepAction::continue_with("nowhere", CheckState::Null))
                })
                .build()
                .unwrap(),
        );
        let (builder, interrupt, bus, target) = harness();
        let task = Arc::clone(&check).create(builder.for_check(&target, &check));
        let steps: StepLog = Arc::new(Mutex::new(Vec::new()));
        let result = drive(task, &interrupt, &bus, &steps).await.unwrap();

        match result.outcome {
            TaskOutcome::Failed { code, .. } => assert_eq!(code, "UNKNOWN_CHECK_ERROR"),
            other => panic!("unexpected outcome: {other:?}"),
        }
        // The transition tick itself completed and is on record
        assert_eq!(steps.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn interruption_propagates_without_recording_the_aborted_tick() {
        let check = Arc::new(
            CheckDefinition::builder(metadata("loop"))
                .step("scan", |_, _| async {
                    Ok(StepAction::continue_with("scan", CheckState::Null))
                })
                .build()
                .unwrap(),
        );
        let (builder, interrupt, bus, target) = harness();
        let task = Arc::clone(&check).create(builder.for_check(&target, &check));
        interrupt.trip(crate::engine::model::InterruptReason::Cancelled);

        let steps: StepLog = Arc::new(Mutex::new(Vec::new()));
        let err = drive(task, &interrupt, &bus, &steps).await.unwrap_err();
        assert!(err.is_interrupted());
        assert!(steps.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn findings_are_emitted_in_order() {
        let check = Arc::new(
            CheckDefinition::builder(metadata("emitter"))
                .step("scan", |_, _| async {
                    Ok(StepAction::done()
                        .with_findings(vec![finding("first"), finding("second")]))
                })
                .build()
                .unwrap(),
        );
        let (builder, interrupt, bus, target) = harness();
        let names: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&names);
        bus.on(crate::engine::events::ScanEventKind::Finding, move |event| {
            if let ScanEvent::Finding { finding, .. } = event {
                sink.lock().unwrap().push(finding.name.clone());
            }
        });

        let task = Arc::clone(&check).create(builder.for_check(&target, &check));
        let steps: StepLog = Arc::new(Mutex::new(Vec::new()));
        drive(task, &interrupt, &bus, &steps).await.unwrap();

        assert_eq!(*names.lock().unwrap(), vec!["first", "second"]);
    }
}
