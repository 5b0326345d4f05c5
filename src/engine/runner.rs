//! The scan runner: orchestrates targets × batches, owns all shared scan
//! state, and exposes the public lifecycle operations (`run`, `cancel`,
//! `estimate`, `external_dedupe_keys`, history and events).
//!
//! A runner is single-shot: one `run` per instance. Cancellation and the
//! scan timeout both trip the shared interrupt flag; in-flight work
//! unwinds cooperatively at its next suspension point.

use crate::engine::context::{
    is_applicable, resolve_target, ContextBuilder, DependencyOutputs, HtmlCache,
};
use crate::engine::dedupe::DedupeIndex;
use crate::engine::events::{EventBus, ScanEvent, ScanEventKind};
use crate::engine::executor::run_batch;
use crate::engine::history::{CheckExecutionRecord, ExecutionHistory};
use crate::engine::interrupt::Interrupt;
use crate::engine::model::{
    Finding, InterruptReason, ScanConfig, ScanEstimate, ScanOutcome,
};
use crate::engine::plan::{build_plan, ExecutionPlan};
use crate::engine::queue::RequestQueue;
use crate::engine::registry::CheckRegistry;
use crate::error::Error;
use crate::host::HostSdk;
use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// State the runner and batch executor share for the lifetime of a scan.
pub(crate) struct ScanShared {
    pub config: Arc<ScanConfig>,
    pub bus: Arc<EventBus>,
    pub interrupt: Arc<Interrupt>,
    pub dedupe: Arc<DedupeIndex>,
    pub dependencies: Arc<DependencyOutputs>,
    pub history: Arc<ExecutionHistory>,
    findings: Mutex<IndexMap<String, Vec<Finding>>>,
}

impl ScanShared {
    /// Appends a completed check's findings under its id.
    pub fn record_findings(&self, check_id: &str, findings: Vec<Finding>) {
        if findings.is_empty() {
            return;
        }
        self.findings
            .lock()
            .expect("findings map poisoned")
            .entry(check_id.to_string())
            .or_default()
            .extend(findings);
    }

    /// Whether any findings have been recorded under the id.
    pub fn has_findings(&self, check_id: &str) -> bool {
        self.findings
            .lock()
            .expect("findings map poisoned")
            .get(check_id)
            .is_some_and(|list| !list.is_empty())
    }

    /// Concatenation of every check's findings list.
    pub fn all_findings(&self) -> Vec<Finding> {
        self.findings
            .lock()
            .expect("findings map poisoned")
            .values()
            .flatten()
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    Idle,
    Running,
    Finished,
    Interrupted,
    Errored,
}

/// Top-level scan orchestrator. Construct one per scan.
pub struct ScanRunner {
    plan: Arc<ExecutionPlan>,
    shared: Arc<ScanShared>,
    ctx_builder: Arc<ContextBuilder>,
    host: Arc<dyn HostSdk>,
    state: Mutex<ScanState>,
    done_tx: watch::Sender<bool>,
    done_rx: watch::Receiver<bool>,
}

impl ScanRunner {
    /// Builds a runner over a registry of checks.
    ///
    /// # Errors
    ///
    /// Plan-time failures (`UNKNOWN_DEPENDENCY`, `CYCLIC_DEPENDENCIES`)
    /// abort construction.
    pub fn new(
        registry: &CheckRegistry,
        config: ScanConfig,
        host: Arc<dyn HostSdk>,
    ) -> Result<Self, Error> {
        let plan = Arc::new(build_plan(registry)?);
        let config = Arc::new(config);
        let bus = Arc::new(EventBus::new());
        let interrupt = Arc::new(Interrupt::new());
        let queue = Arc::new(RequestQueue::new(
            Arc::clone(&host),
            config.concurrent_requests,
            config.requests_delay_ms,
            Arc::clone(&interrupt),
            Arc::clone(&bus),
        ));
        let dependencies = Arc::new(DependencyOutputs::new());
        let ctx_builder = Arc::new(ContextBuilder {
            host: Arc::clone(&host),
            queue,
            config: Arc::clone(&config),
            html: Arc::new(HtmlCache::new(Arc::clone(&host))),
            dependencies: Arc::clone(&dependencies),
        });
        let shared = Arc::new(ScanShared {
            config,
            bus,
            interrupt,
            dedupe: Arc::new(DedupeIndex::new()),
            dependencies,
            history: Arc::new(ExecutionHistory::new()),
            findings: Mutex::new(IndexMap::new()),
        });
        let (done_tx, done_rx) = watch::channel(false);
        Ok(Self {
            plan,
            shared,
            ctx_builder,
            host,
            state: Mutex::new(ScanState::Idle),
            done_tx,
            done_rx,
        })
    }

    /// The event bus this scan reports on.
    #[must_use]
    pub fn events(&self) -> Arc<EventBus> {
        Arc::clone(&self.shared.bus)
    }

    /// Registers a listener for one event kind.
    pub fn on<F>(&self, kind: ScanEventKind, handler: F)
    where
        F: Fn(&ScanEvent) + Send + Sync + 'static,
    {
        self.shared.bus.on(kind, handler);
    }

    /// An immutable snapshot of the execution history so far.
    #[must_use]
    pub fn execution_history(&self) -> Vec<CheckExecutionRecord> {
        self.shared.history.snapshot()
    }

    /// Pre-seeds the dedupe index, e.g. to merge with a prior scan.
    ///
    /// # Errors
    ///
    /// `SCAN_ALREADY_RUNNING` when called after `run`.
    pub fn external_dedupe_keys(&self, keys: HashMap<String, Vec<String>>) -> Result<(), Error> {
        let state = self.state.lock().expect("scan state poisoned");
        if *state != ScanState::Idle {
            return Err(Error::scan_already_running());
        }
        self.shared.dedupe.seed(keys);
        Ok(())
    }

    /// Counts the checks a run over `request_ids` would execute, without
    /// executing anything. Operates on a snapshot of the dedupe index.
    ///
    /// # Errors
    ///
    /// `REQUEST_NOT_FOUND` for an unresolvable target.
    pub async fn estimate(&self, request_ids: &[String]) -> Result<ScanEstimate, Error> {
        let dedupe = self.shared.dedupe.snapshot();
        let config = &self.shared.config;
        let mut checks_total = 0;

        for request_id in request_ids {
            let target = resolve_target(&self.host, request_id).await?;
            if config.in_scope_only && !self.host.in_scope(&target.request) {
                continue;
            }
            for batch in self.plan.iter() {
                for check in batch {
                    if is_applicable(check, &target, config, &dedupe) {
                        checks_total += 1;
                    }
                }
            }
        }
        Ok(ScanEstimate { checks_total })
    }

    /// Runs the scan over the given capture ids.
    ///
    /// Single-shot: a second invocation (or a concurrent one) returns an
    /// `Error` outcome immediately. Emits `scan:started` first and
    /// `scan:finished` last, whatever the outcome.
    pub async fn run(&self, request_ids: Vec<String>) -> ScanOutcome {
        {
            let mut state = self.state.lock().expect("scan state poisoned");
            if *state != ScanState::Idle {
                return ScanOutcome::Error {
                    error: "scan is already running".into(),
                };
            }
            *state = ScanState::Running;
        }

        info!(targets = request_ids.len(), "scan started");
        self.shared.bus.emit(&ScanEvent::Started);

        let scan = self.run_targets(request_ids);
        tokio::pin!(scan);
        let timeout_secs = self.shared.config.scan_timeout;
        let result = if timeout_secs > 0 {
            tokio::select! {
                result = &mut scan => result,
                () = tokio::time::sleep(Duration::from_secs(timeout_secs)) => {
                    warn!(timeout_secs, "scan timeout fired; interrupting");
                    self.shared.interrupt.trip(InterruptReason::Timeout);
                    // Drain cooperatively so no task outlives the scan.
                    scan.await
                }
            }
        } else {
            scan.await
        };

        let outcome = match result {
            // A trip that raced the final suspension point still counts.
            Ok(()) => match self.shared.interrupt.get() {
                Some(reason) => ScanOutcome::Interrupted {
                    reason,
                    findings: self.shared.all_findings(),
                },
                None => ScanOutcome::Finished {
                    findings: self.shared.all_findings(),
                },
            },
            Err(err) if err.is_interrupted() => {
                let reason = self
                    .shared
                    .interrupt
                    .get()
                    .unwrap_or(InterruptReason::Cancelled);
                ScanOutcome::Interrupted {
                    reason,
                    findings: self.shared.all_findings(),
                }
            }
            Err(err) => ScanOutcome::Error {
                error: err.to_string(),
            },
        };

        let terminal = match &outcome {
            ScanOutcome::Finished { findings } => {
                info!(findings = findings.len(), "scan finished");
                ScanState::Finished
            }
            ScanOutcome::Interrupted { reason, findings } => {
                info!(%reason, findings = findings.len(), "scan interrupted");
                self.shared
                    .bus
                    .emit(&ScanEvent::Interrupted { reason: *reason });
                ScanState::Interrupted
            }
            ScanOutcome::Error { error } => {
                warn!(error, "scan errored");
                ScanState::Errored
            }
        };
        *self.state.lock().expect("scan state poisoned") = terminal;
        self.shared.bus.emit(&ScanEvent::Finished);
        let _ = self.done_tx.send(true);
        outcome
    }

    /// Requests cancellation and waits for the scan to wind down. No-op
    /// when the scan never started or has already terminated. Idempotent.
    pub async fn cancel(&self, reason: InterruptReason) {
        {
            let state = self.state.lock().expect("scan state poisoned");
            if *state != ScanState::Running {
                return;
            }
        }
        self.shared.interrupt.trip(reason);

        let mut done = self.done_rx.clone();
        while !*done.borrow_and_update() {
            if done.changed().await.is_err() {
                break;
            }
        }
    }

    async fn run_targets(&self, request_ids: Vec<String>) -> Result<(), Error> {
        let semaphore = Arc::new(Semaphore::new(
            self.shared.config.concurrent_targets.max(1),
        ));
        let mut pool: JoinSet<Result<(), Error>> = JoinSet::new();

        for request_id in request_ids {
            let shared = Arc::clone(&self.shared);
            let ctx_builder = Arc::clone(&self.ctx_builder);
            let host = Arc::clone(&self.host);
            let plan = Arc::clone(&self.plan);
            let semaphore = Arc::clone(&semaphore);

            pool.spawn(async move {
                let _permit = semaphore
                    .acquire()
                    .await
                    .map_err(|_| Error::Runtime("target pool semaphore closed".into()))?;
                shared.interrupt.check()?;

                let target = resolve_target(&host, &request_id).await?;
                if shared.config.in_scope_only && !host.in_scope(&target.request) {
                    debug!(request_id, host = target.request.host(), "target out of scope");
                    return Ok(());
                }

                for batch in plan.iter() {
                    shared.interrupt.check()?;
                    run_batch(&shared, &ctx_builder, batch, &target).await?;
                }
                Ok(())
            });
        }

        let mut interrupted: Option<Error> = None;
        let mut first_error: Option<Error> = None;
        while let Some(joined) = pool.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(err)) if err.is_interrupted() => {
                    interrupted.get_or_insert(err);
                }
                Ok(Err(err)) => {
                    first_error.get_or_insert(err);
                }
                Err(join_err) => {
                    first_error.get_or_insert(Error::Runtime(join_err.to_string()));
                }
            }
        }

        if let Some(err) = interrupted {
            return Err(err);
        }
        if let Some(err) = first_error {
            return Err(err);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::model::{CheckMetadata, CheckType, Severity};
    use crate::engine::registry::{CheckDefinition, StepAction};
    use crate::host::MemoryHost;

    fn registry() -> CheckRegistry {
        let mut registry = CheckRegistry::new();
        registry
            .register(
                CheckDefinition::builder(CheckMetadata {
                    id: "noop".into(),
                    name: "No-op".into(),
                    description: String::new(),
                    check_type: CheckType::Passive,
                    tags: vec![],
                    severities: vec![Severity::Info],
                    aggressivity: None,
                    min_aggressivity: None,
                    depends_on: vec![],
                    skip_if_found_by: None,
                })
                .step("scan", |_, _| async { Ok(StepAction::done()) })
                .build()
                .unwrap(),
            )
            .unwrap();
        registry
    }

    fn runner() -> ScanRunner {
        ScanRunner::new(
            &registry(),
            ScanConfig::default(),
            Arc::new(MemoryHost::new()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn empty_target_list_finishes_with_no_findings() {
        let runner = runner();
        match runner.run(vec![]).await {
            ScanOutcome::Finished { findings } => assert!(findings.is_empty()),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn second_run_is_rejected() {
        let runner = runner();
        runner.run(vec![]).await;
        match runner.run(vec![]).await {
            ScanOutcome::Error { error } => assert!(error.contains("already running")),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_target_errors_the_scan() {
        let runner = runner();
        match runner.run(vec!["ghost".into()]).await {
            ScanOutcome::Error { error } => assert!(error.contains("REQUEST_NOT_FOUND")),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn external_dedupe_keys_rejected_after_run() {
        let runner = runner();
        runner.run(vec![]).await;
        let err = runner.external_dedupe_keys(HashMap::new()).unwrap_err();
        assert!(err.to_string().contains("SCAN_ALREADY_RUNNING"));
    }

    #[tokio::test]
    async fn cancel_before_run_is_a_no_op() {
        let runner = runner();
        runner.cancel(InterruptReason::Cancelled).await;
        match runner.run(vec![]).await {
            ScanOutcome::Finished { .. } => {}
            other => panic!("unexpected outcome: {other:?}"),
        }
    }
}
