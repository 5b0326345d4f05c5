//! Check definitions and the registry they live in.
//!
//! A check is declared by registering named async steps on a builder. The
//! engine drives the resulting state machine one step at a time; a step
//! receives the current state and the runtime context and answers with
//! either `Continue` (next step name plus new state) or `Done`.

use crate::engine::context::RuntimeContext;
use crate::engine::interpreter::CheckTask;
use crate::engine::model::{CheckMetadata, Finding, ScanTarget};
use crate::error::Error;
use indexmap::IndexMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Per-check mutable state, snapshotted into history on every tick.
pub type CheckState = serde_json::Value;

/// What a completed check leaves behind for its dependents.
pub type CheckOutput = serde_json::Value;

/// What a single step invocation yields.
#[derive(Debug, Clone)]
pub enum StepAction {
    /// Suspend and resume at `next_step` with `state`.
    Continue {
        next_step: String,
        state: CheckState,
        findings: Vec<Finding>,
    },
    /// The check is finished.
    Done {
        state: Option<CheckState>,
        findings: Vec<Finding>,
        output: Option<CheckOutput>,
    },
}

impl StepAction {
    /// Finish with no findings and no output.
    #[must_use]
    pub const fn done() -> Self {
        Self::Done {
            state: None,
            findings: Vec::new(),
            output: None,
        }
    }

    /// Suspend, resuming at `next_step` with the given state.
    pub fn continue_with(next_step: impl Into<String>, state: CheckState) -> Self {
        Self::Continue {
            next_step: next_step.into(),
            state,
            findings: Vec::new(),
        }
    }

    /// Attaches findings to this action.
    #[must_use]
    pub fn with_findings(mut self, new: Vec<Finding>) -> Self {
        match &mut self {
            Self::Continue { findings, .. } | Self::Done { findings, .. } => findings.extend(new),
        }
        self
    }

    /// Attaches a single finding to this action.
    #[must_use]
    pub fn with_finding(self, finding: Finding) -> Self {
        self.with_findings(vec![finding])
    }

    /// Sets the output stored for dependent checks. Only meaningful on
    /// `Done`.
    #[must_use]
    pub fn with_output(mut self, value: CheckOutput) -> Self {
        if let Self::Done { output, .. } = &mut self {
            *output = Some(value);
        }
        self
    }
}

type StepFuture = Pin<Box<dyn Future<Output = Result<StepAction, Error>> + Send>>;
pub(crate) type StepFn =
    Arc<dyn Fn(CheckState, Arc<RuntimeContext>) -> StepFuture + Send + Sync>;

type InitStateFn = Box<dyn Fn(&ScanTarget) -> CheckState + Send + Sync>;
type WhenFn = Box<dyn Fn(&ScanTarget) -> bool + Send + Sync>;
type DedupeKeyFn = Box<dyn Fn(&ScanTarget) -> String + Send + Sync>;

/// A registered check: metadata plus its step machine and applicability
/// hooks.
pub struct CheckDefinition {
    metadata: CheckMetadata,
    entry: String,
    steps: IndexMap<String, StepFn>,
    init_state: InitStateFn,
    when: Option<WhenFn>,
    dedupe_key: Option<DedupeKeyFn>,
}

impl CheckDefinition {
    /// Starts declaring a check.
    #[must_use]
    pub fn builder(metadata: CheckMetadata) -> CheckBuilder {
        CheckBuilder {
            metadata,
            steps: IndexMap::new(),
            init_state: None,
            when: None,
            dedupe_key: None,
        }
    }

    #[must_use]
    pub const fn metadata(&self) -> &CheckMetadata {
        &self.metadata
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.metadata.id
    }

    /// Whether this check applies to the target. `true` when no `when`
    /// hook was declared.
    #[must_use]
    pub fn applies_to(&self, target: &ScanTarget) -> bool {
        self.when.as_ref().is_none_or(|when| when(target))
    }

    /// The dedupe key for the target, when the check declares a strategy.
    #[must_use]
    pub fn dedupe_key(&self, target: &ScanTarget) -> Option<String> {
        self.dedupe_key.as_ref().map(|key| key(target))
    }

    /// Instantiates a task for one target×check execution.
    #[must_use]
    pub fn create(self: Arc<Self>, context: Arc<RuntimeContext>) -> CheckTask {
        let state = (self.init_state)(context.target());
        let entry = self.entry.clone();
        CheckTask::new(self, context, entry, state)
    }

    pub(crate) fn step_fn(&self, name: &str) -> Option<StepFn> {
        self.steps.get(name).cloned()
    }
}

impl std::fmt::Debug for CheckDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckDefinition")
            .field("id", &self.metadata.id)
            .field("entry", &self.entry)
            .field("steps", &self.steps.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

/// Builder for [`CheckDefinition`]. The first registered step is the entry
/// point.
pub struct CheckBuilder {
    metadata: CheckMetadata,
    steps: IndexMap<String, StepFn>,
    init_state: Option<InitStateFn>,
    when: Option<WhenFn>,
    dedupe_key: Option<DedupeKeyFn>,
}

impl CheckBuilder {
    /// Registers a named step. Steps run in whatever order the machine
    /// dictates; registration order only picks the entry point.
    #[must_use]
    pub fn step<F, Fut>(mut self, name: &str, f: F) -> Self
    where
        F: Fn(CheckState, Arc<RuntimeContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<StepAction, Error>> + Send + 'static,
    {
        self.steps.insert(
            name.to_string(),
            Arc::new(move |state, ctx| -> StepFuture { Box::pin(f(state, ctx)) }),
        );
        self
    }

    /// Initial state factory; defaults to `null`.
    #[must_use]
    pub fn init_state<F>(mut self, f: F) -> Self
    where
        F: Fn(&ScanTarget) -> CheckState + Send + Sync + 'static,
    {
        self.init_state = Some(Box::new(f));
        self
    }

    /// Applicability predicate; absent means "applies to every target".
    #[must_use]
    pub fn when<F>(mut self, f: F) -> Self
    where
        F: Fn(&ScanTarget) -> bool + Send + Sync + 'static,
    {
        self.when = Some(Box::new(f));
        self
    }

    /// Dedupe key strategy: a pure function of the target. Checks with a
    /// strategy run at most once per `(check, key)` pair per scan.
    #[must_use]
    pub fn dedupe_key<F>(mut self, f: F) -> Self
    where
        F: Fn(&ScanTarget) -> String + Send + Sync + 'static,
    {
        self.dedupe_key = Some(Box::new(f));
        self
    }

    /// Validates and finalizes the declaration.
    ///
    /// # Errors
    ///
    /// Fails when the id is empty, no step was registered, or the severity
    /// list is empty.
    pub fn build(self) -> Result<CheckDefinition, Error> {
        if self.metadata.id.is_empty() {
            return Err(Error::invalid_config("check id cannot be empty"));
        }
        if self.metadata.severities.is_empty() {
            return Err(Error::invalid_config(format!(
                "check '{}' declares no severities",
                self.metadata.id
            )));
        }
        let Some(entry) = self.steps.keys().next().cloned() else {
            return Err(Error::invalid_config(format!(
                "check '{}' registers no steps",
                self.metadata.id
            )));
        };
        Ok(CheckDefinition {
            metadata: self.metadata,
            entry,
            steps: self.steps,
            init_state: self
                .init_state
                .unwrap_or_else(|| Box::new(|_| CheckState::Null)),
            when: self.when,
            dedupe_key: self.dedupe_key,
        })
    }
}

/// Registered checks, in registration order. Registration order is the
/// tie-break for batch filtering and dedupe claims.
#[derive(Default, Debug)]
pub struct CheckRegistry {
    checks: IndexMap<String, Arc<CheckDefinition>>,
}

impl CheckRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a check.
    ///
    /// # Errors
    ///
    /// Fails when another check with the same id is already registered.
    pub fn register(&mut self, check: CheckDefinition) -> Result<(), Error> {
        let id = check.id().to_string();
        if self.checks.contains_key(&id) {
            return Err(Error::invalid_config(format!(
                "check '{id}' is already registered"
            )));
        }
        self.checks.insert(id, Arc::new(check));
        Ok(())
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Arc<CheckDefinition>> {
        self.checks.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<CheckDefinition>> {
        self.checks.values()
    }

    #[must_use]
    pub fn ids(&self) -> Vec<&str> {
        self.checks.keys().map(String::as_str).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.checks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::model::{CheckType, Severity};

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

    #[test]
    fn build_rejects_stepless_checks() {
        let err = CheckDefinition::builder(metadata("empty")).build();
        assert!(err.is_err());
    }

    #[test]
    fn build_rejects_empty_severities() {
        let mut meta = metadata("no-severity");
        meta.severities.clear();
        let err = CheckDefinition::builder(meta)
            .step("scan", |_, _| async { Ok(StepAction::done()) })
            .build();
        assert!(err.is_err());
    }

    #[test]
    fn first_registered_step_is_the_entry() {
        let check = CheckDefinition::builder(metadata("two-step"))
            .step("first", |_, _| async { Ok(StepAction::done()) })
            .step("second", |_, _| async { Ok(StepAction::done()) })
            .build()
            .unwrap();
        assert_eq!(check.entry, "first");
        assert!(check.step_fn("second").is_some());
        assert!(check.step_fn("third").is_none());
    }

    #[test]
    fn registry_rejects_duplicate_ids() {
        let mut registry = CheckRegistry::new();
        let build = || {
            CheckDefinition::builder(metadata("dup"))
                .step("scan", |_, _| async { Ok(StepAction::done()) })
                .build()
                .unwrap()
        };
        registry.register(build()).unwrap();
        assert!(registry.register(build()).is_err());
    }

    #[test]
    fn registry_preserves_registration_order() {
        let mut registry = CheckRegistry::new();
        for id in ["c", "a", "b"] {
            registry
                .register(
                    CheckDefinition::builder(metadata(id))
                        .step("scan", |_, _| async { Ok(StepAction::done()) })
                        .build()
                        .unwrap(),
                )
                .unwrap();
        }
        assert_eq!(registry.ids(), vec!["c", "a", "b"]);
    }
}
