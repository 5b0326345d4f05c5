//! Append-only record of every check execution in a scan.
//!
//! One [`CheckExecutionRecord`] is appended after a task terminates
//! (completed or failed); each of its steps carries the state snapshots
//! taken around the tick that ran it.

use crate::engine::model::Finding;
use crate::engine::registry::{CheckOutput, CheckState};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Mutex;

/// How one tick ended.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", rename_all = "lowercase")]
pub enum StepDisposition {
    Done,
    Continue { next_step: String },
}

/// One tick of a check's state machine.
#[derive(Debug, Clone, Serialize)]
pub struct StepExecutionRecord {
    pub step_name: String,
    pub state_before: CheckState,
    pub state_after: CheckState,
    pub findings: Vec<Finding>,
    #[serde(flatten)]
    pub disposition: StepDisposition,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Completed,
    Failed,
}

/// The terminal error of a failed execution.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionFailure {
    pub code: String,
    pub message: String,
}

/// One target×check execution, start to finish.
#[derive(Debug, Clone, Serialize)]
pub struct CheckExecutionRecord {
    pub check_id: String,
    pub target_request_id: String,
    pub recorded_at: DateTime<Utc>,
    pub steps: Vec<StepExecutionRecord>,
    pub status: ExecutionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_output: Option<CheckOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ExecutionFailure>,
}

/// Append-only history; snapshots are immutable copies.
#[derive(Debug, Default)]
pub struct ExecutionHistory {
    records: Mutex<Vec<CheckExecutionRecord>>,
}

impl ExecutionHistory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, record: CheckExecutionRecord) {
        self.records
            .lock()
            .expect("execution history poisoned")
            .push(record);
    }

    /// All records appended so far, in append order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<CheckExecutionRecord> {
        self.records
            .lock()
            .expect("execution history poisoned")
            .clone()
    }
}
