//! Error handling for the scan engine.
//!
//! All engine errors carry a stable [`ErrorCode`] whose string form is what
//! appears in `scan:check-failed` events and in execution-history records.
//! Two variants have special propagation rules:
//!
//! - [`Error::Interrupted`] unwinds every level of the scan and produces the
//!   `Interrupted` outcome; it is never recorded as a check failure.
//! - [`Error::Runnable`] is a check-raised error with a check-chosen code;
//!   the task interpreter catches it and records a `failed` execution,
//!   without aborting the batch, target, or scan.

use crate::engine::model::InterruptReason;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use thiserror::Error;

/// Stable error codes surfaced in events and history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    /// A target request, its response, or its body could not be obtained
    /// from the host.
    RequestNotFound,
    /// A check declares a dependency on an unregistered check id.
    UnknownDependency,
    /// The `depends_on` graph contains a cycle.
    CyclicDependencies,
    /// A check exceeded the configured per-check timeout.
    CheckTimeout,
    /// A check raised an error the engine cannot classify.
    UnknownCheckError,
    /// An illegal mutator call during or after a run.
    ScanAlreadyRunning,
}

impl ErrorCode {
    /// The stable string identifier for this code.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RequestNotFound => "REQUEST_NOT_FOUND",
            Self::UnknownDependency => "UNKNOWN_DEPENDENCY",
            Self::CyclicDependencies => "CYCLIC_DEPENDENCIES",
            Self::CheckTimeout => "CHECK_TIMEOUT",
            Self::UnknownCheckError => "UNKNOWN_CHECK_ERROR",
            Self::ScanAlreadyRunning => "SCAN_ALREADY_RUNNING",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum Error {
    // External errors that cannot be consolidated
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Engine error carrying a stable code.
    #[error("{code}: {message}")]
    Engine {
        code: ErrorCode,
        message: Cow<'static, str>,
    },

    /// Check-raised error; caught by the task interpreter and recorded as a
    /// failed execution.
    #[error("{code}: {message}")]
    Runnable { code: String, message: String },

    /// Cooperative cancellation; unwinds the scan.
    #[error("scan interrupted: {reason}")]
    Interrupted { reason: InterruptReason },

    /// Uncategorizable runtime failures aggregated by the batch executor.
    #[error("scan runtime error: {0}")]
    Runtime(String),

    /// Input validation and configuration errors.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl Error {
    pub fn request_not_found(what: impl Into<String>) -> Self {
        Self::Engine {
            code: ErrorCode::RequestNotFound,
            message: Cow::Owned(what.into()),
        }
    }

    pub fn unknown_dependency(check_id: &str, dep_id: &str) -> Self {
        Self::Engine {
            code: ErrorCode::UnknownDependency,
            message: Cow::Owned(format!(
                "check '{check_id}' depends on unregistered check '{dep_id}'"
            )),
        }
    }

    pub fn cyclic_dependencies(ids: &[String]) -> Self {
        Self::Engine {
            code: ErrorCode::CyclicDependencies,
            message: Cow::Owned(format!("dependency cycle involving: {}", ids.join(", "))),
        }
    }

    pub fn check_timeout(check_id: &str, seconds: u64) -> Self {
        Self::Engine {
            code: ErrorCode::CheckTimeout,
            message: Cow::Owned(format!(
                "check '{check_id}' exceeded the {seconds}s timeout"
            )),
        }
    }

    #[must_use]
    pub const fn scan_already_running() -> Self {
        Self::Engine {
            code: ErrorCode::ScanAlreadyRunning,
            message: Cow::Borrowed("scan is already running"),
        }
    }

    /// A check-raised error with a check-chosen stable code.
    pub fn runnable(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Runnable {
            code: code.into(),
            message: message.into(),
        }
    }

    #[must_use]
    pub const fn interrupted(reason: InterruptReason) -> Self {
        Self::Interrupted { reason }
    }

    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    /// The `(code, message)` pair recorded when this error terminates a
    /// check task. Interrupted errors are never classified; callers must
    /// propagate them instead.
    #[must_use]
    pub fn as_failure(&self) -> (String, String) {
        match self {
            Self::Engine { code, message } => (code.as_str().to_string(), message.to_string()),
            Self::Runnable { code, message } => (code.clone(), message.clone()),
            other => (
                ErrorCode::UnknownCheckError.as_str().to_string(),
                other.to_string(),
            ),
        }
    }

    /// Whether this error is the cooperative-cancellation signal.
    #[must_use]
    pub const fn is_interrupted(&self) -> bool {
        matches!(self, Self::Interrupted { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_are_stable_strings() {
        assert_eq!(ErrorCode::RequestNotFound.as_str(), "REQUEST_NOT_FOUND");
        assert_eq!(ErrorCode::UnknownDependency.as_str(), "UNKNOWN_DEPENDENCY");
        assert_eq!(
            ErrorCode::CyclicDependencies.as_str(),
            "CYCLIC_DEPENDENCIES"
        );
        assert_eq!(ErrorCode::CheckTimeout.as_str(), "CHECK_TIMEOUT");
        assert_eq!(ErrorCode::UnknownCheckError.as_str(), "UNKNOWN_CHECK_ERROR");
        assert_eq!(
            ErrorCode::ScanAlreadyRunning.as_str(),
            "SCAN_ALREADY_RUNNING"
        );
    }

    #[test]
    fn runnable_failure_keeps_its_code() {
        let err = Error::runnable("PAYLOAD_EXHAUSTED", "no payloads left");
        let (code, message) = err.as_failure();
        assert_eq!(code, "PAYLOAD_EXHAUSTED");
        assert_eq!(message, "no payloads left");
    }

    #[test]
    fn unclassified_failure_maps_to_unknown_check_error() {
        let err = Error::Runtime("task panicked".into());
        let (code, _) = err.as_failure();
        assert_eq!(code, "UNKNOWN_CHECK_ERROR");
    }

    #[test]
    fn interrupted_is_detectable() {
        assert!(Error::interrupted(InterruptReason::Cancelled).is_interrupted());
        assert!(!Error::Runtime("x".into()).is_interrupted());
    }
}
