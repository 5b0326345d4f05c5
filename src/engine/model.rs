//! Core data model: severities, check metadata, findings, targets, scan
//! configuration, and outcomes.

use crate::host::{HttpRequest, HttpResponse};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Severity tiers, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// All severities, least severe first.
    pub const ALL: [Self; 5] = [
        Self::Info,
        Self::Low,
        Self::Medium,
        Self::High,
        Self::Critical,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "info" => Ok(Self::Info),
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            other => Err(format!("unknown severity: {other}")),
        }
    }
}

/// Whether a check only inspects captured traffic or issues requests of
/// its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckType {
    Passive,
    Active,
}

impl std::fmt::Display for CheckType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Passive => f.write_str("passive"),
            Self::Active => f.write_str("active"),
        }
    }
}

/// Payload-volume tier. Checks declare the minimum tier they need; the scan
/// configuration carries the tier the user allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggressivity {
    Low,
    Medium,
    High,
}

impl std::str::FromStr for Aggressivity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(format!("unknown aggressivity: {other}")),
        }
    }
}

/// How many requests an active check may issue at the lowest and highest
/// aggressivity tiers. Purely informational for planning and UI sizing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RequestBudget {
    pub min_requests: u32,
    pub max_requests: u32,
}

/// Static declaration of a check. The `id` is stable across releases and
/// is what history, events, dedupe state, and dependency edges key on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckMetadata {
    pub id: String,
    pub name: String,
    pub description: String,
    pub check_type: CheckType,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Severities this check may emit; must be non-empty.
    pub severities: Vec<Severity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggressivity: Option<RequestBudget>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_aggressivity: Option<Aggressivity>,
    /// Checks that must complete for a target before this one starts.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Skip this check entirely once the referenced check has findings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_if_found_by: Option<String>,
}

/// A byte range within the correlated response body, with an optional
/// display hint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FindingLocation {
    pub start: usize,
    pub end: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

/// Ties a finding back to the request it was observed on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Correlation {
    pub request_id: String,
    #[serde(default)]
    pub locations: Vec<FindingLocation>,
}

/// A single security observation. Immutable once emitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub name: String,
    pub description: String,
    pub severity: Severity,
    pub correlation: Correlation,
}

/// A captured request (and response, when one exists) selected for
/// scanning.
#[derive(Debug, Clone)]
pub struct ScanTarget {
    pub request: Arc<HttpRequest>,
    pub response: Option<Arc<HttpResponse>>,
}

impl ScanTarget {
    #[must_use]
    pub fn request_id(&self) -> &str {
        self.request.id()
    }

    /// First value of a response header, if there is a response carrying it.
    #[must_use]
    pub fn response_header(&self, name: &str) -> Option<&str> {
        self.response.as_deref().and_then(|r| r.header_first(name))
    }

    /// Whether the captured response is HTML, judged by `Content-Type`.
    #[must_use]
    pub fn is_html(&self) -> bool {
        self.response_header("content-type")
            .is_some_and(|ct| ct.to_ascii_lowercase().contains("text/html"))
    }
}

/// Scan-wide configuration. Timeouts are in seconds; `0` disables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    pub aggressivity: Aggressivity,
    pub severities: Vec<Severity>,
    pub in_scope_only: bool,
    pub concurrent_targets: usize,
    pub concurrent_checks: usize,
    pub concurrent_requests: usize,
    /// Spacing between check-issued sends, in milliseconds. `0` disables.
    pub requests_delay_ms: u64,
    pub scan_timeout: u64,
    pub check_timeout: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            aggressivity: Aggressivity::Low,
            severities: Severity::ALL.to_vec(),
            in_scope_only: true,
            concurrent_targets: 5,
            concurrent_checks: 5,
            concurrent_requests: 5,
            requests_delay_ms: 0,
            scan_timeout: 0,
            check_timeout: 60,
        }
    }
}

/// Why a scan stopped early.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InterruptReason {
    Cancelled,
    Timeout,
}

impl std::fmt::Display for InterruptReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cancelled => f.write_str("Cancelled"),
            Self::Timeout => f.write_str("Timeout"),
        }
    }
}

/// Terminal result of [`crate::engine::runner::ScanRunner::run`].
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind")]
pub enum ScanOutcome {
    Finished {
        findings: Vec<Finding>,
    },
    Interrupted {
        reason: InterruptReason,
        findings: Vec<Finding>,
    },
    Error {
        error: String,
    },
}

impl ScanOutcome {
    /// Findings accumulated before the scan ended, regardless of how it
    /// ended.
    #[must_use]
    pub fn findings(&self) -> &[Finding] {
        match self {
            Self::Finished { findings } | Self::Interrupted { findings, .. } => findings,
            Self::Error { .. } => &[],
        }
    }
}

/// Result of [`crate::engine::runner::ScanRunner::estimate`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScanEstimate {
    pub checks_total: usize,
}
