//! Vigil: a passive/active web-security scan engine for captured HTTP
//! traffic.
//!
//! The core is the [`engine`]: a registry of pluggable checks is layered
//! into dependency batches, executed concurrently per target with
//! deduplication and per-check timeouts, observed through a typed event
//! bus, and recorded into an append-only execution history. Check-issued
//! requests flow through a throttled queue; cancellation is cooperative
//! and honored at every suspension point.
//!
//! ```no_run
//! use std::sync::Arc;
//! use vigil::checks;
//! use vigil::engine::model::ScanConfig;
//! use vigil::engine::registry::CheckRegistry;
//! use vigil::engine::runner::ScanRunner;
//! use vigil::host::MemoryHost;
//!
//! # async fn demo() -> Result<(), vigil::Error> {
//! let mut registry = CheckRegistry::new();
//! checks::register_builtins(&mut registry)?;
//!
//! let host = Arc::new(MemoryHost::new());
//! let targets = host.request_ids();
//! let runner = ScanRunner::new(&registry, ScanConfig::default(), host)?;
//! let outcome = runner.run(targets).await;
//! println!("{} finding(s)", outcome.findings().len());
//! # Ok(())
//! # }
//! ```

pub mod capture;
pub mod checks;
pub mod cli;
pub mod config;
pub mod duration;
pub mod engine;
pub mod error;
pub mod host;
pub mod html;
pub mod output;
pub mod suggestions;

pub use engine::model::{
    Aggressivity, CheckMetadata, CheckType, Correlation, Finding, FindingLocation,
    InterruptReason, ScanConfig, ScanEstimate, ScanOutcome, ScanTarget, Severity,
};
pub use engine::registry::{CheckDefinition, CheckRegistry, StepAction};
pub use engine::runner::ScanRunner;
pub use error::{Error, ErrorCode};
