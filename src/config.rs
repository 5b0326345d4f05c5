//! Optional TOML configuration, merged underneath CLI flags.
//!
//! Looked up at `--config <path>` or `<config_dir>/vigil/config.toml`.
//! Every field is optional; anything absent falls back to the
//! [`ScanConfig`] defaults or whatever the command line supplies.

use crate::duration::parse_duration;
use crate::engine::model::{Aggressivity, ScanConfig, Severity};
use crate::error::Error;
use crate::host::ScopePolicy;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub scan: ScanSection,
    #[serde(default)]
    pub scope: ScopeSection,
}

#[derive(Debug, Default, Deserialize)]
pub struct ScanSection {
    pub aggressivity: Option<Aggressivity>,
    pub severities: Option<Vec<Severity>>,
    pub in_scope_only: Option<bool>,
    pub concurrent_targets: Option<usize>,
    pub concurrent_checks: Option<usize>,
    pub concurrent_requests: Option<usize>,
    /// Duration string, e.g. "250ms".
    pub requests_delay: Option<String>,
    /// Duration string, e.g. "10m". "0" disables.
    pub scan_timeout: Option<String>,
    /// Duration string, e.g. "60s". "0" disables.
    pub check_timeout: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ScopeSection {
    #[serde(default)]
    pub allowed_hosts: Vec<String>,
}

impl ConfigFile {
    /// Loads configuration. An explicit path must exist and parse; the
    /// default location is optional.
    ///
    /// # Errors
    ///
    /// I/O or TOML parse failures for an explicit path.
    pub fn load(explicit: Option<&Path>) -> Result<Self, Error> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => {
                let Some(path) = Self::default_path() else {
                    return Ok(Self::default());
                };
                if !path.exists() {
                    return Ok(Self::default());
                }
                path
            }
        };
        let content = std::fs::read_to_string(&path)?;
        Ok(toml::from_str(&content)?)
    }

    /// `<config_dir>/vigil/config.toml`, when the platform has one.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("vigil").join("config.toml"))
    }

    /// Applies the file's settings over a base configuration.
    ///
    /// # Errors
    ///
    /// Invalid duration strings.
    pub fn apply(&self, config: &mut ScanConfig) -> Result<(), Error> {
        let scan = &self.scan;
        if let Some(aggressivity) = scan.aggressivity {
            config.aggressivity = aggressivity;
        }
        if let Some(severities) = &scan.severities {
            config.severities.clone_from(severities);
        }
        if let Some(in_scope_only) = scan.in_scope_only {
            config.in_scope_only = in_scope_only;
        }
        if let Some(n) = scan.concurrent_targets {
            config.concurrent_targets = n;
        }
        if let Some(n) = scan.concurrent_checks {
            config.concurrent_checks = n;
        }
        if let Some(n) = scan.concurrent_requests {
            config.concurrent_requests = n;
        }
        if let Some(delay) = &scan.requests_delay {
            config.requests_delay_ms = parse_duration(delay)?.as_millis().try_into().unwrap_or(u64::MAX);
        }
        if let Some(timeout) = &scan.scan_timeout {
            config.scan_timeout = parse_duration(timeout)?.as_secs();
        }
        if let Some(timeout) = &scan.check_timeout {
            config.check_timeout = parse_duration(timeout)?.as_secs();
        }
        Ok(())
    }

    #[must_use]
    pub fn scope_policy(&self) -> ScopePolicy {
        ScopePolicy {
            allowed_hosts: self.scope.allowed_hosts.clone(),
        }
    }
}
