//! Built-in checks.
//!
//! Everything here uses the public plugin API — the engine itself has no
//! knowledge of these checks. Passive checks inspect captured traffic;
//! the one active check issues probes through the throttled queue.

pub mod csp;
pub mod headers;
pub mod reflect;

use crate::engine::model::{Correlation, Finding, FindingLocation, ScanTarget, Severity};
use crate::engine::registry::CheckRegistry;
use crate::error::Error;

/// A check constructor. Constructors are cheap; the CLI rebuilds subsets
/// from this list when the user filters by id or tag.
pub type CheckConstructor = fn() -> Result<crate::engine::registry::CheckDefinition, Error>;

/// Every built-in check, dependency providers first.
#[must_use]
pub fn builtins() -> Vec<CheckConstructor> {
    vec![
        csp::not_enforced,
        csp::clickjacking,
        csp::untrusted_script,
        headers::hsts_missing,
        headers::server_version_disclosure,
        headers::cookie_flags,
        reflect::reflected_input,
    ]
}

/// Registers the full built-in suite.
///
/// # Errors
///
/// Propagates registration failures (duplicate ids).
pub fn register_builtins(registry: &mut CheckRegistry) -> Result<(), Error> {
    for constructor in builtins() {
        registry.register(constructor()?)?;
    }
    Ok(())
}

/// A finding correlated to the target's own request, with no body
/// locations.
pub(crate) fn target_finding(
    target: &ScanTarget,
    name: &str,
    description: String,
    severity: Severity,
) -> Finding {
    Finding {
        name: name.to_string(),
        description,
        severity,
        correlation: Correlation {
            request_id: target.request_id().to_string(),
            locations: Vec::new(),
        },
    }
}

/// Byte ranges of every occurrence of `needle` in `haystack`, each with
/// the same hint.
pub(crate) fn locate_all(haystack: &str, needle: &str, hint: &str) -> Vec<FindingLocation> {
    let mut locations = Vec::new();
    let mut offset = 0;
    while let Some(position) = haystack[offset..].find(needle) {
        let start = offset + position;
        locations.push(FindingLocation {
            start,
            end: start + needle.len(),
            hint: Some(hint.to_string()),
        });
        offset = start + needle.len();
    }
    locations
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_suite_registers_cleanly() {
        let mut registry = CheckRegistry::new();
        register_builtins(&mut registry).unwrap();
        assert_eq!(registry.len(), 7);
        // Dependencies resolve and layer
        let plan = crate::engine::plan::build_plan(&registry).unwrap();
        assert!(plan.len() >= 2);
    }

    #[test]
    fn locate_all_finds_every_occurrence() {
        let locations = locate_all("abcXdefXghi", "X", "marker");
        assert_eq!(locations.len(), 2);
        assert_eq!(locations[0].start, 3);
        assert_eq!(locations[0].end, 4);
        assert_eq!(locations[1].start, 7);
        assert!(locate_all("nothing", "X", "marker").is_empty());
    }
}
