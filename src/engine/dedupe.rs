//! The dedupe index: per-check sets of claimed keys.
//!
//! A check that declares a dedupe-key strategy runs at most once per
//! `(check_id, key)` pair for the lifetime of one scan. The index is
//! claim-on-filter: whichever target's batch filter claims a key first
//! wins, and later targets skip the check.

use crate::engine::model::ScanTarget;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

/// Separator for the default key strategy. A newline cannot appear in a
/// host, port, or path component.
const KEY_SEPARATOR: char = '\n';

/// The default dedupe strategy: one execution per `(host, port, path)`.
#[must_use]
pub fn location_key(target: &ScanTarget) -> String {
    let request = &target.request;
    format!(
        "{}{KEY_SEPARATOR}{}{KEY_SEPARATOR}{}",
        request.host(),
        request.port(),
        request.path()
    )
}

/// A coarser strategy: one execution per host.
#[must_use]
pub fn host_key(target: &ScanTarget) -> String {
    target.request.host().to_string()
}

/// One execution per `(host, port)`.
#[must_use]
pub fn host_port_key(target: &ScanTarget) -> String {
    let request = &target.request;
    format!("{}{KEY_SEPARATOR}{}", request.host(), request.port())
}

/// Claimed keys per check id.
#[derive(Debug, Default)]
pub struct DedupeIndex {
    claims: Mutex<HashMap<String, HashSet<String>>>,
}

impl DedupeIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically tests and claims `(check_id, key)`. Returns `true` when
    /// the key was absent (the caller should run the check) and `false`
    /// when an earlier claim already covers it.
    pub fn claim(&self, check_id: &str, key: &str) -> bool {
        self.claims
            .lock()
            .expect("dedupe index poisoned")
            .entry(check_id.to_string())
            .or_default()
            .insert(key.to_string())
    }

    /// An independent copy of the current claims. Estimation runs against
    /// a snapshot so it never pollutes the live index.
    #[must_use]
    pub fn snapshot(&self) -> Self {
        Self {
            claims: Mutex::new(self.claims.lock().expect("dedupe index poisoned").clone()),
        }
    }

    /// Merges externally-recorded claims in, e.g. to resume or merge with
    /// a prior scan.
    pub fn seed(&self, keys: HashMap<String, Vec<String>>) {
        let mut claims = self.claims.lock().expect("dedupe index poisoned");
        for (check_id, check_keys) in keys {
            claims.entry(check_id).or_default().extend(check_keys);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{HttpRequest, RequestSpec};
    use std::sync::Arc;

    fn target(host: &str, port: u16, path: &str) -> ScanTarget {
        ScanTarget {
            request: Arc::new(HttpRequest::from_spec(
                "req-1".into(),
                RequestSpec::get("https", host, port, path),
            )),
            response: None,
        }
    }

    #[test]
    fn first_claim_wins_repeat_claims_lose() {
        let index = DedupeIndex::new();
        assert!(index.claim("csp", "example.com"));
        assert!(!index.claim("csp", "example.com"));
        // Same key under a different check is independent
        assert!(index.claim("hsts", "example.com"));
    }

    #[test]
    fn snapshot_claims_do_not_leak_back() {
        let index = DedupeIndex::new();
        index.claim("csp", "a");
        let snapshot = index.snapshot();
        assert!(!snapshot.claim("csp", "a"));
        assert!(snapshot.claim("csp", "b"));
        // The live index never saw "b"
        assert!(index.claim("csp", "b"));
    }

    #[test]
    fn seeded_keys_block_claims() {
        let index = DedupeIndex::new();
        index.seed(HashMap::from([(
            "csp".to_string(),
            vec!["a".to_string(), "b".to_string()],
        )]));
        assert!(!index.claim("csp", "a"));
        assert!(!index.claim("csp", "b"));
        assert!(index.claim("csp", "c"));
    }

    #[test]
    fn location_key_distinguishes_all_components() {
        let base = location_key(&target("example.com", 443, "/a"));
        assert_ne!(base, location_key(&target("example.com", 443, "/b")));
        assert_ne!(base, location_key(&target("example.com", 8443, "/a")));
        assert_ne!(base, location_key(&target("other.com", 443, "/a")));
        assert_eq!(base, location_key(&target("example.com", 443, "/a")));
    }

    #[test]
    fn host_key_collapses_ports_and_paths() {
        assert_eq!(
            host_key(&target("example.com", 443, "/a")),
            host_key(&target("example.com", 8080, "/b"))
        );
        assert_ne!(
            host_port_key(&target("example.com", 443, "/")),
            host_port_key(&target("example.com", 8080, "/"))
        );
    }
}
