//! The runtime context handed to check tasks.
//!
//! Built per target×check by the runner: the target itself, the scan
//! configuration, a memoizing HTML view over captured responses, the
//! outputs of dependency checks, and a wrapped SDK whose sends go through
//! the request queue. Checks never see the host directly.

use crate::engine::dedupe::DedupeIndex;
use crate::engine::model::{ScanConfig, ScanTarget};
use crate::engine::queue::RequestQueue;
use crate::engine::registry::{CheckDefinition, CheckOutput};
use crate::error::Error;
use crate::host::{Exchange, HostSdk, HttpRequest, RequestSpec};
use crate::html::ParsedHtml;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Lazily-parsed, write-once HTML per request id, shared scan-wide.
pub struct HtmlCache {
    host: Arc<dyn HostSdk>,
    parsed: Mutex<HashMap<String, Arc<ParsedHtml>>>,
}

impl HtmlCache {
    #[must_use]
    pub fn new(host: Arc<dyn HostSdk>) -> Self {
        Self {
            host,
            parsed: Mutex::new(HashMap::new()),
        }
    }

    /// Parses the response body of the given request, memoizing the
    /// result. Every caller for one request id observes the same
    /// [`ParsedHtml`].
    ///
    /// # Errors
    ///
    /// `REQUEST_NOT_FOUND` when the request or its response cannot be
    /// obtained from the host.
    pub async fn parse(&self, request_id: &str) -> Result<Arc<ParsedHtml>, Error> {
        if let Some(hit) = self
            .parsed
            .lock()
            .expect("html cache poisoned")
            .get(request_id)
        {
            return Ok(Arc::clone(hit));
        }

        let exchange = self
            .host
            .get(request_id)
            .await
            .ok_or_else(|| Error::request_not_found(format!("request '{request_id}'")))?;
        let response = exchange.response.ok_or_else(|| {
            Error::request_not_found(format!("request '{request_id}' has no response"))
        })?;
        let parsed = Arc::new(ParsedHtml::parse(response.body()));

        // First writer wins so racing parsers observe one instance.
        let mut cache = self.parsed.lock().expect("html cache poisoned");
        Ok(Arc::clone(
            cache
                .entry(request_id.to_string())
                .or_insert(parsed),
        ))
    }
}

/// Outputs of completed checks, keyed by check id.
#[derive(Default)]
pub struct DependencyOutputs {
    outputs: Mutex<HashMap<String, CheckOutput>>,
}

impl DependencyOutputs {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The exact output the named check produced during this scan, or
    /// `None` if it did not run (or produced no output).
    #[must_use]
    pub fn get(&self, check_id: &str) -> Option<CheckOutput> {
        self.outputs
            .lock()
            .expect("dependency outputs poisoned")
            .get(check_id)
            .cloned()
    }

    pub fn insert(&self, check_id: &str, output: CheckOutput) {
        self.outputs
            .lock()
            .expect("dependency outputs poisoned")
            .insert(check_id.to_string(), output);
    }
}

/// The capability adapter checks use to issue requests. Sends are routed
/// through the request queue and attributed to the issuing check.
pub struct CheckSdk {
    host: Arc<dyn HostSdk>,
    queue: Arc<RequestQueue>,
    target_request_id: String,
    check_id: String,
}

impl CheckSdk {
    /// Sends a request through the throttled queue.
    ///
    /// # Errors
    ///
    /// `ScanInterrupted` when the scan is cancelled before the send
    /// starts; host transport errors otherwise.
    pub async fn send(&self, spec: RequestSpec) -> Result<Exchange, Error> {
        let pending_request_id = format!("pending-{:016x}", fastrand::u64(..));
        self.queue
            .enqueue(
                spec,
                &pending_request_id,
                &self.target_request_id,
                &self.check_id,
            )
            .await
    }

    /// Whether the request's host is inside the configured scope.
    #[must_use]
    pub fn in_scope(&self, request: &HttpRequest) -> bool {
        self.host.in_scope(request)
    }
}

/// Everything a step function can touch.
pub struct RuntimeContext {
    target: ScanTarget,
    config: Arc<ScanConfig>,
    sdk: CheckSdk,
    html: Arc<HtmlCache>,
    dependencies: Arc<DependencyOutputs>,
}

impl RuntimeContext {
    #[must_use]
    pub const fn target(&self) -> &ScanTarget {
        &self.target
    }

    #[must_use]
    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    #[must_use]
    pub const fn sdk(&self) -> &CheckSdk {
        &self.sdk
    }

    #[must_use]
    pub fn dependencies(&self) -> &DependencyOutputs {
        &self.dependencies
    }

    /// Memoized HTML view of an arbitrary captured request.
    ///
    /// # Errors
    ///
    /// `REQUEST_NOT_FOUND` when the request or its response is missing.
    pub async fn parse_html(&self, request_id: &str) -> Result<Arc<ParsedHtml>, Error> {
        self.html.parse(request_id).await
    }

    /// Memoized HTML view of the target's own response.
    ///
    /// # Errors
    ///
    /// `REQUEST_NOT_FOUND` when the target has no response.
    pub async fn parse_target_html(&self) -> Result<Arc<ParsedHtml>, Error> {
        self.html.parse(self.target.request_id()).await
    }
}

/// Per-scan factory for [`RuntimeContext`]s. One builder serves every
/// target; the per-check view only differs in attribution.
pub struct ContextBuilder {
    pub(crate) host: Arc<dyn HostSdk>,
    pub(crate) queue: Arc<RequestQueue>,
    pub(crate) config: Arc<ScanConfig>,
    pub(crate) html: Arc<HtmlCache>,
    pub(crate) dependencies: Arc<DependencyOutputs>,
}

impl ContextBuilder {
    /// Assembles the context for one target×check execution.
    #[must_use]
    pub fn for_check(&self, target: &ScanTarget, check: &CheckDefinition) -> Arc<RuntimeContext> {
        Arc::new(RuntimeContext {
            target: target.clone(),
            config: Arc::clone(&self.config),
            sdk: CheckSdk {
                host: Arc::clone(&self.host),
                queue: Arc::clone(&self.queue),
                target_request_id: target.request_id().to_string(),
                check_id: check.id().to_string(),
            },
            html: Arc::clone(&self.html),
            dependencies: Arc::clone(&self.dependencies),
        })
    }
}

/// Resolves a capture id into a scan target.
///
/// # Errors
///
/// `REQUEST_NOT_FOUND` when the host has no exchange under the id.
pub async fn resolve_target(host: &Arc<dyn HostSdk>, request_id: &str) -> Result<ScanTarget, Error> {
    let exchange = host
        .get(request_id)
        .await
        .ok_or_else(|| Error::request_not_found(format!("request '{request_id}'")))?;
    Ok(ScanTarget {
        request: Arc::new(exchange.request),
        response: exchange.response.map(Arc::new),
    })
}

/// Applicability filter shared by the batch executor and the estimator:
/// severity overlap, aggressivity floor, the check's own `when` predicate,
/// and (last, so nothing is claimed for checks that fail the cheaper
/// tests) a dedupe claim.
pub(crate) fn is_applicable(
    check: &CheckDefinition,
    target: &ScanTarget,
    config: &ScanConfig,
    dedupe: &DedupeIndex,
) -> bool {
    let metadata = check.metadata();
    if !metadata
        .severities
        .iter()
        .any(|s| config.severities.contains(s))
    {
        return false;
    }
    if metadata
        .min_aggressivity
        .is_some_and(|min| min > config.aggressivity)
    {
        return false;
    }
    if !check.applies_to(target) {
        return false;
    }
    match check.dedupe_key(target) {
        Some(key) => dedupe.claim(check.id(), &key),
        None => true,
    }
}
