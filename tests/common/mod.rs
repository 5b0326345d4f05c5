//! Shared fixtures for integration tests.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use vigil::engine::events::{EventBus, ScanEvent, ScanEventKind};
use vigil::engine::registry::{CheckDefinition, CheckRegistry, StepAction};
use vigil::host::{HttpResponse, MemoryHost, RequestSpec};
use vigil::{CheckMetadata, CheckType, Correlation, Finding, Severity};

/// Minimal passive-check metadata.
pub fn metadata(id: &str) -> CheckMetadata {
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

/// A single-step check that completes immediately with no findings.
pub fn noop_check(id: &str) -> CheckDefinition {
    CheckDefinition::builder(metadata(id))
        .step("scan", |_, _| async { Ok(StepAction::done()) })
        .build()
        .unwrap()
}

/// A single-step check that emits one finding per target.
pub fn finding_check(id: &str) -> CheckDefinition {
    let name = format!("{id} fired");
    CheckDefinition::builder(metadata(id))
        .step("scan", move |_, ctx| {
            let name = name.clone();
            async move {
                let target = ctx.target();
                Ok(StepAction::done().with_finding(Finding {
                    name,
                    description: String::new(),
                    severity: Severity::Low,
                    correlation: Correlation {
                        request_id: target.request_id().to_string(),
                        locations: vec![],
                    },
                }))
            }
        })
        .build()
        .unwrap()
}

/// Registers checks in the given order.
pub fn registry_of(checks: Vec<CheckDefinition>) -> CheckRegistry {
    let mut registry = CheckRegistry::new();
    for check in checks {
        registry.register(check).unwrap();
    }
    registry
}

/// A host with `count` captured GET requests, each on a distinct path,
/// all answered with a plain HTML 200.
pub fn html_host(count: usize) -> Arc<MemoryHost> {
    let host = Arc::new(MemoryHost::new());
    for i in 0..count {
        host.insert_spec(
            RequestSpec::get("https", "example.com", 443, &format!("/page/{i}")),
            Some(html_response("<html><body>ok</body></html>", vec![])),
        );
    }
    host
}

/// An HTML response with extra headers appended after `Content-Type`.
pub fn html_response(body: &str, extra_headers: Vec<(String, String)>) -> HttpResponse {
    let mut headers = vec![("Content-Type".to_string(), "text/html; charset=utf-8".to_string())];
    headers.extend(extra_headers);
    HttpResponse::new(String::new(), 200, headers, body.as_bytes().to_vec())
}

/// Counts events of one kind.
pub fn count_events(bus: &EventBus, kind: ScanEventKind) -> Arc<AtomicUsize> {
    let counter = Arc::new(AtomicUsize::new(0));
    let counted = Arc::clone(&counter);
    bus.on(kind, move |_| {
        counted.fetch_add(1, Ordering::SeqCst);
    });
    counter
}

/// Records every event, in emission order.
pub fn record_events(bus: &EventBus) -> Arc<Mutex<Vec<ScanEvent>>> {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&log);
    bus.on_any(move |event| sink.lock().unwrap().push(event.clone()));
    log
}
