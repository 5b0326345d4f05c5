//! Typed scan-lifecycle events and the synchronous bus that dispatches
//! them.
//!
//! Listeners run synchronously on the emitting task. A panicking listener
//! is isolated with `catch_unwind` and discarded so observer bugs cannot
//! corrupt scan state.

use crate::engine::model::{Finding, InterruptReason};
use serde::Serialize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use tracing::warn;

/// Everything the engine reports while a scan runs.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum ScanEvent {
    #[serde(rename = "scan:started")]
    Started,
    #[serde(rename = "scan:finished")]
    Finished,
    #[serde(rename = "scan:interrupted")]
    Interrupted { reason: InterruptReason },
    #[serde(rename = "scan:check-started")]
    CheckStarted {
        check_id: String,
        target_request_id: String,
    },
    #[serde(rename = "scan:check-finished")]
    CheckFinished {
        check_id: String,
        target_request_id: String,
    },
    #[serde(rename = "scan:check-failed")]
    CheckFailed {
        check_id: String,
        target_request_id: String,
        error_code: String,
        error_message: String,
    },
    #[serde(rename = "scan:finding")]
    Finding {
        target_request_id: String,
        check_id: String,
        finding: Finding,
    },
    #[serde(rename = "scan:request-pending")]
    RequestPending {
        pending_request_id: String,
        target_request_id: String,
        check_id: String,
    },
    #[serde(rename = "scan:request-completed")]
    RequestCompleted {
        #[serde(rename = "id")]
        pending_request_id: String,
        request_id: String,
        response_id: String,
    },
}

/// Discriminant used for per-variant listener registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanEventKind {
    Started,
    Finished,
    Interrupted,
    CheckStarted,
    CheckFinished,
    CheckFailed,
    Finding,
    RequestPending,
    RequestCompleted,
}

impl ScanEvent {
    #[must_use]
    pub const fn kind(&self) -> ScanEventKind {
        match self {
            Self::Started => ScanEventKind::Started,
            Self::Finished => ScanEventKind::Finished,
            Self::Interrupted { .. } => ScanEventKind::Interrupted,
            Self::CheckStarted { .. } => ScanEventKind::CheckStarted,
            Self::CheckFinished { .. } => ScanEventKind::CheckFinished,
            Self::CheckFailed { .. } => ScanEventKind::CheckFailed,
            Self::Finding { .. } => ScanEventKind::Finding,
            Self::RequestPending { .. } => ScanEventKind::RequestPending,
            Self::RequestCompleted { .. } => ScanEventKind::RequestCompleted,
        }
    }

    /// The wire name of this event.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self.kind() {
            ScanEventKind::Started => "scan:started",
            ScanEventKind::Finished => "scan:finished",
            ScanEventKind::Interrupted => "scan:interrupted",
            ScanEventKind::CheckStarted => "scan:check-started",
            ScanEventKind::CheckFinished => "scan:check-finished",
            ScanEventKind::CheckFailed => "scan:check-failed",
            ScanEventKind::Finding => "scan:finding",
            ScanEventKind::RequestPending => "scan:request-pending",
            ScanEventKind::RequestCompleted => "scan:request-completed",
        }
    }
}

type Handler = Arc<dyn Fn(&ScanEvent) + Send + Sync>;

struct Subscription {
    kind: Option<ScanEventKind>,
    handler: Handler,
}

/// Synchronous, panic-isolated event dispatch.
#[derive(Default)]
pub struct EventBus {
    subscriptions: Mutex<Vec<Subscription>>,
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener for one event kind.
    pub fn on<F>(&self, kind: ScanEventKind, handler: F)
    where
        F: Fn(&ScanEvent) + Send + Sync + 'static,
    {
        self.subscriptions
            .lock()
            .expect("event bus poisoned")
            .push(Subscription {
                kind: Some(kind),
                handler: Arc::new(handler),
            });
    }

    /// Registers a listener for every event.
    pub fn on_any<F>(&self, handler: F)
    where
        F: Fn(&ScanEvent) + Send + Sync + 'static,
    {
        self.subscriptions
            .lock()
            .expect("event bus poisoned")
            .push(Subscription {
                kind: None,
                handler: Arc::new(handler),
            });
    }

    /// Dispatches an event to all matching listeners, in registration
    /// order. Listener panics are caught and discarded.
    pub fn emit(&self, event: &ScanEvent) {
        let handlers: Vec<Handler> = {
            let subscriptions = self.subscriptions.lock().expect("event bus poisoned");
            subscriptions
                .iter()
                .filter(|sub| sub.kind.is_none_or(|kind| kind == event.kind()))
                .map(|sub| Arc::clone(&sub.handler))
                .collect()
        };
        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                warn!(event = event.name(), "event listener panicked; discarded");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn per_variant_listeners_only_see_their_kind() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&hits);
        bus.on(ScanEventKind::Started, move |_| {
            counted.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(&ScanEvent::Started);
        bus.emit(&ScanEvent::Finished);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn on_any_sees_everything() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&hits);
        bus.on_any(move |_| {
            counted.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(&ScanEvent::Started);
        bus.emit(&ScanEvent::Finished);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn panicking_listener_does_not_poison_later_listeners() {
        let bus = EventBus::new();
        bus.on_any(|_| panic!("observer bug"));
        let hits = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&hits);
        bus.on_any(move |_| {
            counted.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(&ScanEvent::Started);
        bus.emit(&ScanEvent::Started);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn event_names_are_stable() {
        assert_eq!(ScanEvent::Started.name(), "scan:started");
        assert_eq!(
            ScanEvent::Interrupted {
                reason: crate::engine::model::InterruptReason::Timeout
            }
            .name(),
            "scan:interrupted"
        );
    }
}
