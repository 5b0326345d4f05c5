//! The throttled queue every check-issued send goes through.
//!
//! A bounded-concurrency FIFO: `concurrent_requests` permits, and a rate
//! limiter that spaces acquisitions at least `requests_delay_ms` apart.
//! The first send is never delayed. The queue does not retry, does not
//! deduplicate, and does not enforce the scan timeout.

use crate::engine::events::{EventBus, ScanEvent};
use crate::engine::interrupt::Interrupt;
use crate::error::Error;
use crate::host::{Exchange, HostSdk, RequestSpec};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::debug;

/// Bounded-concurrency, rate-spaced dispatcher over the host's `send`.
pub struct RequestQueue {
    host: Arc<dyn HostSdk>,
    semaphore: Arc<Semaphore>,
    limiter: Option<Arc<DefaultDirectRateLimiter>>,
    interrupt: Arc<Interrupt>,
    bus: Arc<EventBus>,
}

impl RequestQueue {
    /// Builds a queue with `concurrent_requests` in-flight slots and
    /// `requests_delay_ms` spacing between sends (`0` disables spacing).
    #[must_use]
    pub fn new(
        host: Arc<dyn HostSdk>,
        concurrent_requests: usize,
        requests_delay_ms: u64,
        interrupt: Arc<Interrupt>,
        bus: Arc<EventBus>,
    ) -> Self {
        let limiter = (requests_delay_ms > 0)
            .then(|| {
                Quota::with_period(Duration::from_millis(requests_delay_ms))
                    .map(|quota| Arc::new(RateLimiter::direct(quota.allow_burst(
                        NonZeroU32::new(1).expect("1 is non-zero"),
                    ))))
            })
            .flatten();
        Self {
            host,
            semaphore: Arc::new(Semaphore::new(concurrent_requests.max(1))),
            limiter,
            interrupt,
            bus,
        }
    }

    /// Queues one send.
    ///
    /// Emits `scan:request-pending` immediately, waits for a slot and for
    /// the inter-request spacing, re-checking the interrupt flag at each
    /// resume, and emits `scan:request-completed` on success.
    ///
    /// # Errors
    ///
    /// `ScanInterrupted` when the scan is cancelled before the item
    /// starts; host transport errors are propagated untouched (the caller
    /// decides whether they fail the task).
    pub async fn enqueue(
        &self,
        spec: RequestSpec,
        pending_request_id: &str,
        target_request_id: &str,
        check_id: &str,
    ) -> Result<Exchange, Error> {
        self.bus.emit(&ScanEvent::RequestPending {
            pending_request_id: pending_request_id.to_string(),
            target_request_id: target_request_id.to_string(),
            check_id: check_id.to_string(),
        });

        self.interrupt.check()?;
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| Error::Runtime("request queue semaphore closed".into()))?;
        self.interrupt.check()?;

        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
            self.interrupt.check()?;
        }

        debug!(check_id, pending_request_id, "dispatching check-issued send");
        let exchange = self.host.send(spec).await?;

        let response_id = exchange
            .response
            .as_ref()
            .map(|r| r.id().to_string())
            .unwrap_or_default();
        self.bus.emit(&ScanEvent::RequestCompleted {
            pending_request_id: pending_request_id.to_string(),
            request_id: exchange.request.id().to_string(),
            response_id,
        });
        Ok(exchange)
    }
}
