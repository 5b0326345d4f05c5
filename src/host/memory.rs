//! In-memory host over a store of captured exchanges.
//!
//! Backs the CLI's passive mode (loaded from a capture file) and the test
//! suite. Sends are answered by an optional responder closure; without one,
//! a send fails the issuing check rather than reaching the network.

use crate::error::Error;
use crate::host::{Exchange, HostSdk, HttpRequest, HttpResponse, RequestSpec, ScopePolicy};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

type Responder = Box<dyn Fn(&RequestSpec) -> Option<HttpResponse> + Send + Sync>;

/// Id-keyed capture store implementing [`HostSdk`].
pub struct MemoryHost {
    store: Mutex<Store>,
    responder: Option<Responder>,
    scope: ScopePolicy,
    next_id: AtomicU64,
}

#[derive(Default)]
struct Store {
    exchanges: HashMap<String, Exchange>,
    order: Vec<String>,
}

impl Default for MemoryHost {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryHost {
    #[must_use]
    pub fn new() -> Self {
        Self {
            store: Mutex::new(Store::default()),
            responder: None,
            scope: ScopePolicy::default(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Installs a closure that answers check-issued sends. The closure
    /// returns the response to pair with the sent request, or `None` to
    /// simulate a transport failure.
    #[must_use]
    pub fn with_responder(
        mut self,
        responder: impl Fn(&RequestSpec) -> Option<HttpResponse> + Send + Sync + 'static,
    ) -> Self {
        self.responder = Some(Box::new(responder));
        self
    }

    #[must_use]
    pub fn with_scope(mut self, scope: ScopePolicy) -> Self {
        self.scope = scope;
        self
    }

    /// Stores a pre-built exchange and returns the request id.
    pub fn insert(&self, exchange: Exchange) -> String {
        let id = exchange.request.id().to_string();
        let mut store = self.store.lock().expect("capture store poisoned");
        if !store.exchanges.contains_key(&id) {
            store.order.push(id.clone());
        }
        store.exchanges.insert(id.clone(), exchange);
        id
    }

    /// Builds a request from a spec, pairs it with `response`, stores the
    /// exchange, and returns the request id. Responses arriving without an
    /// id are assigned a fresh one.
    pub fn insert_spec(&self, spec: RequestSpec, response: Option<HttpResponse>) -> String {
        let id = self.fresh_id("req");
        let request = HttpRequest::from_spec(id.clone(), spec);
        let response = response.map(|r| {
            if r.id().is_empty() {
                HttpResponse::new(
                    self.fresh_id("resp"),
                    r.status(),
                    r.headers().to_vec(),
                    r.body().to_vec(),
                )
            } else {
                r
            }
        });
        self.insert(Exchange { request, response })
    }

    /// All stored request ids, in insertion order.
    #[must_use]
    pub fn request_ids(&self) -> Vec<String> {
        self.store.lock().expect("capture store poisoned").order.clone()
    }

    fn fresh_id(&self, prefix: &str) -> String {
        let n = self.next_id.fetch_add(1, Ordering::Relaxed);
        format!("{prefix}-{n}")
    }
}

#[async_trait]
impl HostSdk for MemoryHost {
    async fn get(&self, request_id: &str) -> Option<Exchange> {
        self.store
            .lock()
            .expect("capture store poisoned")
            .exchanges
            .get(request_id)
            .cloned()
    }

    async fn send(&self, spec: RequestSpec) -> Result<Exchange, Error> {
        let Some(responder) = &self.responder else {
            return Err(Error::Runtime(
                "memory host has no responder configured for sends".into(),
            ));
        };
        let Some(answer) = responder(&spec) else {
            return Err(Error::Runtime(format!(
                "send to {}://{}{} refused by responder",
                spec.scheme, spec.host, spec.path
            )));
        };
        let request_id = self.fresh_id("req");
        let response_id = self.fresh_id("resp");
        let response = HttpResponse::new(
            response_id,
            answer.status(),
            answer.headers().to_vec(),
            answer.body().to_vec(),
        );
        let request = HttpRequest::from_spec(request_id, spec);
        let exchange = Exchange {
            request,
            response: Some(response),
        };
        self.insert(exchange.clone());
        Ok(exchange)
    }

    fn in_scope(&self, request: &HttpRequest) -> bool {
        self.scope.covers(request.host())
    }
}
