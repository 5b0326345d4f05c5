//! Live host backed by a `reqwest` client.
//!
//! Used when active checks should probe the real target instead of being
//! answered from the capture store. Lookups by id still hit the capture
//! store; only sends go over the wire.

use crate::error::Error;
use crate::host::{Exchange, HostSdk, HttpRequest, HttpResponse, MemoryHost, RequestSpec, ScopePolicy};
use async_trait::async_trait;
use std::sync::{Arc, Once};
use std::time::Duration;
use tracing::debug;

static CRYPTO_PROVIDER_INIT: Once = Once::new();

/// Installs the process-wide rustls crypto provider on first use.
///
/// `reqwest` is built with `rustls-no-provider`, so a provider must be
/// installed before any TLS-capable client is constructed.
fn ensure_crypto_provider() {
    CRYPTO_PROVIDER_INIT.call_once(|| {
        #[cfg(not(windows))]
        let provider = rustls::crypto::ring::default_provider();
        #[cfg(windows)]
        let provider = rustls::crypto::aws_lc_rs::default_provider();
        let _ = provider.install_default();
    });
}

/// Connect/request timeouts for the outgoing client.
#[derive(Debug, Clone)]
pub struct ClientTimeouts {
    pub connect_timeout_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for ClientTimeouts {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 10_000,
            request_timeout_ms: 30_000,
        }
    }
}

/// [`HostSdk`] that answers `get` from a capture store and `send` over HTTP.
pub struct HttpHost {
    captures: Arc<MemoryHost>,
    client: reqwest::Client,
    scope: ScopePolicy,
}

impl HttpHost {
    /// Builds a live host over an existing capture store.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed with the
    /// given timeouts.
    pub fn new(
        captures: Arc<MemoryHost>,
        timeouts: &ClientTimeouts,
        scope: ScopePolicy,
    ) -> Result<Self, Error> {
        ensure_crypto_provider();
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(timeouts.connect_timeout_ms))
            .timeout(Duration::from_millis(timeouts.request_timeout_ms))
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self {
            captures,
            client,
            scope,
        })
    }

    fn build_url(spec: &RequestSpec) -> String {
        let mut url = format!("{}://{}:{}{}", spec.scheme, spec.host, spec.port, spec.path);
        if !spec.query.is_empty() {
            url.push('?');
            url.push_str(&spec.query);
        }
        url
    }
}

#[async_trait]
impl HostSdk for HttpHost {
    async fn get(&self, request_id: &str) -> Option<Exchange> {
        self.captures.get(request_id).await
    }

    async fn send(&self, spec: RequestSpec) -> Result<Exchange, Error> {
        let url = Self::build_url(&spec);
        let method = reqwest::Method::from_bytes(spec.method.as_bytes())
            .map_err(|_| Error::invalid_config(format!("invalid HTTP method: {}", spec.method)))?;
        debug!(%url, method = %spec.method, "sending check-issued request");

        let mut builder = self.client.request(method, &url);
        for (name, value) in &spec.headers {
            builder = builder.header(name, value);
        }
        if !spec.body.is_empty() {
            builder = builder.body(spec.body.clone());
        }

        let upstream = builder.send().await?;
        let status = upstream.status().as_u16();
        let headers: Vec<(String, String)> = upstream
            .headers()
            .iter()
            .map(|(k, v)| {
                (
                    k.as_str().to_string(),
                    String::from_utf8_lossy(v.as_bytes()).into_owned(),
                )
            })
            .collect();
        let body = upstream.bytes().await?.to_vec();

        // Persist the live exchange so later lookups by id resolve.
        let response = HttpResponse::new(String::new(), status, headers, body);
        let request_id = self
            .captures
            .insert_spec(spec, Some(response));
        self.captures
            .get(&request_id)
            .await
            .ok_or_else(|| Error::request_not_found(format!("request '{request_id}'")))
    }

    fn in_scope(&self, request: &HttpRequest) -> bool {
        self.scope.covers(request.host())
    }
}
