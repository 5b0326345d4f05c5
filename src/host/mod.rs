//! The host capability consumed by the scan engine.
//!
//! The engine never talks to the network itself: it asks a [`HostSdk`] to
//! look up captured requests by id and to send check-issued requests. Two
//! implementations ship with the crate: [`MemoryHost`] over a capture store
//! and [`HttpHost`] backed by a real HTTP client.

pub mod http;
pub mod memory;

pub use http::{ClientTimeouts, HttpHost};
pub use memory::MemoryHost;

use crate::error::Error;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A captured or freshly-sent HTTP request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpRequest {
    id: String,
    method: String,
    scheme: String,
    host: String,
    port: u16,
    path: String,
    query: String,
    headers: Vec<(String, String)>,
    #[serde(default)]
    body: Vec<u8>,
}

impl HttpRequest {
    /// Builds a request from a spec, assigning it the given id.
    #[must_use]
    pub fn from_spec(id: String, spec: RequestSpec) -> Self {
        Self {
            id,
            method: spec.method,
            scheme: spec.scheme,
            host: spec.host,
            port: spec.port,
            path: spec.path,
            query: spec.query,
            headers: spec.headers,
            body: spec.body,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    #[must_use]
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The raw query string, without the leading `?`. Empty when absent.
    #[must_use]
    pub fn query(&self) -> &str {
        &self.query
    }

    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// All values of the named header, case-insensitively. `None` when the
    /// header is absent.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<Vec<&str>> {
        header_values(&self.headers, name)
    }

    /// All header pairs, in capture order.
    #[must_use]
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Reassembles the full URL of this request.
    #[must_use]
    pub fn url(&self) -> String {
        let default_port = matches!(
            (self.scheme.as_str(), self.port),
            ("http", 80) | ("https", 443)
        );
        let mut url = if default_port {
            format!("{}://{}{}", self.scheme, self.host, self.path)
        } else {
            format!("{}://{}:{}{}", self.scheme, self.host, self.port, self.path)
        };
        if !self.query.is_empty() {
            url.push('?');
            url.push_str(&self.query);
        }
        url
    }

    /// Decomposed `name=value` query parameters, in order.
    #[must_use]
    pub fn query_params(&self) -> Vec<(String, String)> {
        parse_query(&self.query)
    }

    /// Clones this request into a mutable outgoing spec.
    #[must_use]
    pub fn to_spec(&self) -> RequestSpec {
        RequestSpec {
            method: self.method.clone(),
            scheme: self.scheme.clone(),
            host: self.host.clone(),
            port: self.port,
            path: self.path.clone(),
            query: self.query.clone(),
            headers: self.headers.clone(),
            body: self.body.clone(),
        }
    }
}

/// A captured or freshly-received HTTP response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpResponse {
    id: String,
    status: u16,
    headers: Vec<(String, String)>,
    #[serde(default)]
    body: Vec<u8>,
}

impl HttpResponse {
    #[must_use]
    pub fn new(id: String, status: u16, headers: Vec<(String, String)>, body: Vec<u8>) -> Self {
        Self {
            id,
            status,
            headers,
            body,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub const fn status(&self) -> u16 {
        self.status
    }

    /// All values of the named header, case-insensitively. `None` when the
    /// header is absent.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<Vec<&str>> {
        header_values(&self.headers, name)
    }

    /// First value of the named header.
    #[must_use]
    pub fn header_first(&self, name: &str) -> Option<&str> {
        self.header(name).and_then(|values| values.first().copied())
    }

    /// All header pairs, in capture order.
    #[must_use]
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// The body decoded as UTF-8, lossily.
    #[must_use]
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// An outgoing request under construction. Unlike [`HttpRequest`], fields
/// are public: checks mutate specs to build probes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestSpec {
    pub method: String,
    pub scheme: String,
    pub host: String,
    pub port: u16,
    pub path: String,
    pub query: String,
    pub headers: Vec<(String, String)>,
    #[serde(default)]
    pub body: Vec<u8>,
}

impl RequestSpec {
    /// A GET spec for the given location with no headers or body.
    #[must_use]
    pub fn get(scheme: &str, host: &str, port: u16, path: &str) -> Self {
        Self {
            method: "GET".into(),
            scheme: scheme.into(),
            host: host.into(),
            port,
            path: path.into(),
            query: String::new(),
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    /// Replaces the query string from decomposed parameters.
    pub fn set_query_params(&mut self, params: &[(String, String)]) {
        self.query = params
            .iter()
            .map(|(k, v)| {
                if v.is_empty() {
                    k.clone()
                } else {
                    format!("{k}={v}")
                }
            })
            .collect::<Vec<_>>()
            .join("&");
    }
}

/// A request paired with its response, when one exists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exchange {
    pub request: HttpRequest,
    pub response: Option<HttpResponse>,
}

/// Which hosts a scan is allowed to touch. An empty list means everything
/// is in scope.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScopePolicy {
    pub allowed_hosts: Vec<String>,
}

impl ScopePolicy {
    /// Whether `host` is covered: an exact match or a subdomain of an
    /// allowed entry.
    #[must_use]
    pub fn covers(&self, host: &str) -> bool {
        if self.allowed_hosts.is_empty() {
            return true;
        }
        self.allowed_hosts.iter().any(|allowed| {
            host == allowed
                || (host.len() > allowed.len()
                    && host.ends_with(allowed)
                    && host.as_bytes()[host.len() - allowed.len() - 1] == b'.')
        })
    }
}

/// The capability surface the engine consumes. Checks never see this trait
/// directly; their sends are routed through the request queue.
#[async_trait]
pub trait HostSdk: Send + Sync {
    /// Looks up a captured exchange by request id.
    async fn get(&self, request_id: &str) -> Option<Exchange>;

    /// Sends a request and returns the completed exchange.
    ///
    /// # Errors
    ///
    /// Propagates transport failures; the engine does not retry.
    async fn send(&self, spec: RequestSpec) -> Result<Exchange, Error>;

    /// Whether the request's host falls within the configured scope.
    fn in_scope(&self, request: &HttpRequest) -> bool;
}

fn header_values<'a>(headers: &'a [(String, String)], name: &str) -> Option<Vec<&'a str>> {
    let values: Vec<&str> = headers
        .iter()
        .filter(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
        .collect();
    if values.is_empty() {
        None
    } else {
        Some(values)
    }
}

fn parse_query(query: &str) -> Vec<(String, String)> {
    if query.is_empty() {
        return Vec::new();
    }
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((k, v)) => (k.to_string(), v.to_string()),
            None => (pair.to_string(), String::new()),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(scheme: &str, port: u16, query: &str) -> HttpRequest {
        HttpRequest {
            id: "req-1".into(),
            method: "GET".into(),
            scheme: scheme.into(),
            host: "example.com".into(),
            port,
            path: "/login".into(),
            query: query.into(),
            headers: vec![
                ("Accept".into(), "text/html".into()),
                ("accept".into(), "application/json".into()),
            ],
            body: Vec::new(),
        }
    }

    #[test]
    fn url_omits_default_ports() {
        assert_eq!(request("https", 443, "").url(), "https://example.com/login");
        assert_eq!(request("http", 80, "").url(), "http://example.com/login");
        assert_eq!(
            request("https", 8443, "a=1").url(),
            "https://example.com:8443/login?a=1"
        );
    }

    #[test]
    fn header_lookup_is_case_insensitive_and_multivalued() {
        let req = request("https", 443, "");
        let values = req.header("ACCEPT").unwrap();
        assert_eq!(values, vec!["text/html", "application/json"]);
        assert!(req.header("cookie").is_none());
    }

    #[test]
    fn query_params_decompose_and_reassemble() {
        let req = request("https", 443, "q=rust&page=2&flag");
        let params = req.query_params();
        assert_eq!(
            params,
            vec![
                ("q".to_string(), "rust".to_string()),
                ("page".to_string(), "2".to_string()),
                ("flag".to_string(), String::new()),
            ]
        );
        let mut spec = req.to_spec();
        spec.set_query_params(&params);
        assert_eq!(spec.query, "q=rust&page=2&flag");
    }

    #[test]
    fn scope_policy_matches_subdomains_only_at_label_boundaries() {
        let scope = ScopePolicy {
            allowed_hosts: vec!["example.com".into()],
        };
        assert!(scope.covers("example.com"));
        assert!(scope.covers("app.example.com"));
        assert!(!scope.covers("notexample.com"));
        assert!(!scope.covers("example.com.evil.io"));
    }

    #[test]
    fn empty_scope_covers_everything() {
        assert!(ScopePolicy::default().covers("anything.invalid"));
    }
}
