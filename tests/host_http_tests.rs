//! Live host behavior against a mock HTTP server.

use std::sync::Arc;
use vigil::host::{ClientTimeouts, HostSdk, HttpHost, MemoryHost, RequestSpec, ScopePolicy};
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn spec_for(server: &MockServer, req_path: &str, query: &str) -> RequestSpec {
    let address = server.address();
    RequestSpec {
        method: "GET".into(),
        scheme: "http".into(),
        host: address.ip().to_string(),
        port: address.port(),
        path: req_path.into(),
        query: query.into(),
        headers: vec![("X-Probe".into(), "vigil".into())],
        body: Vec::new(),
    }
}

#[tokio::test]
async fn send_round_trips_status_headers_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .and(query_param("q", "rust"))
        .and(header("X-Probe", "vigil"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw("<html>hit</html>", "text/html"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let captures = Arc::new(MemoryHost::new());
    let host = HttpHost::new(
        Arc::clone(&captures),
        &ClientTimeouts::default(),
        ScopePolicy::default(),
    )
    .unwrap();

    let exchange = host.send(spec_for(&server, "/search", "q=rust")).await.unwrap();
    let response = exchange.response.as_ref().unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.header_first("content-type"), Some("text/html"));
    assert_eq!(response.body(), b"<html>hit</html>");

    // The live exchange landed in the capture store and resolves by id
    let replay = host.get(exchange.request.id()).await.unwrap();
    assert_eq!(replay.response.unwrap().body(), b"<html>hit</html>");
}

#[tokio::test]
async fn transport_failures_propagate_as_errors() {
    let captures = Arc::new(MemoryHost::new());
    let host = HttpHost::new(
        captures,
        &ClientTimeouts {
            connect_timeout_ms: 200,
            request_timeout_ms: 200,
        },
        ScopePolicy::default(),
    )
    .unwrap();

    // Nothing listens on this port
    let spec = RequestSpec::get("http", "127.0.0.1", 59999, "/");
    assert!(host.send(spec).await.is_err());
}

#[tokio::test]
async fn scope_policy_applies_to_live_hosts() {
    let captures = Arc::new(MemoryHost::new());
    let host = HttpHost::new(
        captures,
        &ClientTimeouts::default(),
        ScopePolicy {
            allowed_hosts: vec!["example.com".into()],
        },
    )
    .unwrap();

    let in_scope = vigil::host::HttpRequest::from_spec(
        "req-1".into(),
        RequestSpec::get("https", "app.example.com", 443, "/"),
    );
    let out_of_scope = vigil::host::HttpRequest::from_spec(
        "req-2".into(),
        RequestSpec::get("https", "evil.io", 443, "/"),
    );
    assert!(host.in_scope(&in_scope));
    assert!(!host.in_scope(&out_of_scope));
}
