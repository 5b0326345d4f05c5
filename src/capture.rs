//! Capture files: recorded request/response pairs loaded into the
//! in-memory host.
//!
//! JSON is tried first, then YAML. Bodies are base64-encoded so binary
//! responses survive the round trip.

use crate::error::Error;
use crate::host::{HttpResponse, MemoryHost, RequestSpec, ScopePolicy};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One recorded request, as stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapturedRequest {
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default = "default_scheme")]
    pub scheme: String,
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
    pub path: String,
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    /// Base64-encoded body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

fn default_method() -> String {
    "GET".into()
}

fn default_scheme() -> String {
    "https".into()
}

/// One recorded response, as stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapturedResponse {
    pub status: u16,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    /// Base64-encoded body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureEntry {
    pub request: CapturedRequest,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<CapturedResponse>,
}

/// Optional capture-file metadata; informational only.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CaptureMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A capture file: metadata plus recorded entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<CaptureMetadata>,
    pub entries: Vec<CaptureEntry>,
}

impl CaptureFile {
    /// Reads a capture file, trying JSON first and YAML second.
    ///
    /// # Errors
    ///
    /// I/O failures, or a file that parses as neither format.
    pub async fn load(path: &Path) -> Result<Self, Error> {
        let content = tokio::fs::read_to_string(path).await?;

        if let Ok(capture) = serde_json::from_str::<Self>(&content) {
            return Ok(capture);
        }
        if let Ok(capture) = serde_yaml::from_str::<Self>(&content) {
            return Ok(capture);
        }
        Err(Error::invalid_config(format!(
            "failed to parse capture file as JSON or YAML: {}",
            path.display()
        )))
    }

    /// Materializes the captures into an in-memory host, in file order.
    ///
    /// # Errors
    ///
    /// Invalid base64 in a body field.
    pub fn into_host(self, scope: ScopePolicy) -> Result<MemoryHost, Error> {
        let host = MemoryHost::new().with_scope(scope);
        for entry in self.entries {
            let request = entry.request;
            let port = request.port.unwrap_or(match request.scheme.as_str() {
                "http" => 80,
                _ => 443,
            });
            let spec = RequestSpec {
                method: request.method,
                scheme: request.scheme,
                host: request.host,
                port,
                path: request.path,
                query: request.query,
                headers: request.headers,
                body: decode_body(request.body.as_deref())?,
            };
            let response = entry
                .response
                .map(|response| {
                    Ok::<_, Error>(HttpResponse::new(
                        String::new(),
                        response.status,
                        response.headers,
                        decode_body(response.body.as_deref())?,
                    ))
                })
                .transpose()?;
            host.insert_spec(spec, response);
        }
        Ok(host)
    }
}

fn decode_body(encoded: Option<&str>) -> Result<Vec<u8>, Error> {
    match encoded {
        None => Ok(Vec::new()),
        Some(encoded) => BASE64
            .decode(encoded)
            .map_err(|e| Error::invalid_config(format!("invalid base64 body: {e}"))),
    }
}

/// Encodes a body for inclusion in a capture file.
#[must_use]
pub fn encode_body(body: &[u8]) -> String {
    BASE64.encode(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[tokio::test]
    async fn loads_json_captures() {
        let content = r#"{
            "metadata": { "name": "smoke" },
            "entries": [
                {
                    "request": { "host": "example.com", "path": "/" },
                    "response": { "status": 200, "headers": [["Content-Type", "text/html"]] }
                }
            ]
        }"#;
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();

        let capture = CaptureFile::load(file.path()).await.unwrap();
        assert_eq!(capture.entries.len(), 1);
        assert_eq!(capture.entries[0].request.method, "GET");
        assert_eq!(capture.entries[0].request.scheme, "https");
    }

    #[tokio::test]
    async fn loads_yaml_captures() {
        let content = "
entries:
  - request:
      method: POST
      scheme: http
      host: example.com
      path: /login
      query: next=/home
    response:
      status: 302
";
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();

        let capture = CaptureFile::load(file.path()).await.unwrap();
        assert_eq!(capture.entries[0].request.method, "POST");
        assert_eq!(capture.entries[0].request.query, "next=/home");
    }

    #[tokio::test]
    async fn garbage_is_rejected() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"]] not a capture [[").unwrap();
        assert!(CaptureFile::load(file.path()).await.is_err());
    }

    #[tokio::test]
    async fn into_host_decodes_bodies_and_defaults_ports() {
        let capture = CaptureFile {
            metadata: None,
            entries: vec![CaptureEntry {
                request: CapturedRequest {
                    method: "GET".into(),
                    scheme: "http".into(),
                    host: "example.com".into(),
                    port: None,
                    path: "/".into(),
                    query: String::new(),
                    headers: vec![],
                    body: None,
                },
                response: Some(CapturedResponse {
                    status: 200,
                    headers: vec![],
                    body: Some(encode_body(b"<html></html>")),
                }),
            }],
        };
        let host = capture.into_host(ScopePolicy::default()).unwrap();
        let ids = host.request_ids();
        assert_eq!(ids.len(), 1);

        use crate::host::HostSdk;
        let exchange = host.get(&ids[0]).await.unwrap();
        assert_eq!(exchange.request.port(), 80);
        assert_eq!(exchange.response.unwrap().body(), b"<html></html>");
    }

    #[test]
    fn invalid_base64_is_rejected() {
        assert!(decode_body(Some("!!not-base64!!")).is_err());
    }
}
