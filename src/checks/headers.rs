//! Passive header-hygiene checks: transport security, software
//! disclosure, and cookie attributes.

use crate::checks::target_finding;
use crate::engine::dedupe::{host_key, host_port_key, location_key};
use crate::engine::model::{CheckMetadata, CheckType, Finding, Severity};
use crate::engine::registry::{CheckDefinition, StepAction};
use crate::error::Error;
use once_cell::sync::Lazy;
use regex::Regex;

static SERVER_VERSION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^([a-z][a-z0-9_-]*)/([0-9][0-9a-z.\-]*)").expect("server version regex is valid")
});

/// HTTPS page served without `Strict-Transport-Security`. One report per
/// host.
///
/// # Errors
///
/// Propagates declaration failures.
pub fn hsts_missing() -> Result<CheckDefinition, Error> {
    CheckDefinition::builder(CheckMetadata {
        id: "hsts-missing".into(),
        name: "HSTS missing".into(),
        description: "HTTPS responses lack Strict-Transport-Security.".into(),
        check_type: CheckType::Passive,
        tags: vec!["headers".into(), "transport".into()],
        severities: vec![Severity::Low],
        aggressivity: None,
        min_aggressivity: None,
        depends_on: vec![],
        skip_if_found_by: None,
    })
    .when(|target| target.request.scheme() == "https" && target.response.is_some())
    .dedupe_key(host_key)
    .step("inspect", |_, ctx| async move {
        let target = ctx.target();
        if target.response_header("strict-transport-security").is_some() {
            return Ok(StepAction::done());
        }
        Ok(StepAction::done().with_finding(target_finding(
            target,
            "Strict-Transport-Security not set",
            format!(
                "{} serves HTTPS responses without a Strict-Transport-Security header.",
                target.request.host()
            ),
            Severity::Low,
        )))
    })
    .build()
}

/// `Server` header advertising a product version. One report per
/// host:port.
///
/// # Errors
///
/// Propagates declaration failures.
pub fn server_version_disclosure() -> Result<CheckDefinition, Error> {
    CheckDefinition::builder(CheckMetadata {
        id: "server-version-disclosure".into(),
        name: "Server version disclosure".into(),
        description: "The Server header reveals the product version.".into(),
        check_type: CheckType::Passive,
        tags: vec!["headers".into(), "fingerprint".into()],
        severities: vec![Severity::Info, Severity::Low],
        aggressivity: None,
        min_aggressivity: None,
        depends_on: vec![],
        skip_if_found_by: None,
    })
    .when(|target| target.response.is_some())
    .dedupe_key(host_port_key)
    .step("inspect", |_, ctx| async move {
        let target = ctx.target();
        let Some(server) = target.response_header("server") else {
            return Ok(StepAction::done());
        };
        let Some(captures) = SERVER_VERSION.captures(server) else {
            return Ok(StepAction::done());
        };
        Ok(StepAction::done().with_finding(target_finding(
            target,
            "Server version disclosed",
            format!(
                "{} announces {} {} in its Server header.",
                target.request.host(),
                &captures[1],
                &captures[2]
            ),
            Severity::Low,
        )))
    })
    .build()
}

/// `Set-Cookie` without `HttpOnly`, or without `Secure` on HTTPS.
///
/// # Errors
///
/// Propagates declaration failures.
pub fn cookie_flags() -> Result<CheckDefinition, Error> {
    CheckDefinition::builder(CheckMetadata {
        id: "cookie-flags".into(),
        name: "Cookie flags".into(),
        description: "Cookies set without HttpOnly or Secure attributes.".into(),
        check_type: CheckType::Passive,
        tags: vec!["headers".into(), "cookies".into()],
        severities: vec![Severity::Low, Severity::Medium],
        aggressivity: None,
        min_aggressivity: None,
        depends_on: vec![],
        skip_if_found_by: None,
    })
    .when(|target| {
        target
            .response
            .as_deref()
            .is_some_and(|response| response.header("set-cookie").is_some())
    })
    .dedupe_key(location_key)
    .step("inspect", |_, ctx| async move {
        let target = ctx.target();
        let https = target.request.scheme() == "https";
        let cookies = target
            .response
            .as_deref()
            .and_then(|response| response.header("set-cookie"))
            .unwrap_or_default();

        let mut findings: Vec<Finding> = Vec::new();
        for cookie in cookies {
            let name = cookie.split(['=', ';']).next().unwrap_or("").trim();
            if name.is_empty() {
                continue;
            }
            let attributes: Vec<String> = cookie
                .split(';')
                .skip(1)
                .map(|attr| attr.trim().to_ascii_lowercase())
                .collect();

            if !attributes.iter().any(|attr| attr == "httponly") {
                findings.push(target_finding(
                    target,
                    "Cookie without HttpOnly",
                    format!("Cookie '{name}' is set without the HttpOnly attribute."),
                    Severity::Low,
                ));
            }
            if https && !attributes.iter().any(|attr| attr == "secure") {
                findings.push(target_finding(
                    target,
                    "Cookie without Secure",
                    format!(
                        "Cookie '{name}' is set over HTTPS without the Secure attribute."
                    ),
                    Severity::Medium,
                ));
            }
        }

        Ok(StepAction::done().with_findings(findings))
    })
    .build()
}
