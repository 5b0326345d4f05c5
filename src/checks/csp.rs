//! Content-Security-Policy checks.
//!
//! `csp-not-enforced` is the family's root: it decides whether a policy
//! protects the page at all and publishes `{enforced, policy}` for the
//! dependent checks, which then assess individual directives.

use crate::checks::target_finding;
use crate::engine::dedupe::location_key;
use crate::engine::model::{CheckMetadata, CheckType, Severity};
use crate::engine::registry::{CheckDefinition, StepAction};
use crate::error::Error;
use serde_json::json;
use std::collections::HashMap;

pub const NOT_ENFORCED_ID: &str = "csp-not-enforced";
pub const CLICKJACKING_ID: &str = "csp-clickjacking";
pub const UNTRUSTED_SCRIPT_ID: &str = "csp-untrusted-script";

const CSP_HEADER: &str = "content-security-policy";

/// Splits a serialized policy into directive → source list.
fn parse_policy(policy: &str) -> HashMap<String, Vec<String>> {
    policy
        .split(';')
        .filter_map(|directive| {
            let mut parts = directive.split_whitespace();
            let name = parts.next()?.to_ascii_lowercase();
            Some((name, parts.map(str::to_string).collect()))
        })
        .collect()
}

fn metadata(id: &str, name: &str, description: &str, severity: Severity) -> CheckMetadata {
    CheckMetadata {
        id: id.into(),
        name: name.into(),
        description: description.into(),
        check_type: CheckType::Passive,
        tags: vec!["csp".into(), "headers".into()],
        severities: vec![severity],
        aggressivity: None,
        min_aggressivity: None,
        depends_on: if id == NOT_ENFORCED_ID {
            vec![]
        } else {
            vec![NOT_ENFORCED_ID.into()]
        },
        skip_if_found_by: None,
    }
}

/// Fires when an HTML page carries neither a CSP header nor a CSP meta
/// tag. Publishes the policy it found for the dependent checks.
///
/// # Errors
///
/// Propagates declaration failures.
pub fn not_enforced() -> Result<CheckDefinition, Error> {
    CheckDefinition::builder(metadata(
        NOT_ENFORCED_ID,
        "CSP not enforced",
        "The page is served without a Content Security Policy.",
        Severity::High,
    ))
    .when(|target| target.is_html())
    .dedupe_key(location_key)
    .step("inspect", |_, ctx| async move {
        let target = ctx.target();
        let header_policy = target.response_header(CSP_HEADER).map(str::to_string);

        let policy = match header_policy {
            Some(policy) => Some(policy),
            // Header absent: a <meta http-equiv> tag still counts.
            None => ctx
                .parse_target_html()
                .await?
                .meta_http_equiv(CSP_HEADER)
                .map(str::to_string),
        };

        let Some(policy) = policy else {
            return Ok(StepAction::done()
                .with_output(json!({ "enforced": false }))
                .with_finding(target_finding(
                    target,
                    "Content Security Policy not enforced",
                    format!(
                        "{} is served as HTML without a Content-Security-Policy \
                         header or meta tag.",
                        target.request.url()
                    ),
                    Severity::High,
                )));
        };

        Ok(StepAction::done().with_output(json!({ "enforced": true, "policy": policy })))
    })
    .build()
}

/// Fires when a policy exists but neither `frame-ancestors` nor an
/// `X-Frame-Options` header restricts framing. Pages with no policy at
/// all are already covered by [`not_enforced`].
///
/// # Errors
///
/// Propagates declaration failures.
pub fn clickjacking() -> Result<CheckDefinition, Error> {
    CheckDefinition::builder(metadata(
        CLICKJACKING_ID,
        "CSP clickjacking",
        "The Content Security Policy does not restrict framing.",
        Severity::Medium,
    ))
    .when(|target| target.is_html())
    .dedupe_key(location_key)
    .step("inspect", |_, ctx| async move {
        let target = ctx.target();
        let Some(policy) = enforced_policy(&ctx) else {
            return Ok(StepAction::done());
        };

        let directives = parse_policy(&policy);
        if directives.contains_key("frame-ancestors") {
            return Ok(StepAction::done());
        }
        if target.response_header("x-frame-options").is_some() {
            return Ok(StepAction::done());
        }

        Ok(StepAction::done().with_finding(target_finding(
            target,
            "Clickjacking not mitigated by CSP",
            format!(
                "{} enforces a Content Security Policy without a frame-ancestors \
                 directive, and no X-Frame-Options header is present.",
                target.request.url()
            ),
            Severity::Medium,
        )))
    })
    .build()
}

/// Fires when `script-src` (or `default-src` as its fallback) admits a
/// wildcard or inline scripts.
///
/// # Errors
///
/// Propagates declaration failures.
pub fn untrusted_script() -> Result<CheckDefinition, Error> {
    CheckDefinition::builder(metadata(
        UNTRUSTED_SCRIPT_ID,
        "CSP allows untrusted scripts",
        "The script-src policy admits wildcard or inline sources.",
        Severity::Critical,
    ))
    .when(|target| target.is_html())
    .dedupe_key(location_key)
    .step("inspect", |_, ctx| async move {
        let target = ctx.target();
        let Some(policy) = enforced_policy(&ctx) else {
            return Ok(StepAction::done());
        };

        let directives = parse_policy(&policy);
        let sources = directives
            .get("script-src")
            .or_else(|| directives.get("default-src"));
        let Some(sources) = sources else {
            return Ok(StepAction::done());
        };

        let untrusted: Vec<&str> = sources
            .iter()
            .map(String::as_str)
            .filter(|source| {
                matches!(
                    source.trim_matches('\'').to_ascii_lowercase().as_str(),
                    "*" | "unsafe-inline" | "unsafe-eval"
                )
            })
            .collect();
        if untrusted.is_empty() {
            return Ok(StepAction::done());
        }

        Ok(StepAction::done().with_finding(target_finding(
            target,
            "CSP permits untrusted script sources",
            format!(
                "{} allows scripts from {} via its Content Security Policy.",
                target.request.url(),
                untrusted.join(", ")
            ),
            Severity::Critical,
        )))
    })
    .build()
}

/// The policy published by `csp-not-enforced`, when it ran and found one.
fn enforced_policy(ctx: &crate::engine::context::RuntimeContext) -> Option<String> {
    let output = ctx.dependencies().get(NOT_ENFORCED_ID)?;
    if output["enforced"] != json!(true) {
        return None;
    }
    output["policy"].as_str().map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_parsing_splits_directives_and_sources() {
        let directives =
            parse_policy("default-src 'self'; script-src 'self' cdn.example.com; upgrade-insecure-requests");
        assert_eq!(directives["default-src"], vec!["'self'"]);
        assert_eq!(directives["script-src"], vec!["'self'", "cdn.example.com"]);
        assert!(directives["upgrade-insecure-requests"].is_empty());
    }

    #[test]
    fn policy_parsing_normalizes_directive_case() {
        let directives = parse_policy("Script-Src *");
        assert_eq!(directives["script-src"], vec!["*"]);
    }

    #[test]
    fn family_dependencies_point_at_the_root() {
        let clickjacking = clickjacking().unwrap();
        assert_eq!(
            clickjacking.metadata().depends_on,
            vec![NOT_ENFORCED_ID.to_string()]
        );
        let root = not_enforced().unwrap();
        assert!(root.metadata().depends_on.is_empty());
    }
}
