//! Active reflected-input probe.
//!
//! Re-sends the target request once per query parameter with a marker
//! value and reports parameters whose marker comes back verbatim in the
//! response body. One probe per tick, so each send lands in history as
//! its own step and cancellation can land between probes.

use crate::checks::{locate_all, target_finding};
use crate::engine::dedupe::location_key;
use crate::engine::model::{
    Aggressivity, CheckMetadata, CheckType, Finding, RequestBudget, Severity,
};
use crate::engine::registry::{CheckDefinition, StepAction};
use crate::error::Error;
use serde_json::json;

pub const REFLECTED_INPUT_ID: &str = "reflected-input";

/// Probes allowed at each aggressivity tier.
const fn probe_cap(aggressivity: Aggressivity) -> usize {
    match aggressivity {
        Aggressivity::Low => 1,
        Aggressivity::Medium => 4,
        Aggressivity::High => 8,
    }
}

/// Builds the reflected-input check.
///
/// # Errors
///
/// Propagates declaration failures.
pub fn reflected_input() -> Result<CheckDefinition, Error> {
    CheckDefinition::builder(CheckMetadata {
        id: REFLECTED_INPUT_ID.into(),
        name: "Reflected input".into(),
        description: "Query parameters reflected verbatim into the response body.".into(),
        check_type: CheckType::Active,
        tags: vec!["active".into(), "reflection".into()],
        severities: vec![Severity::Medium],
        aggressivity: Some(RequestBudget {
            min_requests: 1,
            max_requests: 8,
        }),
        min_aggressivity: Some(Aggressivity::Medium),
        depends_on: vec![],
        skip_if_found_by: None,
    })
    .when(|target| !target.request.query_params().is_empty())
    .dedupe_key(location_key)
    .init_state(|target| {
        let queue: Vec<String> = target
            .request
            .query_params()
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        json!({ "queue": queue, "probed": 0 })
    })
    .step("probe", |state, ctx| async move {
        let mut queue: Vec<String> = serde_json::from_value(state["queue"].clone())?;
        let probed = state["probed"].as_u64().unwrap_or(0) as usize;

        let cap = probe_cap(ctx.config().aggressivity);
        if probed >= cap || queue.is_empty() {
            return Ok(StepAction::done());
        }
        let parameter = queue.remove(0);

        let target = ctx.target();
        let marker = format!("vigil{:08x}", fastrand::u32(..));
        let mut spec = target.request.to_spec();
        let params: Vec<(String, String)> = target
            .request
            .query_params()
            .into_iter()
            .map(|(name, value)| {
                if name == parameter {
                    (name, urlencoding::encode(&marker).into_owned())
                } else {
                    (name, value)
                }
            })
            .collect();
        spec.set_query_params(&params);

        let exchange = ctx.sdk().send(spec).await?;
        let mut findings: Vec<Finding> = Vec::new();
        if let Some(response) = &exchange.response {
            let body = response.body_text();
            let locations = locate_all(&body, &marker, &parameter);
            if !locations.is_empty() {
                let mut finding = target_finding(
                    target,
                    "Reflected query parameter",
                    format!(
                        "The value of query parameter '{parameter}' is reflected \
                         verbatim in the response body of {}.",
                        target.request.path()
                    ),
                    Severity::Medium,
                );
                finding.correlation.request_id = exchange.request.id().to_string();
                finding.correlation.locations = locations;
                findings.push(finding);
            }
        }

        Ok(
            StepAction::continue_with("probe", json!({ "queue": queue, "probed": probed + 1 }))
                .with_findings(findings),
        )
    })
    .build()
}
