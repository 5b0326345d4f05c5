//! Table rendering for findings and the check catalog.

use crate::engine::model::{CheckMetadata, Finding};
use tabled::settings::Style;
use tabled::{Table, Tabled};

#[derive(Tabled)]
struct FindingRow {
    #[tabled(rename = "SEVERITY")]
    severity: String,
    #[tabled(rename = "FINDING")]
    name: String,
    #[tabled(rename = "TARGET")]
    request_id: String,
    #[tabled(rename = "DETAIL")]
    description: String,
}

/// Findings as a table, most severe first.
#[must_use]
pub fn findings_table(findings: &[Finding]) -> String {
    let mut sorted: Vec<&Finding> = findings.iter().collect();
    sorted.sort_by(|a, b| b.severity.cmp(&a.severity));

    let rows: Vec<FindingRow> = sorted
        .into_iter()
        .map(|finding| FindingRow {
            severity: finding.severity.to_string(),
            name: finding.name.clone(),
            request_id: finding.correlation.request_id.clone(),
            description: finding.description.clone(),
        })
        .collect();
    Table::new(rows).with(Style::sharp()).to_string()
}

#[derive(Tabled)]
struct CheckRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "TYPE")]
    check_type: String,
    #[tabled(rename = "SEVERITIES")]
    severities: String,
    #[tabled(rename = "TAGS")]
    tags: String,
    #[tabled(rename = "DEPENDS ON")]
    depends_on: String,
}

/// The check catalog as a table, in registration order.
pub fn checks_table<'a>(checks: impl Iterator<Item = &'a CheckMetadata>) -> String {
    let rows: Vec<CheckRow> = checks
        .map(|metadata| CheckRow {
            id: metadata.id.clone(),
            check_type: metadata.check_type.to_string(),
            severities: metadata
                .severities
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", "),
            tags: metadata.tags.join(", "),
            depends_on: metadata.depends_on.join(", "),
        })
        .collect();
    Table::new(rows).with(Style::sharp()).to_string()
}
