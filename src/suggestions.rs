//! Did-you-mean suggestions for check ids.

use crate::error::Error;
use fuzzy_matcher::skim::SkimMatcherV2;
use fuzzy_matcher::FuzzyMatcher;

/// The closest registered check ids to an attempted one, best first.
#[must_use]
pub fn suggest_check_ids(available: &[&str], attempted: &str) -> Vec<String> {
    let matcher = SkimMatcherV2::default();
    let mut scored: Vec<(i64, &str)> = available
        .iter()
        .filter_map(|id| matcher.fuzzy_match(id, attempted).map(|score| (score, *id)))
        .collect();
    scored.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(b.1)));
    scored
        .into_iter()
        .take(3)
        .map(|(_, id)| id.to_string())
        .collect()
}

/// An error for an unknown check id, carrying suggestions when any id is
/// close enough.
#[must_use]
pub fn unknown_check_error(available: &[&str], attempted: &str) -> Error {
    let suggestions = suggest_check_ids(available, attempted);
    if suggestions.is_empty() {
        Error::invalid_config(format!("unknown check '{attempted}'"))
    } else {
        Error::invalid_config(format!(
            "unknown check '{attempted}'. Did you mean: {}?",
            suggestions.join(", ")
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const IDS: &[&str] = &[
        "csp-not-enforced",
        "csp-clickjacking",
        "csp-untrusted-script",
        "hsts-missing",
        "reflected-input",
    ];

    #[test]
    fn close_typo_ranks_the_intended_id_first() {
        let suggestions = suggest_check_ids(IDS, "csp-clikjacking");
        assert_eq!(suggestions.first().map(String::as_str), Some("csp-clickjacking"));
    }

    #[test]
    fn unrelated_input_suggests_nothing() {
        assert!(suggest_check_ids(IDS, "zzzzqqqq").is_empty());
    }

    #[test]
    fn error_message_carries_suggestions() {
        let err = unknown_check_error(IDS, "hsts-missin");
        assert!(err.to_string().contains("hsts-missing"));
    }
}
