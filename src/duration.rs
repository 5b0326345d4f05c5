//! Human-readable duration parsing for CLI flags and config values.
//!
//! Accepts "250ms", "30s", "5m", "1h", or a bare number of milliseconds.

use crate::error::Error;
use std::time::Duration;

/// Parses a duration string.
///
/// # Errors
///
/// Returns an error for an empty string or an unrecognized format.
///
/// # Examples
///
/// ```
/// use vigil::duration::parse_duration;
/// use std::time::Duration;
///
/// assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
/// assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
/// assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
/// assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
/// assert_eq!(parse_duration("250").unwrap(), Duration::from_millis(250));
/// ```
pub fn parse_duration(input: &str) -> Result<Duration, Error> {
    let input = input.trim();
    if input.is_empty() {
        return Err(Error::invalid_config("duration cannot be empty"));
    }

    let split = input
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(input.len());
    let (digits, unit) = input.split_at(split);

    let value: u64 = digits.parse().map_err(|_| {
        Error::invalid_config(format!(
            "invalid duration '{input}': use a value like '250ms', '30s', '5m', or '1h'"
        ))
    })?;

    match unit.trim() {
        "" | "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value * 60)),
        "h" => Ok(Duration::from_secs(value * 3600)),
        other => Err(Error::invalid_config(format!(
            "unknown duration unit '{other}' in '{input}'"
        ))),
    }
}
