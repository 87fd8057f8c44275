//! Canonical timestamps.
//!
//! Every timestamp the hub stores is UTC, microsecond precision, `Z` suffix.
//! Fixed width means string order is time order, which the watchdog's SQL
//! predicate relies on.

use chrono::{DateTime, SecondsFormat, Utc};

/// Format a UTC instant in canonical form.
pub fn format(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Current time in canonical form.
pub fn now() -> String {
    format(Utc::now())
}

/// Canonical form of the instant `elapsed` before now.
///
/// Saturates at the earliest representable instant.
pub fn ago(elapsed: std::time::Duration) -> String {
    let now = Utc::now();
    let delta = chrono::TimeDelta::from_std(elapsed).unwrap_or(chrono::TimeDelta::MAX);
    format(now.checked_sub_signed(delta).unwrap_or(DateTime::<Utc>::MIN_UTC))
}

/// Re-encode any RFC 3339 timestamp in canonical form.
///
/// Returns `None` for empty or unparseable input.
pub fn normalize(raw: &str) -> Option<String> {
    if raw.is_empty() {
        return None;
    }
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| format(dt.with_timezone(&Utc)))
}
