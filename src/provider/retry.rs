use std::collections::HashMap;
use std::time::Duration;

/// Extracts the `Retry-After` header (in seconds) if present.
///
/// Only the numeric form is understood; HTTP-date values yield `None`.
pub(crate) fn retry_after_from_headers(headers: &HashMap<String, String>) -> Option<Duration> {
    headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("retry-after"))
        .and_then(|(_, value)| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}
