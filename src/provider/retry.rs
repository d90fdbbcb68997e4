use std::collections::HashMap;

/// Seconds assumed when a 429 carries no usable `Retry-After`.
pub(crate) const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

/// Extracts the `Retry-After` header in whole seconds.
///
/// Only the numeric form is understood; HTTP-date values yield `None`.
pub(crate) fn retry_after_from_headers(headers: &HashMap<String, String>) -> Option<u64> {
    headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("retry-after"))
        .and_then(|(_, value)| value.trim().parse::<u64>().ok())
}
