//! Environment variable helpers.

use std::time::Duration;

use crate::utils::parse_duration;

/// First non-empty value among `keys`, checked in order.
pub fn env_first(keys: &[&str]) -> Option<String> {
    keys.iter().filter_map(|key| std::env::var(key).ok()).find(|value| !value.is_empty())
}

/// Value of `key`, or `default` when unset or empty.
pub fn env_or(key: &str, default: &str) -> String {
    env_first(&[key]).unwrap_or_else(|| default.to_string())
}

/// Boolean flag accepting `true`, `1` and `yes`.
pub fn env_bool(key: &str, default: bool) -> bool {
    match env_first(&[key]) {
        Some(value) => matches!(value.to_lowercase().as_str(), "true" | "1" | "yes"),
        None => default,
    }
}

/// Duration string such as `30s` or `1h30m`; unparsable values fall back to `default`.
pub fn env_duration(key: &str, default: Duration) -> Duration {
    match env_first(&[key]) {
        Some(value) => parse_duration(&value).unwrap_or_else(|e| {
            tracing::warn!(variable = key, value = %value, error = %e, "Ignoring invalid duration");
            default
        }),
        None => default,
    }
}
