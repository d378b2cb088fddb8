//! Environment variable parsing helpers
//!
//! Missing or unparsable values fall back to defaults instead of panicking.

use std::str::FromStr;

/// Parse an environment variable with a default fallback
///
/// # Example
/// ```ignore
/// let port: u16 = parse_env_with_default("PORT", 8080);
/// ```
pub fn parse_env_with_default<T: FromStr>(key: &str, default: T) -> T {
    parse_env_optional(key).unwrap_or(default)
}

/// Parse an environment variable, `None` if missing or invalid
pub fn parse_env_optional<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Parse a required environment variable
pub fn parse_env_required<T: FromStr>(key: &str) -> Result<T, String> {
    std::env::var(key)
        .map_err(|_| format!("Environment variable {} not found", key))?
        .trim()
        .parse()
        .map_err(|_| format!("Failed to parse environment variable {}", key))
}

/// Boolean flag: `true`/`1`/`yes`/`on` (case-insensitive) are true, anything
/// else present is false, absent is `default`
pub fn parse_env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(v) => matches!(
            v.trim().to_ascii_lowercase().as_str(),
            "true" | "1" | "yes" | "on"
        ),
        Err(_) => default,
    }
}

/// Comma-separated list with blanks dropped
pub fn parse_env_list(key: &str) -> Option<Vec<String>> {
    std::env::var(key).ok().map(|v| split_list(&v))
}

pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
