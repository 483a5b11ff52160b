//! Route handlers and shared request validation.

pub mod auth;
pub mod health;
pub mod root;

use regex::Regex;

/// PINs are short numeric codes typed on a tablet keypad.
pub fn valid_pin(pin: &str) -> bool {
    Regex::new(r"^[0-9]{4,8}$").is_ok_and(|re| re.is_match(pin))
}

/// Device fingerprints are opaque client-chosen identifiers; bound the
/// charset and length so they are safe to log and index.
pub fn valid_device_fingerprint(device: &str) -> bool {
    Regex::new(r"^[A-Za-z0-9._-]{1,128}$").is_ok_and(|re| re.is_match(device))
}

/// Extract a client IP for rate limiting from common proxy headers.
pub(crate) fn extract_client_ip(headers: &axum::http::HeaderMap) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if forwarded.is_some() {
        return forwarded.map(str::to_string);
    }
    headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}
