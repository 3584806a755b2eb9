//! Input sanitization.
//!
//! Every function here is total: hostile or malformed input degrades to an
//! empty string or `None`, never to an error, so callers can treat untrusted
//! input uniformly.

mod link;
mod rich_text;
mod session;
mod text;

pub use link::{sanitize_url, DEFAULT_ALLOWED_PROTOCOLS};
pub use rich_text::{sanitize_rich_text, SanitizationPolicy};
pub use session::{validate_session_data, MAX_TITLE_LENGTH};
pub use text::{sanitize_text, DEFAULT_MAX_LENGTH};

use serde_json::Value;

/// URL schemes that are never allowed, whatever a caller configures.
pub const HARD_DENIED_PROTOCOLS: &[&str] = &["javascript", "data", "vbscript"];

/// Sanitize a JSON value as text. Anything but a string yields an empty string.
pub fn sanitize_text_value(value: &Value, max_length: usize) -> String {
    match value {
        Value::String(text) => sanitize_text(text, max_length),
        _ => String::new(),
    }
}

/// Sanitize a JSON value as rich text. Anything but a string yields an empty string.
pub fn sanitize_rich_text_value(value: &Value, policy: &SanitizationPolicy) -> String {
    match value {
        Value::String(text) => sanitize_rich_text(text, policy),
        _ => String::new(),
    }
}
