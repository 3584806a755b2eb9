//! Plain-text sanitization.

use regex::Regex;
use std::sync::LazyLock;

/// Default maximum length, in characters, of sanitized text.
pub const DEFAULT_MAX_LENGTH: usize = 1000;

/// Characters that are never allowed through.
const STRIPPED_CHARS: [char; 5] = ['<', '>', '"', '\'', '&'];

static SCRIPT_PROTOCOL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)javascript:|data:|vbscript:").expect("valid protocol pattern"));

/// Clean free text for storage and display.
///
/// Removes control characters (other than newline, tab and carriage return),
/// the characters `< > " ' &` and any `javascript:`, `data:` or `vbscript:`
/// sequence regardless of case, then trims and truncates to `max_length`
/// characters.
///
/// Removal repeats until nothing changes, so pieces left around a removed
/// sequence can never join into a new one. The result is a fixed point:
/// `sanitize_text(&sanitize_text(x, n), n) == sanitize_text(x, n)`.
pub fn sanitize_text(input: &str, max_length: usize) -> String {
    let mut cleaned: String = input
        .chars()
        .filter(|c| !c.is_control() || matches!(c, '\n' | '\t' | '\r'))
        .filter(|c| !STRIPPED_CHARS.contains(c))
        .collect();

    while SCRIPT_PROTOCOL.is_match(&cleaned) {
        cleaned = SCRIPT_PROTOCOL.replace_all(&cleaned, "").into_owned();
    }

    let truncated: String = cleaned.trim().chars().take(max_length).collect();
    truncated.trim_end().to_string()
}
