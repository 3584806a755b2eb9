//! Programme session record checks.

use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use serde_json::Value;

/// Maximum title length in characters.
pub const MAX_TITLE_LENGTH: usize = 200;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SessionId {
    Number(i64),
    Text(String),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Timestamp {
    Millis(i64),
    Text(String),
}

impl Timestamp {
    fn to_utc(&self) -> Option<DateTime<Utc>> {
        match self {
            Timestamp::Millis(ms) => Utc.timestamp_millis_opt(*ms).single(),
            Timestamp::Text(text) => DateTime::parse_from_rfc3339(text.trim())
                .ok()
                .map(|dt| dt.with_timezone(&Utc)),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SessionRecord {
    id: SessionId,
    title: String,
    start_time: Timestamp,
    end_time: Timestamp,
}

/// Check that a session record is well formed.
///
/// Requires an `id` (non-empty string or integer), a non-blank `title` of at
/// most 200 characters, and `start_time` strictly before `end_time`. Times are
/// RFC 3339 strings or epoch milliseconds. The record is never modified.
pub fn validate_session_data(record: &Value) -> bool {
    let Ok(session) = SessionRecord::deserialize(record) else {
        return false;
    };

    let id_ok = match &session.id {
        SessionId::Number(_) => true,
        SessionId::Text(id) => !id.trim().is_empty(),
    };
    let title = session.title.trim();
    let title_ok = !title.is_empty() && session.title.chars().count() <= MAX_TITLE_LENGTH;

    let times_ok = match (session.start_time.to_utc(), session.end_time.to_utc()) {
        (Some(start), Some(end)) => start < end,
        _ => false,
    };

    id_ok && title_ok && times_ok
}
