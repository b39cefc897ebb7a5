//! Payload fixtures

use chrono::{Duration, Utc};
use sel_ingest::models::SourceMeta;
use serde_json::{json, Value};

pub fn source(id: &str) -> SourceMeta {
    SourceMeta::new(id, 5)
}

/// Calendar day `days` from now, as `YYYY-MM-DD`
pub fn future_day(days: i64) -> String {
    (Utc::now() + Duration::days(days)).format("%Y-%m-%d").to_string()
}

/// RFC 3339 timestamp for `day` at `time` (`HH:MM`) UTC
pub fn at(day: &str, time: &str) -> String {
    format!("{}T{}:00Z", day, time)
}

/// An event at a named venue. `end` may be omitted.
pub fn event_payload(name: &str, start: &str, end: Option<&str>, venue: &str) -> Value {
    let mut payload = json!({
        "name": name,
        "description": format!("{} live", name),
        "startDate": start,
        "location": {"name": venue, "addressLocality": "Toronto"}
    });
    if let Some(end) = end {
        payload["endDate"] = json!(end);
    }
    payload
}

/// An online event: no place record is created for it
pub fn virtual_event_payload(name: &str, start: &str) -> Value {
    json!({
        "name": name,
        "description": format!("{} stream", name),
        "startDate": start,
        "virtualLocation": {"url": "https://stream.example.org/live"}
    })
}
