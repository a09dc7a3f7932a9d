use chrono::{DateTime, SubsecRound, Utc};

/// The local store keeps epoch milliseconds, so every timestamp entering the sync core is
/// truncated to that precision before it is compared or persisted.
pub fn truncate_millis(at: DateTime<Utc>) -> DateTime<Utc> {
    at.trunc_subsecs(3)
}

pub fn now_millis() -> DateTime<Utc> {
    truncate_millis(Utc::now())
}

pub fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub fn from_millis(value: i64) -> Result<DateTime<Utc>, String> {
    DateTime::from_timestamp_millis(value)
        .ok_or_else(|| format!("Timestamp out of range: {value}"))
}

/// ISO-8601 parsing that maps empty or malformed input to `None`.
pub fn parse_iso(value: &str) -> Option<DateTime<Utc>> {
    if value.trim().is_empty() {
        return None;
    }
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|parsed| truncate_millis(parsed.with_timezone(&Utc)))
}
