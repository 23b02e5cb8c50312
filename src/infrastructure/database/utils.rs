//! Column codecs shared by the store
//!
//! Timestamps come back from `SQLite` in whichever format wrote them, and the
//! structured program fields live in TEXT columns as JSON.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::domain::ports::errors::StoreError;

/// Parse a timestamp column
///
/// Supports:
/// - RFC3339: "2025-10-29T17:28:13.512Z", "2025-10-29T17:28:13+00:00"
/// - `SQLite` `datetime()`: "2025-10-29 17:28:13", optionally with fractional seconds
/// - ISO 8601 without timezone: "2025-10-29T17:28:13"
///
/// Naive timestamps are read as UTC.
pub fn parse_datetime(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Ok(DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc));
        }
    }

    DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc))
}

/// Serialize a value for a JSON TEXT column
pub fn to_json<T: Serialize>(value: &T) -> Result<String, StoreError> {
    Ok(serde_json::to_string(value)?)
}

/// Decode a JSON TEXT column, treating NULL and empty text as the default
pub fn from_json<T: DeserializeOwned + Default>(raw: Option<&str>) -> Result<T, StoreError> {
    match raw.map(str::trim) {
        None | Some("") => Ok(T::default()),
        Some(text) => Ok(serde_json::from_str(text)?),
    }
}
