//! Timestamp utilities
//!
//! Upstream payloads carry timestamps either as RFC 3339 strings or as
//! epoch milliseconds. [`WireTimestamp`] keeps the raw JSON value so records
//! re-serialize unchanged, and interprets it on demand.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Timestamp exactly as received on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WireTimestamp(Value);

impl WireTimestamp {
    /// Wrap a raw JSON value
    pub fn new(raw: Value) -> Self {
        Self(raw)
    }

    /// The raw JSON value
    pub fn raw(&self) -> &Value {
        &self.0
    }

    /// Interpret the value as a UTC instant
    ///
    /// Returns None for anything that is neither an RFC 3339 string nor an
    /// integral epoch-millisecond number.
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        match &self.0 {
            Value::String(s) => DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| dt.with_timezone(&Utc)),
            Value::Number(n) => n
                .as_i64()
                .and_then(|millis| Utc.timestamp_millis_opt(millis).single()),
            _ => None,
        }
    }
}

impl From<DateTime<Utc>> for WireTimestamp {
    fn from(dt: DateTime<Utc>) -> Self {
        Self(Value::String(dt.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)))
    }
}
