//! Record identity keys

use std::fmt;
use serde_json::Value as JsonValue;

/// Largest integer a double represents exactly
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

/// Canonical encoding of a record `id`
///
/// Strings and numbers are distinct keys: `1` and `"1"` never collide.
/// Integral floats encode like integers so `1.0` and `1` are the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordKey(String);

impl RecordKey {
    /// Build a key from a JSON value; only strings and finite numbers qualify
    pub fn from_json(value: &JsonValue) -> Option<Self> {
        match value {
            JsonValue::String(s) => serde_json::to_string(s).ok().map(Self),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Some(Self(i.to_string()))
                } else if let Some(u) = n.as_u64() {
                    Some(Self(u.to_string()))
                } else {
                    n.as_f64().and_then(Self::from_f64)
                }
            }
            _ => None,
        }
    }

    /// Extract the key from a record's `id` field
    pub fn of_record(record: &JsonValue) -> Option<Self> {
        record.get("id").and_then(Self::from_json)
    }

    /// Parse a key typed by a person: JSON numbers and quoted strings are
    /// taken as such, anything else is a bare string.
    pub fn parse_lenient(raw: &str) -> Self {
        serde_json::from_str::<JsonValue>(raw)
            .ok()
            .and_then(|value| Self::from_json(&value))
            .unwrap_or_else(|| Self::from(raw))
    }

    fn from_f64(f: f64) -> Option<Self> {
        if !f.is_finite() {
            return None;
        }
        if f.fract() == 0.0 && f.abs() <= MAX_SAFE_INTEGER {
            return Some(Self((f as i64).to_string()));
        }
        serde_json::Number::from_f64(f).map(|n| Self(n.to_string()))
    }

    /// The encoded form stored in the key column
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RecordKey {
    fn from(s: &str) -> Self {
        Self::from(s.to_string())
    }
}

impl From<String> for RecordKey {
    fn from(s: String) -> Self {
        Self::from_json(&JsonValue::String(s)).unwrap_or_else(|| Self(String::from("\"\"")))
    }
}

impl From<i64> for RecordKey {
    fn from(i: i64) -> Self {
        Self(i.to_string())
    }
}

impl From<i32> for RecordKey {
    fn from(i: i32) -> Self {
        Self(i.to_string())
    }
}

impl From<u64> for RecordKey {
    fn from(u: u64) -> Self {
        Self(u.to_string())
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
