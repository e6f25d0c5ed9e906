//! Sanitizer - turn arbitrary in-memory values into persistable records
//!
//! [`Value`] models what callers hand to the store: plain data, dates,
//! shared (and possibly cyclic) arrays and objects, callables, symbols,
//! references to host UI objects and arbitrary serde types.
//! [`clean_data`] produces a plain JSON copy and never fails.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Map, Number, Value as JsonValue};

/// Shared, identity-bearing array node
pub type ArrayNode = Arc<RwLock<Vec<Value>>>;

/// Shared, identity-bearing object node; field order is preserved
pub type ObjectNode = Arc<RwLock<Vec<(String, Value)>>>;

/// A non-plain instance that can only be persisted through serde
pub trait Opaque: Send + Sync {
    fn type_name(&self) -> &str;
    fn to_json(&self) -> serde_json::Result<JsonValue>;
}

struct SerdeOpaque<T>(T);

impl<T: Serialize + Send + Sync> Opaque for SerdeOpaque<T> {
    fn type_name(&self) -> &str {
        std::any::type_name::<T>()
    }

    fn to_json(&self) -> serde_json::Result<JsonValue> {
        serde_json::to_value(&self.0)
    }
}

/// An in-memory value before sanitization
#[derive(Clone)]
pub enum Value {
    Undefined,
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    Date(DateTime<Utc>),
    Array(ArrayNode),
    Object(ObjectNode),
    /// A callable member; never persisted
    Function(String),
    /// A symbolic member; never persisted
    Symbol(String),
    /// A reference to a host UI/display object; never persisted
    Host(String),
    Opaque(Arc<dyn Opaque>),
}

impl Value {
    /// A fresh array node
    pub fn array(items: impl IntoIterator<Item = Value>) -> Self {
        Value::Array(Arc::new(RwLock::new(items.into_iter().collect())))
    }

    /// A fresh object node
    pub fn object<K: Into<String>>(fields: impl IntoIterator<Item = (K, Value)>) -> Self {
        let fields = fields.into_iter().map(|(k, v)| (k.into(), v)).collect();
        Value::Object(Arc::new(RwLock::new(fields)))
    }

    /// Wrap any serde type as a non-plain instance
    pub fn opaque<T: Serialize + Send + Sync + 'static>(inner: T) -> Self {
        Value::Opaque(Arc::new(SerdeOpaque(inner)))
    }

    /// Set a field on an object node, replacing an existing one.
    /// Returns `false` when `self` is not an object.
    pub fn set(&self, key: impl Into<String>, value: Value) -> bool {
        let Value::Object(node) = self else {
            return false;
        };
        let key = key.into();
        let mut fields = node.write().unwrap_or_else(PoisonError::into_inner);
        match fields.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => fields.push((key, value)),
        }
        true
    }

    /// Append to an array node. Returns `false` when `self` is not an array.
    pub fn push(&self, value: Value) -> bool {
        let Value::Array(node) = self else {
            return false;
        };
        node.write().unwrap_or_else(PoisonError::into_inner).push(value);
        true
    }
}

impl fmt::Debug for Value {
    // Shallow on purpose: nodes may be cyclic.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => f.write_str("Undefined"),
            Value::Null => f.write_str("Null"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::Number(n) => write!(f, "Number({n})"),
            Value::String(s) => write!(f, "String({s:?})"),
            Value::Date(d) => write!(f, "Date({})", d.to_rfc3339()),
            Value::Array(node) => write!(f, "Array({:p})", Arc::as_ptr(node)),
            Value::Object(node) => write!(f, "Object({:p})", Arc::as_ptr(node)),
            Value::Function(name) => write!(f, "Function({name})"),
            Value::Symbol(desc) => write!(f, "Symbol({desc})"),
            Value::Host(kind) => write!(f, "Host({kind})"),
            Value::Opaque(inner) => write!(f, "Opaque({})", inner.type_name()),
        }
    }
}

impl From<JsonValue> for Value {
    fn from(json: JsonValue) -> Self {
        match json {
            JsonValue::Null => Value::Null,
            JsonValue::Bool(b) => Value::Bool(b),
            JsonValue::Number(n) => Value::Number(n),
            JsonValue::String(s) => Value::String(s),
            JsonValue::Array(items) => Value::array(items.into_iter().map(Value::from)),
            JsonValue::Object(fields) => Value::object(fields.into_iter().map(|(k, v)| (k, Value::from(v)))),
        }
    }
}

impl From<Map<String, JsonValue>> for Value {
    fn from(record: Map<String, JsonValue>) -> Self {
        Value::from(JsonValue::Object(record))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Number(i.into())
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Number(i.into())
    }
}

/// Non-finite floats have no JSON form and become `Null`
impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Number::from_f64(f).map_or(Value::Null, Value::Number)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(date: DateTime<Utc>) -> Self {
        Value::Date(date)
    }
}

/// Deep, persist-safe copy of `value`
///
/// Any array, object or opaque node reached a second time during the walk
/// is written as `{}` at that point. This also applies to shared
/// sub-structures that are not cycles.
pub fn clean_data(value: &Value) -> JsonValue {
    let mut seen = HashSet::new();
    clean(value, &mut seen).unwrap_or(JsonValue::Null)
}

/// `None` means "no JSON form": the caller omits the field or writes `null`
fn clean(value: &Value, seen: &mut HashSet<usize>) -> Option<JsonValue> {
    match value {
        Value::Undefined | Value::Function(_) | Value::Symbol(_) => None,
        Value::Null => Some(JsonValue::Null),
        Value::Bool(b) => Some(JsonValue::Bool(*b)),
        Value::Number(n) => Some(JsonValue::Number(n.clone())),
        Value::String(s) => Some(JsonValue::String(s.clone())),
        // Dates are values, not shared nodes: no identity to revisit.
        Value::Date(date) => Some(JsonValue::String(date.to_rfc3339_opts(SecondsFormat::Millis, true))),
        Value::Host(_) => Some(empty_object()),
        Value::Array(node) => {
            if !seen.insert(Arc::as_ptr(node) as *const () as usize) {
                return Some(empty_object());
            }
            let items = node.read().unwrap_or_else(PoisonError::into_inner);
            let cleaned = items
                .iter()
                .map(|item| clean(item, seen).unwrap_or(JsonValue::Null))
                .collect();
            Some(JsonValue::Array(cleaned))
        }
        Value::Object(node) => {
            if !seen.insert(Arc::as_ptr(node) as *const () as usize) {
                return Some(empty_object());
            }
            let fields = node.read().unwrap_or_else(PoisonError::into_inner);
            let mut out = Map::new();
            for (key, field) in fields.iter() {
                if matches!(field, Value::Host(_)) {
                    continue;
                }
                if let Some(cleaned) = clean(field, seen) {
                    out.insert(key.clone(), cleaned);
                }
            }
            Some(JsonValue::Object(out))
        }
        Value::Opaque(inner) => {
            if !seen.insert(Arc::as_ptr(inner) as *const () as usize) {
                return Some(empty_object());
            }
            match inner.to_json() {
                Ok(json) => Some(json),
                Err(e) => {
                    tracing::warn!("Cannot serialize object of type {}: {}", inner.type_name(), e);
                    Some(empty_object())
                }
            }
        }
    }
}

fn empty_object() -> JsonValue {
    JsonValue::Object(Map::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;
    use std::collections::HashMap;

    #[test]
    fn test_primitives_pass_through() {
        assert_eq!(clean_data(&Value::Null), json!(null));
        assert_eq!(clean_data(&Value::from(true)), json!(true));
        assert_eq!(clean_data(&Value::from(42)), json!(42));
        assert_eq!(clean_data(&Value::from(2.5)), json!(2.5));
        assert_eq!(clean_data(&Value::from("RCA-100")), json!("RCA-100"));
        assert_eq!(clean_data(&Value::Undefined), json!(null));
        assert_eq!(clean_data(&Value::from(f64::NAN)), json!(null));
    }

    #[test]
    fn test_dates_become_iso_strings() {
        let date = Utc.with_ymd_and_hms(2024, 12, 15, 8, 30, 0).unwrap();
        let value = Value::object([("updateTime", Value::from(date))]);
        assert_eq!(clean_data(&value), json!({"updateTime": "2024-12-15T08:30:00.000Z"}));
    }

    #[test]
    fn test_repeated_date_is_written_each_time() {
        let date = Utc.with_ymd_and_hms(2024, 12, 15, 8, 30, 0).unwrap();
        let value = Value::object([("createTime", Value::from(date)), ("updateTime", Value::from(date))]);
        assert_eq!(
            clean_data(&value),
            json!({"createTime": "2024-12-15T08:30:00.000Z", "updateTime": "2024-12-15T08:30:00.000Z"})
        );
    }

    #[test]
    fn test_drops_non_serializable_members() {
        let value = Value::object([
            ("id", Value::from("process-001")),
            ("validate", Value::Function("validate".to_string())),
            ("tag", Value::Symbol("internal".to_string())),
            ("anchor", Value::Host("HTMLDivElement".to_string())),
            ("note", Value::Undefined),
            ("remark", Value::Null),
        ]);
        assert_eq!(clean_data(&value), json!({"id": "process-001", "remark": null}));
    }

    #[test]
    fn test_array_members_without_json_form() {
        let value = Value::array([
            Value::from(1),
            Value::Undefined,
            Value::Function("f".to_string()),
            Value::Host("canvas".to_string()),
        ]);
        assert_eq!(clean_data(&value), json!([1, null, null, {}]));
    }

    #[test]
    fn test_self_reference_terminates() {
        let process = Value::object([("id", Value::from(1)), ("name", Value::from("Etch"))]);
        assert!(process.set("self", process.clone()));

        assert_eq!(clean_data(&process), json!({"id": 1, "name": "Etch", "self": {}}));
    }

    #[test]
    fn test_indirect_cycle_through_array() {
        let line = Value::object([("id", Value::from("line-1"))]);
        let steps = Value::array([]);
        let step = Value::object([("order", Value::from(1)), ("line", line.clone())]);
        steps.push(step);
        line.set("steps", steps);

        assert_eq!(
            clean_data(&line),
            json!({"id": "line-1", "steps": [{"order": 1, "line": {}}]})
        );
    }

    #[test]
    fn test_shared_node_is_emptied_on_second_visit() {
        let unit = Value::object([("unit", Value::from("L"))]);
        let value = Value::object([("water", unit.clone()), ("acid", unit)]);

        assert_eq!(clean_data(&value), json!({"water": {"unit": "L"}, "acid": {}}));
    }

    #[test]
    fn test_opaque_round_trips_through_serde() {
        #[derive(Serialize)]
        struct Reading {
            temperature: f64,
            unit: &'static str,
        }

        let value = Value::object([("reading", Value::opaque(Reading { temperature: 60.0, unit: "C" }))]);
        assert_eq!(clean_data(&value), json!({"reading": {"temperature": 60.0, "unit": "C"}}));
    }

    #[test]
    fn test_unserializable_opaque_becomes_empty_object() {
        let mut grid = HashMap::new();
        grid.insert((0, 0), 1);

        let value = Value::object([("grid", Value::opaque(grid)), ("id", Value::from(5))]);
        assert_eq!(clean_data(&value), json!({"grid": {}, "id": 5}));
    }

    #[test]
    fn test_idempotent_on_plain_data() {
        let original = json!({
            "id": "process-002",
            "name": "Lithography",
            "parameters": [{"name": "Spin speed", "value": "3000", "unit": "rpm"}],
            "quality": {"standard": "CD uniformity", "acceptance": null},
            "materials": [],
            "cost": 150.5
        });

        let once = clean_data(&Value::from(original.clone()));
        let twice = clean_data(&Value::from(once.clone()));
        assert_eq!(once, original);
        assert_eq!(twice, once);
    }

    #[test]
    fn test_field_order_is_preserved() {
        let value = Value::object([("z", Value::from(1)), ("a", Value::from(2))]);
        let JsonValue::Object(map) = clean_data(&value) else {
            panic!("expected object");
        };
        let keys: Vec<&String> = map.keys().collect();
        assert_eq!(keys, vec!["z", "a"]);
    }
}
