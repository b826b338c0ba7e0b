//! Runtime document values.
//!
//! [`Value`] covers the full set of representations a document store hands
//! back, including legacy ones (`Symbol`, `Undefined`) that the type lattice
//! folds into `string`. JSON conversion follows the relaxed extended-JSON
//! conventions (`{"$oid": ...}`, `{"$date": ...}`) so documents can be
//! imported from and rendered to plain JSON.

mod document;
mod object_id;

pub use document::{Document, ID_FIELD};
pub use object_id::ObjectId;

use std::fmt;

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

/// A document value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Null value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// 32-bit signed integer.
    Int32(i32),
    /// 64-bit signed integer.
    Int64(i64),
    /// 64-bit floating point.
    Double(f64),
    /// 128-bit decimal, kept in its canonical text form.
    Decimal(String),
    /// UTF-8 string.
    String(String),
    /// Embedded document.
    Object(Document),
    /// Array of values.
    Array(Vec<Value>),
    /// UTC datetime as milliseconds since the Unix epoch.
    Date(i64),
    /// Document identifier.
    ObjectId(ObjectId),
    /// Binary data.
    Binary(Vec<u8>),
    /// Regular expression.
    Regex { pattern: String, options: String },
    /// Internal replication timestamp.
    Timestamp { time: u32, increment: u32 },
    MinKey,
    MaxKey,
    /// JavaScript code.
    Code(String),
    /// Legacy reference to a document in another namespace.
    DbPointer { namespace: String, id: ObjectId },
    /// Legacy symbol.
    Symbol(String),
    /// Legacy undefined.
    Undefined,
}

impl Value {
    /// Current time as a `Date` value.
    pub fn now() -> Self {
        Value::Date(Utc::now().timestamp_millis())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_array(&self) -> bool {
        matches!(self, Value::Array(_))
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Try to get as i64, widening 32-bit integers.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int64(i) => Some(*i),
            Value::Int32(i) => Some(*i as i64),
            _ => None,
        }
    }

    /// Try to get as f64, widening integers.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Double(f) => Some(*f),
            Value::Int32(i) => Some(*i as f64),
            Value::Int64(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_document(&self) -> Option<&Document> {
        match self {
            Value::Object(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Convert a plain JSON value, recognizing extended-JSON wrappers.
    ///
    /// Integers that fit in 32 bits become `Int32`, wider ones `Int64`.
    pub fn from_json(json: serde_json::Value) -> Self {
        use serde_json::Value as J;
        match json {
            J::Null => Value::Null,
            J::Bool(b) => Value::Bool(b),
            J::Number(n) => {
                if let Some(i) = n.as_i64() {
                    match i32::try_from(i) {
                        Ok(small) => Value::Int32(small),
                        Err(_) => Value::Int64(i),
                    }
                } else {
                    Value::Double(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            J::String(s) => Value::String(s),
            J::Array(items) => Value::Array(items.into_iter().map(Value::from_json).collect()),
            J::Object(map) => match extended_json(&map) {
                Some(v) => v,
                None => Value::Object(
                    map.into_iter()
                        .map(|(k, v)| (k, Value::from_json(v)))
                        .collect(),
                ),
            },
        }
    }

    /// Render as relaxed extended JSON.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as J;
        match self {
            Value::Null => J::Null,
            Value::Bool(b) => J::Bool(*b),
            Value::Int32(i) => json!(i),
            Value::Int64(i) => json!(i),
            Value::Double(f) => serde_json::Number::from_f64(*f)
                .map(J::Number)
                .unwrap_or(J::Null),
            Value::Decimal(d) => json!({ "$numberDecimal": d }),
            Value::String(s) => J::String(s.clone()),
            Value::Object(doc) => J::Object(
                doc.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            Value::Array(items) => J::Array(items.iter().map(Value::to_json).collect()),
            Value::Date(ms) => json!({ "$date": format_millis(*ms) }),
            Value::ObjectId(id) => json!({ "$oid": id.to_hex() }),
            Value::Binary(bytes) => json!({ "$binary": hex::encode(bytes) }),
            Value::Regex { pattern, options } => {
                json!({ "$regex": pattern, "$options": options })
            }
            Value::Timestamp { time, increment } => {
                json!({ "$timestamp": { "t": time, "i": increment } })
            }
            Value::MinKey => json!({ "$minKey": 1 }),
            Value::MaxKey => json!({ "$maxKey": 1 }),
            Value::Code(code) => json!({ "$code": code }),
            Value::DbPointer { namespace, id } => {
                json!({ "$ref": namespace, "$id": { "$oid": id.to_hex() } })
            }
            Value::Symbol(s) => json!({ "$symbol": s }),
            Value::Undefined => json!({ "$undefined": true }),
        }
    }
}

/// Recognize the extended-JSON wrappers produced by [`Value::to_json`].
fn extended_json(map: &serde_json::Map<String, serde_json::Value>) -> Option<Value> {
    use serde_json::Value as J;

    if map.len() == 2 {
        if let (Some(J::String(pattern)), Some(J::String(options))) =
            (map.get("$regex"), map.get("$options"))
        {
            return Some(Value::Regex {
                pattern: pattern.clone(),
                options: options.clone(),
            });
        }
        if let (Some(J::String(namespace)), Some(J::Object(id))) = (map.get("$ref"), map.get("$id"))
        {
            let id = id.get("$oid")?.as_str()?.parse().ok()?;
            return Some(Value::DbPointer {
                namespace: namespace.clone(),
                id,
            });
        }
        return None;
    }
    if map.len() != 1 {
        return None;
    }

    let (key, inner) = map.iter().next()?;
    match (key.as_str(), inner) {
        ("$oid", J::String(text)) => text.parse().ok().map(Value::ObjectId),
        ("$date", J::String(text)) => DateTime::parse_from_rfc3339(text)
            .ok()
            .map(|dt| Value::Date(dt.timestamp_millis())),
        ("$date", J::Number(n)) => n.as_i64().map(Value::Date),
        ("$numberDecimal", J::String(text)) => Some(Value::Decimal(text.clone())),
        ("$numberLong", J::String(text)) => text.parse().ok().map(Value::Int64),
        ("$binary", J::String(text)) => hex::decode(text).ok().map(Value::Binary),
        ("$timestamp", J::Object(ts)) => {
            let time = u32::try_from(ts.get("t")?.as_u64()?).ok()?;
            let increment = u32::try_from(ts.get("i")?.as_u64()?).ok()?;
            Some(Value::Timestamp { time, increment })
        }
        ("$minKey", _) => Some(Value::MinKey),
        ("$maxKey", _) => Some(Value::MaxKey),
        ("$code", J::String(code)) => Some(Value::Code(code.clone())),
        ("$symbol", J::String(s)) => Some(Value::Symbol(s.clone())),
        ("$undefined", _) => Some(Value::Undefined),
        _ => None,
    }
}

/// Format epoch milliseconds as RFC 3339 with millisecond precision.
pub fn format_millis(ms: i64) -> String {
    match Utc.timestamp_millis_opt(ms).single() {
        Some(dt) => dt.to_rfc3339_opts(SecondsFormat::Millis, true),
        None => ms.to_string(),
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) | Value::Symbol(s) | Value::Code(s) | Value::Decimal(s) => {
                f.write_str(s)
            }
            Value::Date(ms) => f.write_str(&format_millis(*ms)),
            Value::ObjectId(id) => write!(f, "{id}"),
            other => write!(f, "{}", other.to_json()),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<Document> for Value {
    fn from(v: Document) -> Self {
        Value::Object(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::Array(v)
    }
}

impl From<ObjectId> for Value {
    fn from(v: ObjectId) -> Self {
        Value::ObjectId(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_json_numbers() {
        assert_eq!(Value::from_json(json!(5)), Value::Int32(5));
        assert_eq!(Value::from_json(json!(5_000_000_000i64)), Value::Int64(5_000_000_000));
        assert_eq!(Value::from_json(json!(1.5)), Value::Double(1.5));
    }

    #[test]
    fn test_from_json_extended_wrappers() {
        let id = ObjectId::with_timestamp(1);
        let v = Value::from_json(json!({ "$oid": id.to_hex() }));
        assert_eq!(v, Value::ObjectId(id));

        let v = Value::from_json(json!({ "$date": "2024-01-02T03:04:05.000Z" }));
        assert_eq!(v, Value::Date(1_704_164_645_000));

        let v = Value::from_json(json!({ "$numberDecimal": "1.10" }));
        assert_eq!(v, Value::Decimal("1.10".into()));
    }

    #[test]
    fn test_unrecognized_wrapper_stays_object() {
        let v = Value::from_json(json!({ "$oid": 12, "other": true }));
        assert!(matches!(v, Value::Object(_)));
    }

    #[test]
    fn test_nested_document() {
        let v = Value::from_json(json!({ "a": { "b": [1, "x", null] } }));
        let doc = v.as_document().unwrap();
        let inner = doc.get("a").unwrap().as_document().unwrap();
        assert_eq!(
            inner.get("b"),
            Some(&Value::Array(vec![
                Value::Int32(1),
                Value::String("x".into()),
                Value::Null
            ]))
        );
    }

    #[test]
    fn test_to_json_preserves_wrappers() {
        let v = Value::Timestamp { time: 3, increment: 4 };
        assert_eq!(Value::from_json(v.to_json()), v);
        let v = Value::Regex {
            pattern: "^a".into(),
            options: "i".into(),
        };
        assert_eq!(Value::from_json(v.to_json()), v);
    }

    #[test]
    fn test_display_rendering() {
        assert_eq!(Value::from("abc").to_string(), "abc");
        assert_eq!(Value::Int32(7).to_string(), "7");
        assert_eq!(Value::Null.to_string(), "null");
        assert_eq!(Value::Date(0).to_string(), "1970-01-01T00:00:00.000Z");
        assert_eq!(
            Value::Array(vec![Value::Int32(1), Value::Bool(true)]).to_string(),
            "[1,true]"
        );
    }
}
