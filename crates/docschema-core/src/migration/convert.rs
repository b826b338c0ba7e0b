//! Per-document type conversion with non-failing fallback.
//!
//! Conversions never raise. A value that cannot be converted is left as it
//! was and reported as a fallback, so the caller can count it. Null stays
//! null, and a value that already has the target type is left untouched,
//! which makes every conversion idempotent.

use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::lattice::{classify, TypeTag};
use crate::value::Value;

/// A computed per-document rewrite of a single field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Conversion {
    /// Convert the value to a scalar type.
    ToType { target: TypeTag },
    /// Wrap a non-array value as a one-element array.
    WrapInArray,
    /// Replace a one-element array with its element.
    UnwrapArray,
    /// Convert each element of an array.
    ArrayItems { target: TypeTag },
}

/// Result of applying a [`Conversion`] to one value.
#[derive(Debug, Clone, PartialEq)]
pub struct ConvertOutcome {
    /// Replacement value, when the field changes.
    pub replacement: Option<Value>,
    /// True when some part of the value could not be converted and was kept.
    pub fell_back: bool,
}

impl ConvertOutcome {
    fn unchanged() -> Self {
        Self {
            replacement: None,
            fell_back: false,
        }
    }

    fn changed(value: Value) -> Self {
        Self {
            replacement: Some(value),
            fell_back: false,
        }
    }

    fn fallback() -> Self {
        Self {
            replacement: None,
            fell_back: true,
        }
    }
}

impl Conversion {
    /// Apply the conversion to a present field value.
    pub fn apply(&self, value: &Value) -> ConvertOutcome {
        match self {
            Conversion::ToType { target } => convert_scalar(value, *target),
            Conversion::WrapInArray => match value {
                Value::Array(_) | Value::Null => ConvertOutcome::unchanged(),
                other => ConvertOutcome::changed(Value::Array(vec![other.clone()])),
            },
            Conversion::UnwrapArray => match value {
                Value::Array(items) => match items.as_slice() {
                    [] => ConvertOutcome::changed(Value::Null),
                    [Value::Array(_)] => ConvertOutcome::fallback(),
                    [single] => ConvertOutcome::changed(single.clone()),
                    _ => ConvertOutcome::fallback(),
                },
                _ => ConvertOutcome::unchanged(),
            },
            Conversion::ArrayItems { target } => match value {
                Value::Array(items) => {
                    let mut changed = false;
                    let mut fell_back = false;
                    let converted: Vec<Value> = items
                        .iter()
                        .map(|item| {
                            let outcome = convert_scalar(item, *target);
                            fell_back |= outcome.fell_back;
                            match outcome.replacement {
                                Some(v) => {
                                    changed = true;
                                    v
                                }
                                None => item.clone(),
                            }
                        })
                        .collect();
                    ConvertOutcome {
                        replacement: changed.then_some(Value::Array(converted)),
                        fell_back,
                    }
                }
                _ => ConvertOutcome::unchanged(),
            },
        }
    }
}

fn convert_scalar(value: &Value, target: TypeTag) -> ConvertOutcome {
    if value.is_null() || classify(value) == target {
        return ConvertOutcome::unchanged();
    }
    match convert_value(value, target) {
        Some(v) if &v == value => ConvertOutcome::unchanged(),
        Some(v) => ConvertOutcome::changed(v),
        None => ConvertOutcome::fallback(),
    }
}

/// Convert a value to `target`, or `None` when it has no sensible image.
pub fn convert_value(value: &Value, target: TypeTag) -> Option<Value> {
    if value.is_null() {
        return Some(Value::Null);
    }
    if classify(value) == target {
        return Some(value.clone());
    }
    match target {
        TypeTag::String => to_string(value).map(Value::String),
        TypeTag::Int => to_i64(value, false)
            .and_then(|i| i32::try_from(i).ok())
            .map(Value::Int32),
        TypeTag::Long => to_i64(value, true).map(Value::Int64),
        TypeTag::Double => to_f64(value).map(Value::Double),
        TypeTag::Decimal => to_decimal(value).map(Value::Decimal),
        TypeTag::Bool => to_bool(value).map(Value::Bool),
        TypeTag::Date => to_date(value).map(Value::Date),
        TypeTag::ObjectId => match value {
            Value::String(s) => s.trim().parse().ok().map(Value::ObjectId),
            _ => None,
        },
        _ => None,
    }
}

fn to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) | Value::Symbol(s) | Value::Code(s) | Value::Decimal(s) => {
            Some(s.clone())
        }
        Value::Bool(_)
        | Value::Int32(_)
        | Value::Int64(_)
        | Value::Double(_)
        | Value::Date(_)
        | Value::ObjectId(_) => Some(value.to_string()),
        _ => None,
    }
}

fn float_to_i64(f: f64) -> Option<i64> {
    if f.is_finite() && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
        Some(f.trunc() as i64)
    } else {
        None
    }
}

/// Integer image of a value. Dates only convert to 64-bit integers.
fn to_i64(value: &Value, allow_date: bool) -> Option<i64> {
    match value {
        Value::Int32(i) => Some(*i as i64),
        Value::Int64(i) => Some(*i),
        Value::Double(f) => float_to_i64(*f),
        Value::Bool(b) => Some(i64::from(*b)),
        Value::String(s) => s.trim().parse().ok(),
        Value::Decimal(s) => s.trim().parse::<f64>().ok().and_then(float_to_i64),
        Value::Date(ms) if allow_date => Some(*ms),
        _ => None,
    }
}

fn to_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Int32(i) => Some(*i as f64),
        Value::Int64(i) => Some(*i as f64),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::String(s) | Value::Decimal(s) => s.trim().parse().ok(),
        Value::Date(ms) => Some(*ms as f64),
        _ => None,
    }
}

fn to_decimal(value: &Value) -> Option<String> {
    match value {
        Value::Int32(i) => Some(i.to_string()),
        Value::Int64(i) => Some(i.to_string()),
        Value::Double(f) if f.is_finite() => Some(f.to_string()),
        Value::Bool(b) => Some(if *b { "1" } else { "0" }.to_string()),
        Value::String(s) => {
            let trimmed = s.trim();
            trimmed.parse::<f64>().ok().map(|_| trimmed.to_string())
        }
        _ => None,
    }
}

fn to_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Int32(i) => Some(*i != 0),
        Value::Int64(i) => Some(*i != 0),
        Value::Double(f) => Some(*f != 0.0),
        Value::Decimal(s) => s.trim().parse::<f64>().ok().map(|f| f != 0.0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Some(true),
            "false" | "0" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn to_date(value: &Value) -> Option<i64> {
    match value {
        Value::Int64(ms) => Some(*ms),
        Value::Double(f) => float_to_i64(*f),
        Value::ObjectId(id) => Some(i64::from(id.timestamp_secs()) * 1000),
        Value::Timestamp { time, .. } => Some(i64::from(*time) * 1000),
        Value::String(s) => {
            let s = s.trim();
            DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.timestamp_millis())
                .ok()
                .or_else(|| {
                    NaiveDate::parse_from_str(s, "%Y-%m-%d")
                        .ok()
                        .and_then(|d| d.and_hms_opt(0, 0, 0))
                        .map(|dt| dt.and_utc().timestamp_millis())
                })
        }
        _ => None,
    }
}
