//! Lenient conversion of vendor JSON values
//!
//! Pandora Online is inconsistent about value types: numbers arrive as
//! strings, flags as integers, empty strings stand in for missing values.
//! Every converter here takes an optional value (absent key) and returns
//! `None` instead of failing; unconvertible values are logged at warn level.

use serde_json::{Map, Value};
use tracing::warn;

use super::enums::FuelConsumptionType;
use super::flags::BitStatus;

/// Records that can be built from a single JSON value
pub trait FromValue: Sized {
    fn from_value(value: &Value) -> Option<Self>;
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> Option<Self> {
        int(Some(value))
    }
}

/// Truthiness of a JSON value: null, false, zero, and empty containers are false
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// First present value among `keys`
pub fn first<'a>(map: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|key| map.get(*key))
}

pub fn int(value: Option<&Value>) -> Option<i64> {
    let value = value?;
    let converted = match value {
        Value::Null => return None,
        Value::Bool(b) => Some(i64::from(*b)),
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    if converted.is_none() {
        warn!("Could not convert value '{}' to int, returning None", value);
    }
    converted
}

pub fn uint(value: Option<&Value>) -> Option<u64> {
    int(value).and_then(|v| u64::try_from(v).ok())
}

pub fn float(value: Option<&Value>) -> Option<f64> {
    let value = value?;
    let converted = match value {
        Value::Null => return None,
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    if converted.is_none() {
        warn!("Could not convert value '{}' to float, returning None", value);
    }
    converted
}

pub fn boolean(value: Option<&Value>) -> Option<bool> {
    match value? {
        Value::Null => None,
        other => Some(is_truthy(other)),
    }
}

/// Non-empty text; falsy values are absent
pub fn text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        other if is_truthy(other) => Some(other.to_string()),
        _ => None,
    }
}

/// Lock coordinates are transmitted in millionths of a degree
pub fn lock_coordinate(value: Option<&Value>) -> Option<f64> {
    float(value).map(|v| v / 1_000_000.0)
}

pub fn bit_status(value: Option<&Value>) -> Option<BitStatus> {
    int(value).map(|bits| BitStatus::from_bits_retain(bits as u64))
}

pub fn fuel_consumption_type(value: Option<&Value>) -> Option<FuelConsumptionType> {
    int(value).and_then(|code| u8::try_from(code).ok().and_then(FuelConsumptionType::from_code))
}

/// Nested record; falsy values are absent
pub fn object<T: FromValue>(value: Option<&Value>) -> Option<T> {
    value.filter(|v| is_truthy(v)).and_then(T::from_value)
}

/// Sequence of records; entries that fail to convert are dropped
pub fn list<T: FromValue>(value: Option<&Value>) -> Vec<T> {
    match value {
        Some(Value::Array(items)) => items.iter().filter_map(T::from_value).collect(),
        _ => Vec::new(),
    }
}
