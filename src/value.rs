//! The dynamically typed runtime value every operator reads and produces.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// Canonical runtime value. Object key order is not semantically
/// meaningful (spec §3) but `BTreeMap` gives deterministic iteration,
/// which keeps Format's "sorted headers" output reproducible for free.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<Value>),
    Object(BTreeMap<String, Value>),
    Timestamp(DateTime<Utc>),
}

impl Value {
    pub fn object(pairs: impl IntoIterator<Item = (String, Value)>) -> Self {
        Value::Object(pairs.into_iter().collect())
    }

    pub fn array(items: impl IntoIterator<Item = Value>) -> Self {
        Value::Array(items.into_iter().collect())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_array_mut(&mut self) -> Option<&mut Vec<Value>> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn get_field(&self, key: &str) -> Option<&Value> {
        self.as_object().and_then(|o| o.get(key))
    }

    /// Truthiness used where the expression engine needs a boolean out of
    /// an arbitrary value (e.g. a non-boolean ternary condition).
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::String(s) => !s.is_empty(),
            Value::Array(a) => !a.is_empty(),
            Value::Object(o) => !o.is_empty(),
            Value::Timestamp(_) => true,
        }
    }

    /// Stringify for display, CSV/TSV cell emission, and dedupe keys.
    pub fn stringify(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => format_number(*n),
            Value::String(s) => s.clone(),
            Value::Timestamp(t) => t.to_rfc3339(),
            Value::Array(_) | Value::Object(_) => {
                serde_json::to_string(&self.to_json()).unwrap_or_default()
            }
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Timestamp(t) => serde_json::Value::String(t.to_rfc3339()),
            Value::Array(a) => serde_json::Value::Array(a.iter().map(Value::to_json).collect()),
            Value::Object(o) => serde_json::Value::Object(
                o.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }

    pub fn from_json(v: &serde_json::Value) -> Value {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::String(s.clone()),
            serde_json::Value::Array(a) => Value::Array(a.iter().map(Value::from_json).collect()),
            serde_json::Value::Object(o) => Value::Object(
                o.iter().map(|(k, v)| (k.clone(), Value::from_json(v))).collect(),
            ),
        }
    }

    /// Ordering used by Sort: nulls first, then numbers, then strings,
    /// then booleans (false < true), then stringified fallback.
    pub fn compare(&self, other: &Value) -> Ordering {
        use Value::*;
        match (self, other) {
            (Null, Null) => Ordering::Equal,
            (Null, _) => Ordering::Less,
            (_, Null) => Ordering::Greater,
            (Number(a), Number(b)) => a.partial_cmp(b).unwrap_or(Ordering::Equal),
            (String(a), String(b)) => a.cmp(b),
            (Bool(a), Bool(b)) => a.cmp(b),
            _ => self.stringify().cmp(&other.stringify()),
        }
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.is_finite() && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        use Value::*;
        match (self, other) {
            (Null, Null) => true,
            (Bool(a), Bool(b)) => a == b,
            (Number(a), Number(b)) => a == b,
            (String(a), String(b)) => a == b,
            (Array(a), Array(b)) => a == b,
            (Object(a), Object(b)) => a == b,
            (Timestamp(a), Timestamp(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.stringify())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

/// Declared type tag used by typed-value conversion (§4.9) and by
/// ContextConstant/ContextVariable's `context_values[].type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclaredType {
    String,
    Number,
    Boolean,
    TimeString,
    EpochSecond,
    EpochMs,
    Null,
}

impl DeclaredType {
    pub fn parse(tag: &str) -> EngineResult<Self> {
        match tag {
            "string" => Ok(Self::String),
            "number" => Ok(Self::Number),
            "boolean" => Ok(Self::Boolean),
            "time_string" => Ok(Self::TimeString),
            "epoch_second" => Ok(Self::EpochSecond),
            "epoch_ms" => Ok(Self::EpochMs),
            "null" => Ok(Self::Null),
            other => Err(EngineError::UnsupportedOperation {
                operation: format!("declared type '{other}'"),
            }),
        }
    }
}

/// Coerce `value` into the shape implied by `declared_type` (§4.9).
pub fn coerce(value: &Value, declared_type: DeclaredType) -> EngineResult<Value> {
    match declared_type {
        DeclaredType::String => Ok(Value::String(value.stringify())),
        DeclaredType::Number => match value {
            Value::Number(n) => Ok(Value::Number(*n)),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .map(Value::Number)
                .map_err(|_| EngineError::invalid_input(format!("cannot coerce '{s}' to number"))),
            Value::Bool(b) => Ok(Value::Number(if *b { 1.0 } else { 0.0 })),
            other => Err(EngineError::type_mismatch("number", type_name(other))),
        },
        DeclaredType::Boolean => match value {
            Value::Bool(b) => Ok(Value::Bool(*b)),
            Value::String(s) => match s.to_ascii_lowercase().as_str() {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                _ => Err(EngineError::invalid_input(format!("cannot coerce '{s}' to boolean"))),
            },
            Value::Number(n) => Ok(Value::Bool(*n != 0.0)),
            other => Err(EngineError::type_mismatch("boolean", type_name(other))),
        },
        DeclaredType::TimeString => match value {
            Value::String(s) => {
                DateTime::parse_from_rfc3339(s)
                    .map(|dt| Value::String(dt.with_timezone(&Utc).to_rfc3339()))
                    .map_err(|e| EngineError::invalid_input(format!("invalid RFC3339 string: {e}")))
            }
            Value::Timestamp(t) => Ok(Value::String(t.to_rfc3339())),
            other => Err(EngineError::type_mismatch("time_string", type_name(other))),
        },
        DeclaredType::EpochSecond => {
            let secs = as_epoch_i64(value)?;
            DateTime::from_timestamp(secs, 0)
                .map(Value::Timestamp)
                .ok_or_else(|| EngineError::invalid_input("epoch_second out of range"))
        }
        DeclaredType::EpochMs => {
            let ms = as_epoch_i64(value)?;
            DateTime::from_timestamp_millis(ms)
                .map(Value::Timestamp)
                .ok_or_else(|| EngineError::invalid_input("epoch_ms out of range"))
        }
        DeclaredType::Null => Ok(Value::Null),
    }
}

fn as_epoch_i64(value: &Value) -> EngineResult<i64> {
    match value {
        Value::Number(n) => Ok(*n as i64),
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| EngineError::invalid_input(format!("cannot parse epoch value '{s}'"))),
        other => Err(EngineError::type_mismatch("epoch integer", type_name(other))),
    }
}

pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
        Value::Timestamp(_) => "timestamp",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_equality_is_float_equality() {
        assert_eq!(Value::Number(1.0), Value::Number(1.0));
        assert_ne!(Value::Number(1.0), Value::Number(1.0000001));
    }

    #[test]
    fn coerce_string_to_number() {
        let v = coerce(&Value::String("42".into()), DeclaredType::Number).unwrap();
        assert_eq!(v, Value::Number(42.0));
    }

    #[test]
    fn coerce_epoch_second() {
        let v = coerce(&Value::Number(0.0), DeclaredType::EpochSecond).unwrap();
        assert!(matches!(v, Value::Timestamp(_)));
    }

    #[test]
    fn sort_order_nulls_first() {
        assert_eq!(Value::Null.compare(&Value::Number(1.0)), Ordering::Less);
        assert_eq!(Value::Bool(false).compare(&Value::Bool(true)), Ordering::Less);
    }
}
