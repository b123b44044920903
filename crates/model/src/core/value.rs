use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A scalar carried as a bind parameter or read back from a result column.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Value {
    Int(i64),
    Uint(u64),
    Float(f64),
    String(String),
    Boolean(bool),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
    Null,
}

impl Value {
    /// Converts a JSON scalar into a `Value`. Arrays and objects have no
    /// scalar representation and yield `None`.
    pub fn from_json_scalar(json: &serde_json::Value) -> Option<Self> {
        match json {
            serde_json::Value::Null => Some(Value::Null),
            serde_json::Value::Bool(b) => Some(Value::Boolean(*b)),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Some(Value::Int(i))
                } else if let Some(u) = n.as_u64() {
                    Some(Value::Uint(u))
                } else {
                    n.as_f64().map(Value::Float)
                }
            }
            serde_json::Value::String(s) => Some(Value::String(s.clone())),
            serde_json::Value::Array(_) | serde_json::Value::Object(_) => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Int(v) => serde_json::Value::from(*v),
            Value::Uint(v) => serde_json::Value::from(*v),
            Value::Float(v) => serde_json::Number::from_f64(*v)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(v) => serde_json::Value::String(v.clone()),
            Value::Boolean(v) => serde_json::Value::Bool(*v),
            Value::Bytes(v) => serde_json::Value::String(String::from_utf8_lossy(v).into_owned()),
            Value::Date(v) => serde_json::Value::String(v.format("%Y-%m-%d").to_string()),
            Value::Timestamp(v) => {
                serde_json::Value::String(v.format("%Y-%m-%d %H:%M:%S").to_string())
            }
            Value::Null => serde_json::Value::Null,
        }
    }

    pub fn as_string(&self) -> Option<String> {
        match self {
            Value::Int(v) => Some(v.to_string()),
            Value::Uint(v) => Some(v.to_string()),
            Value::Float(v) => Some(v.to_string()),
            Value::String(v) => Some(v.clone()),
            Value::Boolean(v) => Some(v.to_string()),
            Value::Bytes(v) => String::from_utf8(v.clone()).ok(),
            Value::Date(v) => Some(v.format("%Y-%m-%d").to_string()),
            Value::Timestamp(v) => Some(v.format("%Y-%m-%d %H:%M:%S").to_string()),
            Value::Null => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Uint(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            Value::String(v) => v.trim().parse::<f64>().ok(),
            Value::Boolean(v) => Some(if *v { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    /// Interprets the value as a numeric literal, if it is one.
    ///
    /// Strings that parse as integers become `Int`, other numeric strings
    /// become `Float`. Non-numeric values yield `None`.
    pub fn as_numeric(&self) -> Option<Value> {
        match self {
            Value::Int(_) | Value::Uint(_) | Value::Float(_) => Some(self.clone()),
            Value::String(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    return None;
                }
                if let Ok(i) = trimmed.parse::<i64>() {
                    return Some(Value::Int(i));
                }
                trimmed
                    .parse::<f64>()
                    .ok()
                    .filter(|f| f.is_finite())
                    .map(Value::Float)
            }
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Key used when grouping rows by item id.
    pub fn identity_key(&self) -> Option<String> {
        match self {
            Value::Null => None,
            other => other.as_string(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            other => write!(f, "{}", other.as_string().unwrap_or_default()),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value as i64)
    }
}

impl From<u64> for Value {
    fn from(value: u64) -> Self {
        Value::Uint(value)
    }
}
