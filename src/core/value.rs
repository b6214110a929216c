//! Database value types
//!
//! This module defines the types that can be stored and retrieved from databases,
//! and the conversions between them and the JSON form records are serialized into.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Database value that can hold different types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DatabaseValue {
    /// Null value
    Null,
    /// Boolean value
    Bool(bool),
    /// 32-bit integer
    Int(i32),
    /// 64-bit integer
    Long(i64),
    /// 32-bit floating point
    Float(f32),
    /// 64-bit floating point
    Double(f64),
    /// String value
    String(String),
    /// Binary data
    Bytes(Vec<u8>),
    /// Timestamp (Unix timestamp in microseconds)
    Timestamp(i64),
}

impl DatabaseValue {
    /// Current time in the text form auto-managed timestamp columns use
    pub fn now() -> Self {
        DatabaseValue::from(Utc::now())
    }

    /// Get the value as a boolean
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            DatabaseValue::Bool(v) => Some(*v),
            DatabaseValue::Int(v) => Some(*v != 0),
            DatabaseValue::Long(v) => Some(*v != 0),
            DatabaseValue::String(s) => match s.to_lowercase().as_str() {
                "true" | "1" | "yes" => Some(true),
                "false" | "0" | "no" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    /// Get the value as an i32
    pub fn as_int(&self) -> Option<i32> {
        match self {
            DatabaseValue::Int(v) => Some(*v),
            DatabaseValue::Long(v) => i32::try_from(*v).ok(),
            DatabaseValue::String(s) => s.parse().ok(),
            DatabaseValue::Bool(v) => Some(*v as i32),
            _ => None,
        }
    }

    /// Get the value as an i64
    pub fn as_long(&self) -> Option<i64> {
        match self {
            DatabaseValue::Long(v) => Some(*v),
            DatabaseValue::Int(v) => Some(*v as i64),
            DatabaseValue::String(s) => s.parse().ok(),
            DatabaseValue::Bool(v) => Some(*v as i64),
            DatabaseValue::Timestamp(v) => Some(*v),
            _ => None,
        }
    }

    /// Get the value as an f64
    pub fn as_double(&self) -> Option<f64> {
        match self {
            DatabaseValue::Double(v) => Some(*v),
            DatabaseValue::Float(v) => Some(*v as f64),
            DatabaseValue::Int(v) => Some(*v as f64),
            DatabaseValue::Long(v) => Some(*v as f64),
            DatabaseValue::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Get the value as a string (zero-copy for String values)
    pub fn as_str(&self) -> Option<&str> {
        match self {
            DatabaseValue::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Get the value as a string (with conversion)
    pub fn as_string(&self) -> String {
        match self {
            DatabaseValue::Null => "null".to_string(),
            DatabaseValue::Bool(v) => v.to_string(),
            DatabaseValue::Int(v) => v.to_string(),
            DatabaseValue::Long(v) => v.to_string(),
            DatabaseValue::Float(v) => v.to_string(),
            DatabaseValue::Double(v) => v.to_string(),
            DatabaseValue::String(s) => s.clone(),
            DatabaseValue::Bytes(b) => format!("<{} bytes>", b.len()),
            DatabaseValue::Timestamp(v) => v.to_string(),
        }
    }

    /// Get the value as bytes (zero-copy)
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            DatabaseValue::Bytes(b) => Some(b),
            DatabaseValue::String(s) => Some(s.as_bytes()),
            _ => None,
        }
    }

    /// Check if the value is null
    pub fn is_null(&self) -> bool {
        matches!(self, DatabaseValue::Null)
    }

    /// Zero value check: null, `false`, `0`, `""` and empty bytes
    pub fn is_zero(&self) -> bool {
        match self {
            DatabaseValue::Null => true,
            DatabaseValue::Bool(v) => !*v,
            DatabaseValue::Int(v) => *v == 0,
            DatabaseValue::Long(v) | DatabaseValue::Timestamp(v) => *v == 0,
            DatabaseValue::Float(v) => *v == 0.0,
            DatabaseValue::Double(v) => *v == 0.0,
            DatabaseValue::String(s) => s.is_empty(),
            DatabaseValue::Bytes(b) => b.is_empty(),
        }
    }

    /// Normalized key used to match foreign keys against referenced keys.
    ///
    /// Integers of any width and their decimal text form produce the same key,
    /// so a TEXT foreign key can still be stitched to an INTEGER primary key.
    /// Null has no key.
    pub fn key(&self) -> Option<String> {
        match self {
            DatabaseValue::Null => None,
            DatabaseValue::Bool(v) => Some(if *v { "1" } else { "0" }.to_string()),
            DatabaseValue::Int(v) => Some(v.to_string()),
            DatabaseValue::Long(v) | DatabaseValue::Timestamp(v) => Some(v.to_string()),
            DatabaseValue::Float(v) if v.fract() == 0.0 => Some((*v as i64).to_string()),
            DatabaseValue::Double(v) if v.fract() == 0.0 => Some((*v as i64).to_string()),
            DatabaseValue::Float(v) => Some(v.to_string()),
            DatabaseValue::Double(v) => Some(v.to_string()),
            DatabaseValue::String(s) => Some(s.clone()),
            DatabaseValue::Bytes(b) => Some(String::from_utf8_lossy(b).into_owned()),
        }
    }

    /// Get the type name of this value
    pub fn type_name(&self) -> &'static str {
        match self {
            DatabaseValue::Null => "null",
            DatabaseValue::Bool(_) => "bool",
            DatabaseValue::Int(_) => "int",
            DatabaseValue::Long(_) => "long",
            DatabaseValue::Float(_) => "float",
            DatabaseValue::Double(_) => "double",
            DatabaseValue::String(_) => "string",
            DatabaseValue::Bytes(_) => "bytes",
            DatabaseValue::Timestamp(_) => "timestamp",
        }
    }

    /// Convert a serialized record field into a column value.
    ///
    /// Nested arrays and objects are stored as their JSON text.
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => DatabaseValue::Null,
            serde_json::Value::Bool(v) => DatabaseValue::Bool(*v),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(v) => DatabaseValue::Long(v),
                None => DatabaseValue::Double(n.as_f64().unwrap_or_default()),
            },
            serde_json::Value::String(s) => DatabaseValue::String(s.clone()),
            other => DatabaseValue::String(other.to_string()),
        }
    }

    /// Convert a column value into the JSON form used for record write-back
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            DatabaseValue::Null => serde_json::Value::Null,
            DatabaseValue::Bool(v) => serde_json::Value::Bool(*v),
            DatabaseValue::Int(v) => serde_json::Value::from(*v),
            DatabaseValue::Long(v) => serde_json::Value::from(*v),
            DatabaseValue::Float(v) => serde_json::Value::from(*v),
            DatabaseValue::Double(v) => serde_json::Value::from(*v),
            DatabaseValue::String(s) => serde_json::Value::String(s.clone()),
            DatabaseValue::Bytes(b) => serde_json::Value::from(b.clone()),
            DatabaseValue::Timestamp(v) => match DateTime::<Utc>::from_timestamp_micros(*v) {
                Some(ts) => serde_json::Value::String(format_timestamp(&ts)),
                None => serde_json::Value::from(*v),
            },
        }
    }
}

/// Fixed-width RFC 3339 text, so stored timestamps sort lexicographically
pub(crate) fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

impl From<bool> for DatabaseValue {
    fn from(v: bool) -> Self {
        DatabaseValue::Bool(v)
    }
}

impl From<i32> for DatabaseValue {
    fn from(v: i32) -> Self {
        DatabaseValue::Int(v)
    }
}

impl From<i64> for DatabaseValue {
    fn from(v: i64) -> Self {
        DatabaseValue::Long(v)
    }
}

impl From<f32> for DatabaseValue {
    fn from(v: f32) -> Self {
        DatabaseValue::Float(v)
    }
}

impl From<f64> for DatabaseValue {
    fn from(v: f64) -> Self {
        DatabaseValue::Double(v)
    }
}

impl From<String> for DatabaseValue {
    fn from(v: String) -> Self {
        DatabaseValue::String(v)
    }
}

impl From<&str> for DatabaseValue {
    fn from(v: &str) -> Self {
        DatabaseValue::String(v.to_string())
    }
}

impl From<Vec<u8>> for DatabaseValue {
    fn from(v: Vec<u8>) -> Self {
        DatabaseValue::Bytes(v)
    }
}

impl From<DateTime<Utc>> for DatabaseValue {
    fn from(v: DateTime<Utc>) -> Self {
        DatabaseValue::String(format_timestamp(&v))
    }
}

impl<T: Into<DatabaseValue>> From<Option<T>> for DatabaseValue {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(val) => val.into(),
            None => DatabaseValue::Null,
        }
    }
}

/// A row of database results (column name -> value mapping)
pub type DatabaseRow = HashMap<String, DatabaseValue>;

/// Multiple rows returned from a query
pub type DatabaseResult = Vec<DatabaseRow>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_conversions() {
        let val = DatabaseValue::Int(42);
        assert_eq!(val.as_int(), Some(42));
        assert_eq!(val.as_long(), Some(42));
        assert_eq!(val.as_string(), "42");

        let val = DatabaseValue::String("123".to_string());
        assert_eq!(val.as_int(), Some(123));
        assert_eq!(val.as_long(), Some(123));

        let val = DatabaseValue::Long(1);
        assert_eq!(val.as_bool(), Some(true));
    }

    #[test]
    fn test_value_from_types() {
        let val: DatabaseValue = Some(42).into();
        assert_eq!(val, DatabaseValue::Int(42));

        let val: DatabaseValue = Option::<i32>::None.into();
        assert_eq!(val, DatabaseValue::Null);

        let ts = DateTime::<Utc>::from_timestamp(0, 0).unwrap();
        let val: DatabaseValue = ts.into();
        assert_eq!(val.as_str(), Some("1970-01-01T00:00:00.000000Z"));
    }

    #[test]
    fn test_zero_values() {
        assert!(DatabaseValue::Null.is_zero());
        assert!(DatabaseValue::from("").is_zero());
        assert!(DatabaseValue::Long(0).is_zero());
        assert!(DatabaseValue::Bool(false).is_zero());
        assert!(!DatabaseValue::from("User 10").is_zero());
        assert!(!DatabaseValue::Int(-1).is_zero());
    }

    #[test]
    fn test_keys_normalize_integer_forms() {
        assert_eq!(DatabaseValue::Int(5).key(), DatabaseValue::Long(5).key());
        assert_eq!(DatabaseValue::Long(5).key(), DatabaseValue::from("5").key());
        assert_eq!(DatabaseValue::Double(5.0).key().as_deref(), Some("5"));
        assert_eq!(DatabaseValue::Null.key(), None);
    }

    #[test]
    fn test_json_round_trip_of_record_fields() {
        let json = serde_json::json!({"id": 7, "price": 2.5, "name": "x", "tags": ["a"]});
        let obj = json.as_object().unwrap();

        assert_eq!(DatabaseValue::from_json(&obj["id"]), DatabaseValue::Long(7));
        assert_eq!(
            DatabaseValue::from_json(&obj["price"]),
            DatabaseValue::Double(2.5)
        );
        assert_eq!(
            DatabaseValue::from_json(&obj["tags"]),
            DatabaseValue::from(r#"["a"]"#)
        );
        assert_eq!(DatabaseValue::Long(7).to_json(), obj["id"]);
    }
}
