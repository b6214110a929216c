//! Row mapping
//!
//! Rows are decoded into typed records through a `serde` deserializer that
//! walks the row's columns, translating column names into field names via the
//! record's [`Schema`] when there is one. The reverse direction serializes a
//! record and picks the schema's mapped columns out of it.
//!
//! Storage types are coerced the way SQL drivers usually store them:
//! booleans accept integer storage, strings accept numeric storage, and a
//! NULL maps to `None` (or the zero value for non-optional fields).

use super::error::{DatabaseError, Result};
use super::schema::{Model, Schema};
use super::value::{DatabaseRow, DatabaseValue};
use serde::de::{
    DeserializeOwned, DeserializeSeed, Deserializer, IntoDeserializer, MapAccess, Visitor,
};
use serde::forward_to_deserialize_any;
use serde_json::{Map, Value};

/// Decode a row into any deserializable type, matching columns to field
/// names directly.
///
/// Single-column rows can also be decoded into scalars
/// (`scan_row::<i64>(&row)`).
pub fn scan_row<T: DeserializeOwned>(row: &DatabaseRow) -> Result<T> {
    T::deserialize(RowDeserializer { row, schema: None })
}

/// Decode a row into a record, translating columns through its schema
pub fn scan_model_row<M: Model>(row: &DatabaseRow) -> Result<M> {
    M::deserialize(RowDeserializer {
        row,
        schema: Some(M::schema()),
    })
}

struct RowDeserializer<'a> {
    row: &'a DatabaseRow,
    schema: Option<&'a Schema>,
}

impl<'a> RowDeserializer<'a> {
    /// The only value of a single-column row
    fn single(&self) -> Option<&'a DatabaseValue> {
        if self.row.len() == 1 {
            self.row.values().next()
        } else {
            None
        }
    }
}

macro_rules! row_scalar {
    ($($method:ident),*) => {
        $(
            fn $method<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
                match self.single() {
                    Some(value) => ValueDeserializer(value).$method(visitor),
                    None => self.deserialize_any(visitor),
                }
            }
        )*
    };
}

impl<'de, 'a> Deserializer<'de> for RowDeserializer<'a> {
    type Error = DatabaseError;

    fn deserialize_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        visitor.visit_map(RowMapAccess {
            entries: self.row.iter(),
            schema: self.schema,
            pending: None,
        })
    }

    row_scalar!(
        deserialize_bool,
        deserialize_i8,
        deserialize_i16,
        deserialize_i32,
        deserialize_i64,
        deserialize_u8,
        deserialize_u16,
        deserialize_u32,
        deserialize_u64,
        deserialize_f32,
        deserialize_f64,
        deserialize_str,
        deserialize_string
    );

    fn deserialize_option<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        match self.single() {
            Some(value) => ValueDeserializer(value).deserialize_option(visitor),
            None => visitor.visit_some(self),
        }
    }

    forward_to_deserialize_any! {
        i128 u128 char bytes byte_buf unit unit_struct newtype_struct seq tuple
        tuple_struct map struct enum identifier ignored_any
    }
}

struct RowMapAccess<'a> {
    entries: std::collections::hash_map::Iter<'a, String, DatabaseValue>,
    schema: Option<&'a Schema>,
    pending: Option<&'a DatabaseValue>,
}

impl<'de, 'a> MapAccess<'de> for RowMapAccess<'a> {
    type Error = DatabaseError;

    fn next_key_seed<K: DeserializeSeed<'de>>(&mut self, seed: K) -> Result<Option<K::Value>> {
        match self.entries.next() {
            Some((column, value)) => {
                self.pending = Some(value);
                let name = self
                    .schema
                    .and_then(|s| s.field_by_column(column))
                    .map(|f| f.name.clone())
                    .unwrap_or_else(|| column.clone());
                seed.deserialize(name.into_deserializer()).map(Some)
            }
            None => Ok(None),
        }
    }

    fn next_value_seed<V: DeserializeSeed<'de>>(&mut self, seed: V) -> Result<V::Value> {
        match self.pending.take() {
            Some(value) => seed.deserialize(ValueDeserializer(value)),
            None => Err(DatabaseError::mapping("value requested before key")),
        }
    }

    fn size_hint(&self) -> Option<usize> {
        Some(self.entries.len())
    }
}

/// Deserializer over one column value
struct ValueDeserializer<'a>(&'a DatabaseValue);

impl<'a> ValueDeserializer<'a> {
    fn integer(&self) -> Result<i64> {
        match self.0 {
            DatabaseValue::Null => Ok(0),
            DatabaseValue::Double(v) if v.fract() == 0.0 => Ok(*v as i64),
            DatabaseValue::Float(v) if v.fract() == 0.0 => Ok(*v as i64),
            other => other
                .as_long()
                .ok_or_else(|| DatabaseError::type_mismatch("integer", other.type_name())),
        }
    }

    fn float(&self) -> Result<f64> {
        match self.0 {
            DatabaseValue::Null => Ok(0.0),
            other => other
                .as_double()
                .ok_or_else(|| DatabaseError::type_mismatch("float", other.type_name())),
        }
    }

    /// Nested sequences and maps are stored as JSON text
    fn json(&self) -> Result<Value> {
        match self.0 {
            DatabaseValue::String(s) => Ok(serde_json::from_str(s)?),
            DatabaseValue::Bytes(b) => Ok(serde_json::from_slice(b)?),
            DatabaseValue::Null => Ok(Value::Null),
            other => Ok(other.to_json()),
        }
    }
}

macro_rules! value_integer {
    ($($method:ident),*) => {
        $(
            fn $method<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
                visitor.visit_i64(self.integer()?)
            }
        )*
    };
}

impl<'de, 'a> Deserializer<'de> for ValueDeserializer<'a> {
    type Error = DatabaseError;

    fn deserialize_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        match self.0 {
            DatabaseValue::Null => visitor.visit_unit(),
            DatabaseValue::Bool(v) => visitor.visit_bool(*v),
            DatabaseValue::Int(v) => visitor.visit_i32(*v),
            DatabaseValue::Long(v) => visitor.visit_i64(*v),
            DatabaseValue::Float(v) => visitor.visit_f32(*v),
            DatabaseValue::Double(v) => visitor.visit_f64(*v),
            DatabaseValue::String(s) => visitor.visit_str(s),
            DatabaseValue::Bytes(b) => visitor.visit_bytes(b),
            DatabaseValue::Timestamp(v) => visitor.visit_i64(*v),
        }
    }

    fn deserialize_bool<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        match self.0 {
            DatabaseValue::Null => visitor.visit_bool(false),
            other => match other.as_bool() {
                Some(v) => visitor.visit_bool(v),
                None => Err(DatabaseError::type_mismatch("bool", other.type_name())),
            },
        }
    }

    value_integer!(
        deserialize_i8,
        deserialize_i16,
        deserialize_i32,
        deserialize_i64,
        deserialize_u8,
        deserialize_u16,
        deserialize_u32,
        deserialize_u64
    );

    fn deserialize_f32<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        visitor.visit_f64(self.float()?)
    }

    fn deserialize_f64<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        visitor.visit_f64(self.float()?)
    }

    fn deserialize_str<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        match self.0 {
            DatabaseValue::Null => visitor.visit_str(""),
            DatabaseValue::String(s) => visitor.visit_str(s),
            DatabaseValue::Bytes(b) => match std::str::from_utf8(b) {
                Ok(s) => visitor.visit_str(s),
                Err(_) => visitor.visit_bytes(b),
            },
            DatabaseValue::Timestamp(_) => match self.0.to_json() {
                Value::String(s) => visitor.visit_string(s),
                _ => visitor.visit_string(self.0.as_string()),
            },
            other => visitor.visit_string(other.as_string()),
        }
    }

    fn deserialize_string<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        self.deserialize_str(visitor)
    }

    fn deserialize_char<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        self.deserialize_str(visitor)
    }

    fn deserialize_bytes<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        match self.0 {
            DatabaseValue::Bytes(b) => visitor.visit_bytes(b),
            DatabaseValue::String(s) => visitor.visit_bytes(s.as_bytes()),
            DatabaseValue::Null => visitor.visit_bytes(&[]),
            other => Err(DatabaseError::type_mismatch("bytes", other.type_name())),
        }
    }

    fn deserialize_byte_buf<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        self.deserialize_bytes(visitor)
    }

    fn deserialize_option<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        match self.0 {
            DatabaseValue::Null => visitor.visit_none(),
            _ => visitor.visit_some(self),
        }
    }

    fn deserialize_newtype_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value> {
        visitor.visit_newtype_struct(self)
    }

    fn deserialize_enum<V: Visitor<'de>>(
        self,
        name: &'static str,
        variants: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value> {
        match self.0 {
            DatabaseValue::String(s) => visitor.visit_enum(s.as_str().into_deserializer()),
            _ => self
                .json()?
                .deserialize_enum(name, variants, visitor)
                .map_err(DatabaseError::from),
        }
    }

    fn deserialize_seq<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        self.json()?
            .deserialize_seq(visitor)
            .map_err(DatabaseError::from)
    }

    fn deserialize_map<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        self.json()?
            .deserialize_map(visitor)
            .map_err(DatabaseError::from)
    }

    fn deserialize_struct<V: Visitor<'de>>(
        self,
        name: &'static str,
        fields: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value> {
        self.json()?
            .deserialize_struct(name, fields, visitor)
            .map_err(DatabaseError::from)
    }

    forward_to_deserialize_any! {
        i128 u128 unit unit_struct tuple tuple_struct identifier ignored_any
    }
}

/// Serialize a record into its field map
pub(crate) fn record_of<T: serde::Serialize>(record: &T) -> Result<Map<String, Value>> {
    match serde_json::to_value(record)? {
        Value::Object(map) => Ok(map),
        other => Err(DatabaseError::mapping(format!(
            "record serialized to {} instead of a map",
            match other {
                Value::Array(_) => "an array",
                _ => "a scalar",
            }
        ))),
    }
}

/// Rebuild a record from its (possibly modified) field map
pub(crate) fn write_back<M: Model>(record: Map<String, Value>, target: &mut M) -> Result<()> {
    *target = serde_json::from_value(Value::Object(record))?;
    Ok(())
}

/// Mapped `(column, value)` pairs of a serialized record, in schema order
pub(crate) fn column_values(
    schema: &Schema,
    record: &Map<String, Value>,
) -> Vec<(String, DatabaseValue)> {
    schema
        .fields()
        .iter()
        .map(|f| {
            let value = record
                .get(&f.name)
                .map(DatabaseValue::from_json)
                .unwrap_or(DatabaseValue::Null);
            (f.column.clone(), value)
        })
        .collect()
}

/// Value of one mapped column of a record
pub(crate) fn column_value<M: Model>(record: &M, column: &str) -> Result<DatabaseValue> {
    let schema = M::schema();
    let field = schema.field_by_column(column).ok_or_else(|| {
        DatabaseError::validation(format!("{} has no column {}", schema.table(), column))
    })?;
    let map = record_of(record)?;
    Ok(map
        .get(&field.name)
        .map(DatabaseValue::from_json)
        .unwrap_or(DatabaseValue::Null))
}

/// Overwrite one mapped column of a record
pub(crate) fn set_column<M: Model>(record: &mut M, column: &str, value: &DatabaseValue) -> Result<()> {
    let schema = M::schema();
    let field = schema.field_by_column(column).ok_or_else(|| {
        DatabaseError::validation(format!("{} has no column {}", schema.table(), column))
    })?;
    let mut map = record_of(&*record)?;
    // A removed field falls back to its serde default: `None` or the zero value
    if value.is_null() {
        map.remove(&field.name);
    } else {
        map.insert(field.name.clone(), value.to_json());
    }
    write_back(map, record)
}

/// Zero check on a serialized field: null, `false`, `0`, `""`, an empty
/// collection, or the Unix epoch of a defaulted timestamp
pub(crate) fn is_zero_json(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(v) => !*v,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty() || s.starts_with("1970-01-01T00:00:00"),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
    }
}
