//! Result rows.
//!
//! A row is an ordered field-name to value mapping. Column metadata is
//! built once per result set and shared by every row behind an `Arc`, so
//! name lookups cost one hash probe and rows stay cheap to clone into
//! caches.

use crate::error::{Error, Result, TypeError};
use crate::value::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Column metadata shared across all rows of one result set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    names: Vec<String>,
    index: HashMap<String, usize>,
}

impl ColumnInfo {
    pub fn new(names: Vec<String>) -> Arc<Self> {
        let index = names
            .iter()
            .enumerate()
            .map(|(i, n)| (n.clone(), i))
            .collect();
        Arc::new(Self { names, index })
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }
}

/// One result row: values in SELECT column order.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<ColumnInfo>,
    values: Vec<Value>,
}

impl Row {
    pub fn new(columns: Arc<ColumnInfo>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }

    pub fn columns(&self) -> &Arc<ColumnInfo> {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    pub fn get_named(&self, name: &str) -> Option<&Value> {
        self.columns.position(name).and_then(|i| self.get(i))
    }

    /// Typed access by column index.
    pub fn get_as<T: FromValue>(&self, index: usize) -> Result<T> {
        let value = self.get(index).ok_or_else(|| {
            Error::from(TypeError {
                expected: "column",
                actual: format!("index {} out of range", index),
                column: None,
            })
        })?;
        T::from_value(value)
    }

    /// Typed access by column name.
    pub fn get_named_as<T: FromValue>(&self, name: &str) -> Result<T> {
        let value = self.get_named(name).ok_or_else(|| {
            Error::from(TypeError {
                expected: "column",
                actual: format!("no column named {}", name),
                column: Some(name.to_string()),
            })
        })?;
        T::from_value(value).map_err(|e| match e {
            Error::Type(mut t) => {
                t.column = Some(name.to_string());
                Error::Type(t)
            }
            other => other,
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns
            .names()
            .iter()
            .map(String::as_str)
            .zip(self.values.iter())
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

/// Conversion from a SQL value into a Rust type.
pub trait FromValue: Sized {
    fn from_value(value: &Value) -> Result<Self>;
}

fn type_error(expected: &'static str, value: &Value) -> Error {
    Error::from(TypeError {
        expected,
        actual: value.type_name().to_string(),
        column: None,
    })
}

impl FromValue for Value {
    fn from_value(value: &Value) -> Result<Self> {
        Ok(value.clone())
    }
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> Result<Self> {
        value.as_i64().ok_or_else(|| type_error("int", value))
    }
}

impl FromValue for i32 {
    fn from_value(value: &Value) -> Result<Self> {
        let wide = i64::from_value(value)?;
        i32::try_from(wide).map_err(|_| type_error("int32", value))
    }
}

impl FromValue for u64 {
    fn from_value(value: &Value) -> Result<Self> {
        let wide = i64::from_value(value)?;
        u64::try_from(wide).map_err(|_| type_error("uint", value))
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> Result<Self> {
        value.as_f64().ok_or_else(|| type_error("float", value))
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Result<Self> {
        value.as_bool().ok_or_else(|| type_error("bool", value))
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Text(s) => Ok(s.clone()),
            Value::Int(i) => Ok(i.to_string()),
            Value::Float(f) => Ok(f.to_string()),
            Value::Bool(b) => Ok(i64::from(*b).to_string()),
            _ => Err(type_error("text", value)),
        }
    }
}

impl FromValue for Vec<u8> {
    fn from_value(value: &Value) -> Result<Self> {
        value
            .as_bytes()
            .map(<[u8]>::to_vec)
            .ok_or_else(|| type_error("bytes", value))
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> Result<Self> {
        if value.is_null() {
            Ok(None)
        } else {
            T::from_value(value).map(Some)
        }
    }
}

/// Mapping a whole row into a typed record.
///
/// The explicit per-field mapping replaces runtime introspection: each
/// implementor names its own columns and the narrowing conversions run
/// through `FromValue`.
///
/// ```
/// use taudb_core::{ColumnInfo, FromRow, Result, Row, Value};
///
/// struct User {
///     id: i64,
///     name: String,
/// }
///
/// impl FromRow for User {
///     fn from_row(row: &Row) -> Result<Self> {
///         Ok(User {
///             id: row.get_named_as("id")?,
///             name: row.get_named_as("name")?,
///         })
///     }
/// }
///
/// let cols = ColumnInfo::new(vec!["id".into(), "name".into()]);
/// let row = Row::new(cols, vec![Value::Int(1), Value::Text("ada".into())]);
/// let user = User::from_row(&row).unwrap();
/// assert_eq!(user.id, 1);
/// ```
pub trait FromRow: Sized {
    /// Table this type maps to, when it declares one. Lets typed query
    /// terminals supply the table name when the builder has none.
    const TABLE: Option<&'static str> = None;

    fn from_row(row: &Row) -> Result<Self>;
}

impl FromRow for Row {
    fn from_row(row: &Row) -> Result<Self> {
        Ok(row.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_row() -> Row {
        let cols = ColumnInfo::new(vec!["id".into(), "name".into(), "score".into()]);
        Row::new(
            cols,
            vec![
                Value::Int(7),
                Value::Text("ada".into()),
                Value::Float(9.5),
            ],
        )
    }

    #[test]
    fn access_by_index_and_name() {
        let row = sample_row();
        assert_eq!(row.get(0), Some(&Value::Int(7)));
        assert_eq!(row.get_named("name"), Some(&Value::Text("ada".into())));
        assert_eq!(row.get_named("missing"), None);
    }

    #[test]
    fn typed_access() {
        let row = sample_row();
        let id: i64 = row.get_named_as("id").unwrap();
        assert_eq!(id, 7);
        let score: f64 = row.get_named_as("score").unwrap();
        assert!((score - 9.5).abs() < f64::EPSILON);
        let opt: Option<String> = row.get_named_as("name").unwrap();
        assert_eq!(opt.as_deref(), Some("ada"));
    }

    #[test]
    fn type_error_names_column() {
        let row = sample_row();
        let err = row.get_named_as::<Vec<u8>>("score").unwrap_err();
        let Error::Type(t) = err else {
            panic!("expected type error");
        };
        assert_eq!(t.column.as_deref(), Some("score"));
    }

    #[test]
    fn iteration_preserves_column_order() {
        let row = sample_row();
        let names: Vec<&str> = row.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["id", "name", "score"]);
    }

    #[test]
    fn null_to_option() {
        let cols = ColumnInfo::new(vec!["x".into()]);
        let row = Row::new(cols, vec![Value::Null]);
        let x: Option<i64> = row.get_named_as("x").unwrap();
        assert_eq!(x, None);
    }
}
