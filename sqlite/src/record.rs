//! Schema-derived record shapes and the records built on them.
//!
//! Instead of a generated struct per table, every table gets a
//! [`RecordShape`]: the ordered field table (name, primitive type,
//! nullability) derived from its columns. A [`Record`] pairs a shared shape
//! with one [`Value`] per field. Equality is structural: two records are
//! equal when their shapes and values are.
//!
//! # Examples
//!
//! ```
//! use std::sync::Arc;
//! use schemarepo_core::{Column, ColumnType, Table};
//! use schemarepo_sqlite::{Record, RecordShape, Value};
//!
//! let table = Table::new("customers")
//!     .with_column(Column::new("id", ColumnType::Integer).primary_key())
//!     .with_column(Column::new("full_name", ColumnType::Text));
//! let shape = Arc::new(RecordShape::from_table(&table));
//!
//! let record = Record::new(shape).with("full_name", "Ada").unwrap();
//! assert_eq!(record.get("full_name"), Some(&Value::Text("Ada".into())));
//! assert_eq!(record.to_string(), "Id: N/A\nFull Name: Ada");
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use schemarepo_core::{ColumnType, Table};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

use crate::error::{RepoError, Result};
use crate::value::{FromValue, Value};

/// One field of a record shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub column_type: ColumnType,
    pub nullable: bool,
}

/// Ordered field table of a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordShape {
    name: String,
    fields: Vec<Field>,
}

impl RecordShape {
    /// Shape of a table's rows: one field per column, in column order.
    ///
    /// Columns the engine can fill (integer primary keys, columns with a
    /// default) are nullable in the shape so a record can leave them unset.
    pub fn from_table(table: &Table) -> Self {
        let fields = table
            .columns
            .iter()
            .map(|c| Field {
                name: c.name.clone(),
                column_type: c.column_type,
                nullable: c.nullable || c.engine_assigned(),
            })
            .collect();
        Self {
            name: table.name.clone(),
            fields,
        }
    }

    /// Shape inferred from a result set rather than a table.
    pub fn inferred(name: impl Into<String>, fields: Vec<Field>) -> Self {
        Self {
            name: name.into(),
            fields,
        }
    }

    /// Table name, or the label of an inferred shape.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn position(&self, field: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == field)
    }

    pub fn field(&self, field: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == field)
    }
}

/// One row of a table (or of a custom query result).
///
/// Records are plain values: they hold no connection and can be cloned and
/// compared freely.
#[derive(Debug, Clone)]
pub struct Record {
    shape: Arc<RecordShape>,
    values: Vec<Value>,
}

impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        (Arc::ptr_eq(&self.shape, &other.shape) || self.shape == other.shape)
            && self.values == other.values
    }
}

impl Record {
    /// Record with every field unset (`NULL`).
    pub fn new(shape: Arc<RecordShape>) -> Self {
        let values = vec![Value::Null; shape.len()];
        Self { shape, values }
    }

    /// Builds a record from values in field order.
    ///
    /// Values are stored as given; no type checks are applied.
    ///
    /// # Errors
    ///
    /// Returns [`RepoError::RecordError`] if the value count does not match
    /// the shape.
    pub fn from_values(shape: Arc<RecordShape>, values: Vec<Value>) -> Result<Self> {
        if values.len() != shape.len() {
            return Err(RepoError::RecordError(format!(
                "{} expects {} values, got {}",
                shape.name(),
                shape.len(),
                values.len()
            )));
        }
        Ok(Self { shape, values })
    }

    /// Sets a field and returns the record, for chained construction.
    ///
    /// # Errors
    ///
    /// See [`Record::set`].
    pub fn with(mut self, field: &str, value: impl Into<Value>) -> Result<Self> {
        self.set(field, value)?;
        Ok(self)
    }

    /// Sets a field.
    ///
    /// The value is adapted to the field's type where that is lossless (see
    /// [`Value::coerce`]).
    ///
    /// # Errors
    ///
    /// Returns [`RepoError::FilterError`] for an unknown field and
    /// [`RepoError::RecordError`] when the value does not fit the field.
    pub fn set(&mut self, field: &str, value: impl Into<Value>) -> Result<()> {
        let position = self.position(field)?;
        let expected = &self.shape.fields[position];
        let value = value.into();
        let found = value.column_type();

        let Some(value) = value.coerce(expected.column_type) else {
            return Err(RepoError::RecordError(format!(
                "{}.{} is {:?}, got {:?}",
                self.shape.name(),
                field,
                expected.column_type,
                found
            )));
        };
        self.values[position] = value;
        Ok(())
    }

    fn position(&self, field: &str) -> Result<usize> {
        self.shape
            .position(field)
            .ok_or_else(|| RepoError::FilterError {
                table: self.shape.name().to_string(),
                column: field.to_string(),
            })
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.shape.position(field).map(|i| &self.values[i])
    }

    /// Reads a field as a native type. Use `Option<T>` for nullable fields.
    ///
    /// # Errors
    ///
    /// Returns [`RepoError::FilterError`] for an unknown field and
    /// [`RepoError::RecordError`] when the stored value does not convert.
    pub fn get_as<T: FromValue>(&self, field: &str) -> Result<T> {
        let value = &self.values[self.position(field)?];
        T::from_value(value).ok_or_else(|| {
            RepoError::RecordError(format!(
                "{}.{} holds {:?}, which does not convert to {}",
                self.shape.name(),
                field,
                value,
                std::any::type_name::<T>()
            ))
        })
    }

    pub fn shape(&self) -> &Arc<RecordShape> {
        &self.shape
    }

    /// Values in field order.
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    /// `(field name, value)` pairs in field order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.shape
            .fields
            .iter()
            .map(|f| f.name.as_str())
            .zip(self.values.iter())
    }

    /// Field name to value mapping.
    pub fn to_map(&self) -> HashMap<String, Value> {
        self.fields()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect()
    }
}

/// `field_name` becomes `Field Name`.
fn title_case(name: &str) -> String {
    name.split('_')
        .filter(|w| !w.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (name, value)) in self.fields().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            if value.is_null() {
                write!(f, "{}: N/A", title_case(name))?;
            } else {
                write!(f, "{}: {}", title_case(name), value)?;
            }
        }
        Ok(())
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (name, value) in self.fields() {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}
