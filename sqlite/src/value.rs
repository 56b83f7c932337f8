//! Field values and their mapping to SQLite storage.
//!
//! A [`Value`] covers the primitive column types. Booleans are stored as
//! `0`/`1` and timestamps as text in [`TIMESTAMP_FORMAT`]; decoding is guided
//! by the declared [`ColumnType`] so both read back as the variant they were
//! written as.

use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use rusqlite::ToSql;
use rusqlite::types::{ToSqlOutput, ValueRef};
use schemarepo_core::ColumnType;
use serde::{Serialize, Serializer};

/// Storage format for timestamps. Matches what `CURRENT_TIMESTAMP` produces,
/// with optional fractional seconds.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// A single field value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Binary(Vec<u8>),
    Boolean(bool),
    Timestamp(NaiveDateTime),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Primitive type of this value, `None` for [`Value::Null`].
    pub fn column_type(&self) -> Option<ColumnType> {
        match self {
            Self::Null => None,
            Self::Integer(_) => Some(ColumnType::Integer),
            Self::Real(_) => Some(ColumnType::Real),
            Self::Text(_) => Some(ColumnType::Text),
            Self::Binary(_) => Some(ColumnType::Binary),
            Self::Boolean(_) => Some(ColumnType::Boolean),
            Self::Timestamp(_) => Some(ColumnType::Timestamp),
        }
    }

    /// Adapts this value to a column of `column_type`.
    ///
    /// Lossless widenings are applied (integer to real, `0`/`1` to boolean,
    /// timestamp text to timestamp). Returns `None` when the value does not
    /// fit the column.
    pub fn coerce(self, column_type: ColumnType) -> Option<Self> {
        match (self, column_type) {
            (Self::Null, _) => Some(Self::Null),
            (Self::Integer(i), ColumnType::Real) => Some(Self::Real(i as f64)),
            (Self::Integer(i @ (0 | 1)), ColumnType::Boolean) => Some(Self::Boolean(i == 1)),
            (Self::Text(s), ColumnType::Timestamp) => parse_timestamp(&s).map(Self::Timestamp),
            (value, expected) if value.column_type() == Some(expected) => Some(value),
            _ => None,
        }
    }

    /// Decodes a stored value for a column of `column_type`.
    ///
    /// Values whose storage class does not match the declared type (the
    /// engine allows this) are returned as stored.
    pub(crate) fn decode(value: ValueRef<'_>, column_type: ColumnType) -> Self {
        match (value, column_type) {
            (ValueRef::Null, _) => Self::Null,
            (ValueRef::Integer(i), ColumnType::Real) => Self::Real(i as f64),
            (ValueRef::Integer(i), ColumnType::Boolean) => Self::Boolean(i != 0),
            (ValueRef::Integer(i), ColumnType::Timestamp) => DateTime::from_timestamp(i, 0)
                .map(|dt| Self::Timestamp(dt.naive_utc()))
                .unwrap_or(Self::Integer(i)),
            (ValueRef::Text(bytes), ColumnType::Timestamp) => {
                let text = String::from_utf8_lossy(bytes);
                parse_timestamp(&text)
                    .map(Self::Timestamp)
                    .unwrap_or_else(|| Self::Text(text.into_owned()))
            }
            (ValueRef::Text(bytes), ColumnType::Binary) => Self::Binary(bytes.to_vec()),
            (other, _) => Self::from_ref(other),
        }
    }

    /// Decodes a stored value by its storage class alone.
    pub(crate) fn from_ref(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => Self::Null,
            ValueRef::Integer(i) => Self::Integer(i),
            ValueRef::Real(r) => Self::Real(r),
            ValueRef::Text(bytes) => Self::Text(String::from_utf8_lossy(bytes).into_owned()),
            ValueRef::Blob(bytes) => Self::Binary(bytes.to_vec()),
        }
    }
}

/// Parses the timestamp layouts the engine and this crate write.
pub fn parse_timestamp(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    NaiveDateTime::parse_from_str(text, TIMESTAMP_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f"))
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Self::Null => ToSqlOutput::Borrowed(ValueRef::Null),
            Self::Integer(i) => ToSqlOutput::Borrowed(ValueRef::Integer(*i)),
            Self::Real(r) => ToSqlOutput::Borrowed(ValueRef::Real(*r)),
            Self::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Self::Binary(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
            Self::Boolean(b) => ToSqlOutput::Owned(rusqlite::types::Value::Integer(i64::from(*b))),
            Self::Timestamp(ts) => ToSqlOutput::Owned(rusqlite::types::Value::Text(
                ts.format(TIMESTAMP_FORMAT).to_string(),
            )),
        })
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Real(r) => write!(f, "{r}"),
            Self::Text(s) => f.write_str(s),
            Self::Binary(b) => write!(f, "<{} bytes>", b.len()),
            Self::Boolean(b) => write!(f, "{b}"),
            Self::Timestamp(ts) => write!(f, "{}", ts.format(TIMESTAMP_FORMAT)),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Null => serializer.serialize_none(),
            Self::Integer(i) => serializer.serialize_i64(*i),
            Self::Real(r) => serializer.serialize_f64(*r),
            Self::Text(s) => serializer.serialize_str(s),
            Self::Binary(b) => serializer.serialize_bytes(b),
            Self::Boolean(b) => serializer.serialize_bool(*b),
            Self::Timestamp(ts) => {
                serializer.serialize_str(&ts.format(TIMESTAMP_FORMAT).to_string())
            }
        }
    }
}

macro_rules! impl_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(value: $ty) -> Self {
                    Self::$variant(value.into())
                }
            }
        )*
    };
}

impl_from! {
    i64 => Integer,
    i32 => Integer,
    u32 => Integer,
    f64 => Real,
    f32 => Real,
    bool => Boolean,
    String => Text,
    &str => Text,
    Vec<u8> => Binary,
    &[u8] => Binary,
    NaiveDateTime => Timestamp,
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// Conversion from a [`Value`] into a native type, used by
/// [`Record::get_as`](crate::Record::get_as).
pub trait FromValue: Sized {
    fn from_value(value: &Value) -> Option<Self>;
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Integer(i) => Some(*i),
            Value::Boolean(b) => Some(i64::from(*b)),
            _ => None,
        }
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Real(r) => Some(*r),
            Value::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Boolean(b) => Some(*b),
            Value::Integer(i) => Some(*i != 0),
            _ => None,
        }
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Text(s) => Some(s.clone()),
            _ => None,
        }
    }
}

impl FromValue for Vec<u8> {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Binary(b) => Some(b.clone()),
            _ => None,
        }
    }
}

impl FromValue for NaiveDateTime {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Timestamp(ts) => Some(*ts),
            Value::Text(s) => parse_timestamp(s),
            _ => None,
        }
    }
}

impl FromValue for Value {
    fn from_value(value: &Value) -> Option<Self> {
        Some(value.clone())
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Null => Some(None),
            other => T::from_value(other).map(Some),
        }
    }
}
