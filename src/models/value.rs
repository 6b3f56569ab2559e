//! Scalar column values.

use rusqlite::types::{ToSqlOutput, Value as SqliteValue, ValueRef};
use serde_json::Value as JsonValue;
use std::fmt;

/// A single scalar stored in a column.
///
/// Every row value passed to or read from a backend is one of these variants.
/// Nested structures are stored as JSON text.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum SqlValue {
    /// SQL `NULL`.
    #[default]
    Null,
    /// Boolean. `SQLite` stores it as an integer.
    Bool(bool),
    /// 64-bit signed integer.
    Integer(i64),
    /// Double precision float.
    Real(f64),
    /// UTF-8 text.
    Text(String),
    /// Raw bytes.
    Blob(Vec<u8>),
}

impl SqlValue {
    /// Returns true for [`SqlValue::Null`].
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns the value as an integer, converting numeric text and reals.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(v) => Some(*v),
            Self::Bool(v) => Some(i64::from(*v)),
            Self::Real(v) => Some(*v as i64),
            Self::Text(v) => v.trim().parse().ok(),
            Self::Null | Self::Blob(_) => None,
        }
    }

    /// Returns the value as a string slice when it holds text.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v),
            _ => None,
        }
    }

    /// Converts the value into a JSON value.
    ///
    /// Text always becomes a JSON string, even when it holds JSON. Columns
    /// that store nested documents are parsed by the codec that knows them.
    #[must_use]
    pub fn to_json(&self) -> JsonValue {
        match self {
            Self::Null => JsonValue::Null,
            Self::Bool(v) => JsonValue::Bool(*v),
            Self::Integer(v) => JsonValue::from(*v),
            Self::Real(v) => serde_json::Number::from_f64(*v).map_or(JsonValue::Null, JsonValue::Number),
            Self::Text(v) => JsonValue::String(v.clone()),
            Self::Blob(v) => JsonValue::Array(v.iter().map(|b| JsonValue::from(*b)).collect()),
        }
    }

    /// Converts a JSON value into a column value.
    ///
    /// Objects and arrays are serialized to JSON text.
    #[must_use]
    pub fn from_json(value: &JsonValue) -> Self {
        match value {
            JsonValue::Null => Self::Null,
            JsonValue::Bool(v) => Self::Bool(*v),
            JsonValue::Number(n) => n
                .as_i64()
                .map(Self::Integer)
                .or_else(|| n.as_f64().map(Self::Real))
                .unwrap_or(Self::Null),
            JsonValue::String(v) => Self::Text(v.clone()),
            JsonValue::Array(_) | JsonValue::Object(_) => Self::Text(value.to_string()),
        }
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Integer(v) => write!(f, "{v}"),
            Self::Real(v) => write!(f, "{v}"),
            Self::Text(v) => write!(f, "{v}"),
            Self::Blob(v) => write!(f, "<{} bytes>", v.len()),
        }
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        Self::Integer(i64::from(v))
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        Self::Real(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<Vec<u8>> for SqlValue {
    fn from(v: Vec<u8>) -> Self {
        Self::Blob(v)
    }
}

impl<T: Into<Self>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

impl rusqlite::ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Self::Null => ToSqlOutput::Owned(SqliteValue::Null),
            Self::Bool(v) => ToSqlOutput::Owned(SqliteValue::Integer(i64::from(*v))),
            Self::Integer(v) => ToSqlOutput::Owned(SqliteValue::Integer(*v)),
            Self::Real(v) => ToSqlOutput::Owned(SqliteValue::Real(*v)),
            Self::Text(v) => ToSqlOutput::Borrowed(ValueRef::Text(v.as_bytes())),
            Self::Blob(v) => ToSqlOutput::Borrowed(ValueRef::Blob(v)),
        })
    }
}

impl From<ValueRef<'_>> for SqlValue {
    fn from(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => Self::Null,
            ValueRef::Integer(v) => Self::Integer(v),
            ValueRef::Real(v) => Self::Real(v),
            ValueRef::Text(v) => Self::Text(String::from_utf8_lossy(v).into_owned()),
            ValueRef::Blob(v) => Self::Blob(v.to_vec()),
        }
    }
}

#[cfg(feature = "postgres")]
mod postgres_types {
    use super::SqlValue;
    use bytes::BytesMut;
    use tokio_postgres::types::{IsNull, ToSql, Type, to_sql_checked};

    type BoxError = Box<dyn std::error::Error + Sync + Send>;

    fn is_text(ty: &Type) -> bool {
        *ty == Type::TEXT || *ty == Type::VARCHAR || *ty == Type::BPCHAR || *ty == Type::NAME
    }

    fn is_json(ty: &Type) -> bool {
        *ty == Type::JSON || *ty == Type::JSONB
    }

    // Parameter types are inferred by the server, so the value adapts to the
    // declared column type instead of the other way round.
    impl ToSql for SqlValue {
        #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
        fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
            match self {
                Self::Null => Ok(IsNull::Yes),
                Self::Bool(v) => {
                    if is_text(ty) {
                        v.to_string().to_sql(ty, out)
                    } else {
                        v.to_sql(ty, out)
                    }
                },
                Self::Integer(v) => {
                    if *ty == Type::INT2 {
                        i16::try_from(*v)?.to_sql(ty, out)
                    } else if *ty == Type::INT4 {
                        i32::try_from(*v)?.to_sql(ty, out)
                    } else if *ty == Type::FLOAT4 {
                        (*v as f32).to_sql(ty, out)
                    } else if *ty == Type::FLOAT8 {
                        (*v as f64).to_sql(ty, out)
                    } else if *ty == Type::BOOL {
                        (*v != 0).to_sql(ty, out)
                    } else if is_text(ty) {
                        v.to_string().to_sql(ty, out)
                    } else {
                        v.to_sql(ty, out)
                    }
                },
                Self::Real(v) => {
                    if *ty == Type::FLOAT4 {
                        (*v as f32).to_sql(ty, out)
                    } else if is_text(ty) {
                        v.to_string().to_sql(ty, out)
                    } else {
                        v.to_sql(ty, out)
                    }
                },
                Self::Text(v) => {
                    if is_json(ty) {
                        serde_json::from_str::<serde_json::Value>(v)?.to_sql(ty, out)
                    } else {
                        v.to_sql(ty, out)
                    }
                },
                Self::Blob(v) => v.to_sql(ty, out),
            }
        }

        fn accepts(_ty: &Type) -> bool {
            true
        }

        to_sql_checked!();
    }
}
