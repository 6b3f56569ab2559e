//! Conversion between public entities and storage rows.

use super::SchemaRegistrar;
use crate::models::{Row, SqlValue};
use crate::{Error, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value as JsonValue};
use std::collections::HashSet;
use std::marker::PhantomData;

/// Converts entities of type `T` to and from rows.
///
/// Every read and write path of a persistence goes through the codec, so
/// computed or renamed columns only need to be handled here.
pub trait RowCodec<T>: Send + Sync {
    /// Converts an entity into a row.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the entity cannot be represented.
    fn encode(&self, entity: &T) -> Result<Row>;

    /// Converts a row read from the table into an entity.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the row does not describe a valid entity.
    fn decode(&self, row: Row) -> Result<T>;

    /// Converts a partial field map for `update_partially`.
    ///
    /// Defaults to passing the fields through unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if a field is rejected.
    fn encode_partial(&self, fields: &Row) -> Result<Row> {
        Ok(fields.clone())
    }

    /// Registers the table's schema statements. Called on every open.
    fn define_schema(&self, _table: &str, _schema: &mut SchemaRegistrar) {}
}

/// Codec for flat `serde` structs.
///
/// Fields map to columns of the same name, in field declaration order.
/// Nested values are written as JSON text; list their columns with
/// [`SerdeCodec::with_json_columns`] so they are parsed back on read. Text in
/// any other column is returned verbatim. Backends without a boolean type
/// return integers; list such columns with [`SerdeCodec::with_bool_columns`]
/// so they decode into `bool` fields.
pub struct SerdeCodec<T> {
    bool_columns: HashSet<String>,
    json_columns: HashSet<String>,
    _entity: PhantomData<fn() -> T>,
}

impl<T> SerdeCodec<T> {
    /// Creates a codec.
    #[must_use]
    pub fn new() -> Self {
        Self {
            bool_columns: HashSet::new(),
            json_columns: HashSet::new(),
            _entity: PhantomData,
        }
    }

    /// Declares columns whose integer values decode as booleans.
    #[must_use]
    pub fn with_bool_columns(mut self, columns: &[&str]) -> Self {
        self.bool_columns
            .extend(columns.iter().map(|column| (*column).to_string()));
        self
    }

    /// Declares columns holding JSON text that decode into nested fields.
    #[must_use]
    pub fn with_json_columns(mut self, columns: &[&str]) -> Self {
        self.json_columns
            .extend(columns.iter().map(|column| (*column).to_string()));
        self
    }

    fn column_to_json(&self, column: &str, value: SqlValue) -> Result<JsonValue> {
        match value {
            SqlValue::Integer(v) if self.bool_columns.contains(column) => Ok(JsonValue::Bool(v != 0)),
            SqlValue::Text(text) if self.json_columns.contains(column) => serde_json::from_str(&text)
                .map_err(|e| Error::InvalidInput(format!("column '{column}' is not valid JSON: {e}"))),
            other => Ok(other.to_json()),
        }
    }
}

impl<T> Default for SerdeCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for SerdeCodec<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerdeCodec")
            .field("bool_columns", &self.bool_columns)
            .field("json_columns", &self.json_columns)
            .finish()
    }
}

impl<T> RowCodec<T> for SerdeCodec<T>
where
    T: Serialize + DeserializeOwned,
{
    fn encode(&self, entity: &T) -> Result<Row> {
        let value = serde_json::to_value(entity).map_err(|e| {
            Error::InvalidInput(format!("failed to serialize entity: {e}"))
        })?;
        Row::from_json(&value)
    }

    fn decode(&self, row: Row) -> Result<T> {
        let mut object = Map::with_capacity(row.len());
        for (column, value) in row {
            let value = self.column_to_json(&column, value)?;
            object.insert(column, value);
        }
        serde_json::from_value(JsonValue::Object(object))
            .map_err(|e| Error::InvalidInput(format!("failed to deserialize row: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Dummy {
        id: Option<String>,
        key: String,
        content: String,
        active: bool,
        tags: Vec<String>,
    }

    fn dummy() -> Dummy {
        Dummy {
            id: Some("1".to_string()),
            key: "Key 1".to_string(),
            content: "Content 1".to_string(),
            active: true,
            tags: vec!["a".to_string()],
        }
    }

    #[test]
    fn test_encode_field_order() {
        let codec = SerdeCodec::<Dummy>::new();
        let row = codec.encode(&dummy()).unwrap();
        assert_eq!(
            row.columns().collect::<Vec<_>>(),
            vec!["id", "key", "content", "active", "tags"]
        );
        assert_eq!(row.get("tags"), Some(&SqlValue::Text(r#"["a"]"#.to_string())));
    }

    #[test]
    fn test_decode_with_integer_bool() {
        let codec = SerdeCodec::<Dummy>::new()
            .with_bool_columns(&["active"])
            .with_json_columns(&["tags"]);
        let row = Row::new()
            .with("id", "1")
            .with("key", "Key 1")
            .with("content", "Content 1")
            .with("active", 1_i64)
            .with("tags", r#"["a"]"#);

        assert_eq!(codec.decode(row).unwrap(), dummy());
    }

    #[test]
    fn test_decode_without_bool_columns_fails_on_integer() {
        let codec = SerdeCodec::<Dummy>::new().with_json_columns(&["tags"]);
        let row = Row::new()
            .with("id", "1")
            .with("key", "k")
            .with("content", "c")
            .with("active", 1_i64)
            .with("tags", "[]");

        assert!(matches!(codec.decode(row), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_json_looking_text_round_trips() {
        let codec = SerdeCodec::<Dummy>::new().with_json_columns(&["tags"]);
        let entity = Dummy {
            content: "[1,2]".to_string(),
            key: r#"{"a":1}"#.to_string(),
            ..dummy()
        };

        let row = codec.encode(&entity).unwrap();
        assert_eq!(row.get("content"), Some(&SqlValue::Text("[1,2]".to_string())));
        assert_eq!(codec.decode(row).unwrap(), entity);
    }

    #[test]
    fn test_invalid_json_column_is_rejected() {
        let codec = SerdeCodec::<Dummy>::new().with_json_columns(&["tags"]);
        let row = Row::new()
            .with("id", "1")
            .with("key", "k")
            .with("content", "c")
            .with("active", true)
            .with("tags", "[oops");

        assert!(matches!(codec.decode(row), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_encode_partial_defaults_to_identity() {
        let codec = SerdeCodec::<Dummy>::new();
        let fields = Row::new().with("content", "Partial");
        assert_eq!(codec.encode_partial(&fields).unwrap(), fields);
    }
}
