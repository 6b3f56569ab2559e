//! Ordered column/value rows.

use super::SqlValue;
use crate::{Error, Result};
use serde_json::{Map, Value as JsonValue};

/// A flat, ordered mapping from column name to value.
///
/// Column order is preserved so that column lists and value lists generated
/// from the same row always line up.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row {
    columns: Vec<(String, SqlValue)>,
}

impl Row {
    /// Creates an empty row.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            columns: Vec::new(),
        }
    }

    /// Sets a column, replacing an existing value in place.
    pub fn insert(&mut self, column: impl Into<String>, value: impl Into<SqlValue>) {
        let column = column.into();
        let value = value.into();
        if let Some(slot) = self.columns.iter_mut().find(|(name, _)| *name == column) {
            slot.1 = value;
        } else {
            self.columns.push((column, value));
        }
    }

    /// Builder form of [`Row::insert`].
    #[must_use]
    pub fn with(mut self, column: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        self.insert(column, value);
        self
    }

    /// Returns the value of a column.
    #[must_use]
    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.columns
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    /// Removes a column and returns its value.
    pub fn remove(&mut self, column: &str) -> Option<SqlValue> {
        let index = self.columns.iter().position(|(name, _)| name == column)?;
        Some(self.columns.remove(index).1)
    }

    /// Number of columns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Returns true when the row has no columns.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Iterates over column names in order.
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(name, _)| name.as_str())
    }

    /// Iterates over values in column order.
    pub fn values(&self) -> impl Iterator<Item = &SqlValue> {
        self.columns.iter().map(|(_, value)| value)
    }

    /// Iterates over `(column, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &SqlValue)> {
        self.columns.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// Converts the row into a JSON object.
    #[must_use]
    pub fn to_json(&self) -> JsonValue {
        let map: Map<String, JsonValue> = self
            .columns
            .iter()
            .map(|(name, value)| (name.clone(), value.to_json()))
            .collect();
        JsonValue::Object(map)
    }

    /// Builds a row from a JSON object.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] when the value is not an object.
    pub fn from_json(value: &JsonValue) -> Result<Self> {
        let JsonValue::Object(map) = value else {
            return Err(Error::InvalidInput(format!(
                "expected a JSON object, got {value}"
            )));
        };
        Ok(map
            .iter()
            .map(|(name, value)| (name.clone(), SqlValue::from_json(value)))
            .collect())
    }
}

impl FromIterator<(String, SqlValue)> for Row {
    fn from_iter<I: IntoIterator<Item = (String, SqlValue)>>(iter: I) -> Self {
        let mut row = Self::new();
        for (name, value) in iter {
            row.insert(name, value);
        }
        row
    }
}

impl IntoIterator for Row {
    type Item = (String, SqlValue);
    type IntoIter = std::vec::IntoIter<(String, SqlValue)>;

    fn into_iter(self) -> Self::IntoIter {
        self.columns.into_iter()
    }
}

/// Anything that yields an ordered list of column names.
pub trait ColumnNames {
    /// Returns the column names in order.
    fn column_names(&self) -> Vec<&str>;
}

impl ColumnNames for Row {
    fn column_names(&self) -> Vec<&str> {
        self.columns().collect()
    }
}

impl ColumnNames for [&str] {
    fn column_names(&self) -> Vec<&str> {
        self.to_vec()
    }
}

impl ColumnNames for [String] {
    fn column_names(&self) -> Vec<&str> {
        self.iter().map(String::as_str).collect()
    }
}

impl ColumnNames for Vec<String> {
    fn column_names(&self) -> Vec<&str> {
        self.iter().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_insert_preserves_order_and_replaces() {
        let mut row = Row::new().with("id", "1").with("key", "k").with("content", "c");
        row.insert("key", "k2");

        assert_eq!(row.columns().collect::<Vec<_>>(), vec!["id", "key", "content"]);
        assert_eq!(row.get("key"), Some(&SqlValue::Text("k2".into())));
    }

    #[test]
    fn test_remove() {
        let mut row = Row::new().with("id", "1").with("key", "k");
        assert_eq!(row.remove("id"), Some(SqlValue::Text("1".into())));
        assert_eq!(row.remove("id"), None);
        assert_eq!(row.len(), 1);
    }

    #[test]
    fn test_json_conversion() {
        let value = json!({"id": "1", "count": 3, "tags": ["a", "b"]});
        let row = Row::from_json(&value).unwrap();

        assert_eq!(row.get("count"), Some(&SqlValue::Integer(3)));
        assert_eq!(row.get("tags"), Some(&SqlValue::Text(r#"["a","b"]"#.into())));
        assert_eq!(
            row.to_json(),
            json!({"id": "1", "count": 3, "tags": r#"["a","b"]"#})
        );
    }

    #[test]
    fn test_from_json_keeps_field_order() {
        let value: JsonValue = serde_json::from_str(r#"{"z":1,"a":2,"m":3}"#).unwrap();
        let row = Row::from_json(&value).unwrap();
        assert_eq!(row.columns().collect::<Vec<_>>(), vec!["z", "a", "m"]);
    }

    #[test]
    fn test_from_json_rejects_non_object() {
        assert!(matches!(
            Row::from_json(&json!([1, 2])),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_column_names_for_slices() {
        let names = ["a", "b"];
        assert_eq!(names[..].column_names(), vec!["a", "b"]);
        let owned = vec!["x".to_string()];
        assert_eq!(owned.column_names(), vec!["x"]);
    }
}
