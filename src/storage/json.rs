//! Persistence over JSON document tables.
//!
//! The table has two columns: the entity id and the whole entity serialized
//! as JSON. Filters reach into the document with the backend's JSON
//! functions, e.g. `json_extract("data", '$.key')` in `SQLite` or
//! `"data"->>'key'` in PostgreSQL.

use super::connection::ConnectionResolver;
use super::schema::{JSON_DATA_COLUMN, JSON_ID_COLUMN};
use super::{IdentifiableSqlPersistence, RowCodec, SqlConnection};
use crate::config::PersistenceConfig;
use crate::models::{IdValue, Identifiable, Row, SqlValue};
use crate::{Error, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use tracing::{instrument, trace};

/// Codec that stores the whole entity in the `data` column and its id in `id`.
pub struct JsonRowCodec<T, K> {
    _entity: PhantomData<fn() -> (T, K)>,
}

impl<T, K> JsonRowCodec<T, K> {
    /// Creates a codec.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            _entity: PhantomData,
        }
    }
}

impl<T, K> Default for JsonRowCodec<T, K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, K> std::fmt::Debug for JsonRowCodec<T, K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonRowCodec").finish()
    }
}

impl<T, K> RowCodec<T> for JsonRowCodec<T, K>
where
    T: Identifiable<K> + Serialize + DeserializeOwned,
    K: IdValue,
{
    fn encode(&self, entity: &T) -> Result<Row> {
        let data = serde_json::to_string(entity)
            .map_err(|e| Error::InvalidInput(format!("failed to serialize entity: {e}")))?;
        let id = entity.id().map(IdValue::to_sql_value).unwrap_or_default();
        Ok(Row::new()
            .with(JSON_ID_COLUMN, id)
            .with(JSON_DATA_COLUMN, data))
    }

    fn decode(&self, row: Row) -> Result<T> {
        let data = match row.get(JSON_DATA_COLUMN) {
            Some(SqlValue::Text(data)) => data,
            Some(other) => {
                return Err(Error::InvalidInput(format!(
                    "column '{JSON_DATA_COLUMN}' holds {other}, expected JSON text"
                )));
            },
            None => {
                return Err(Error::InvalidInput(format!(
                    "row has no '{JSON_DATA_COLUMN}' column"
                )));
            },
        };
        serde_json::from_str(data)
            .map_err(|e| Error::InvalidInput(format!("failed to deserialize document: {e}")))
    }

    fn encode_partial(&self, _fields: &Row) -> Result<Row> {
        Err(Error::InvalidInput(
            "JSON documents are patched through IdentifiableJsonSqlPersistence::update_partially"
                .to_string(),
        ))
    }
}

/// Identifiable persistence whose table holds one JSON document per entity.
///
/// Register the table with [`SqlPersistence::ensure_table`](super::SqlPersistence::ensure_table)
/// before opening. Every other operation comes from
/// [`IdentifiableSqlPersistence`] through `Deref`; `update_partially` merges
/// the given fields into the stored document.
pub struct IdentifiableJsonSqlPersistence<T, K> {
    inner: IdentifiableSqlPersistence<T, K, JsonRowCodec<T, K>>,
}

impl<T, K> Deref for IdentifiableJsonSqlPersistence<T, K> {
    type Target = IdentifiableSqlPersistence<T, K, JsonRowCodec<T, K>>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl<T, K> DerefMut for IdentifiableJsonSqlPersistence<T, K> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}

impl<T, K> IdentifiableJsonSqlPersistence<T, K>
where
    T: Identifiable<K> + Serialize + DeserializeOwned + Clone,
    K: IdValue,
{
    /// Creates a closed persistence for `table_name`.
    #[must_use]
    pub fn new(table_name: impl Into<String>) -> Self {
        Self {
            inner: IdentifiableSqlPersistence::new(table_name, JsonRowCodec::new()),
        }
    }

    /// Creates a closed persistence whose table name comes from `config`.
    #[must_use]
    pub fn from_config(config: PersistenceConfig) -> Self {
        Self {
            inner: IdentifiableSqlPersistence::from_config(config, JsonRowCodec::new()),
        }
    }

    /// Builder form of [`SqlPersistence::configure`](super::SqlPersistence::configure).
    #[must_use]
    pub fn with_config(mut self, config: PersistenceConfig) -> Self {
        self.inner = self.inner.with_config(config);
        self
    }

    /// Uses a connection owned elsewhere.
    #[must_use]
    pub fn with_connection(mut self, connection: Arc<SqlConnection>) -> Self {
        self.inner = self.inner.with_connection(connection);
        self
    }

    /// Resolver for a locally created connection.
    #[must_use]
    pub fn with_resolver(mut self, resolver: Arc<dyn ConnectionResolver>) -> Self {
        self.inner = self.inner.with_resolver(resolver);
        self
    }

    /// Merges `fields` into the stored document of `id` and writes it back.
    ///
    /// Returns `None` when no row has that id. An empty field map returns
    /// the current entity without writing. The id itself is never changed.
    ///
    /// # Errors
    ///
    /// Returns the backend error, or [`Error::InvalidInput`] when the merged
    /// document no longer describes a valid entity.
    #[instrument(skip(self, fields), fields(operation = "update_partially"))]
    pub async fn update_partially(
        &self,
        correlation_id: Option<&str>,
        id: &K,
        fields: &Row,
    ) -> Result<Option<T>> {
        let Some(current) = self.inner.get_one_by_id(correlation_id, id).await? else {
            return Ok(None);
        };
        if fields.is_empty() {
            return Ok(Some(current));
        }

        let mut document = serde_json::to_value(&current)
            .map_err(|e| Error::InvalidInput(format!("failed to serialize entity: {e}")))?;
        let JsonValue::Object(object) = &mut document else {
            return Err(Error::InvalidInput(
                "entity does not serialize to a JSON object".to_string(),
            ));
        };
        for (name, value) in fields.iter() {
            object.insert(name.to_string(), value.to_json());
        }

        let mut merged: T = serde_json::from_value(document)
            .map_err(|e| Error::InvalidInput(format!("failed to apply partial update: {e}")))?;
        merged.set_id(id.clone());

        let item = self.inner.update(correlation_id, &merged).await?;
        trace!(correlation_id, ?id, updated = item.is_some(), "Merged partial update into document");
        Ok(item)
    }
}

impl<T, K> std::fmt::Debug for IdentifiableJsonSqlPersistence<T, K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentifiableJsonSqlPersistence")
            .field("inner", &self.inner)
            .finish()
    }
}
