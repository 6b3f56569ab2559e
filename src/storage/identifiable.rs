//! Persistence for entities with a unique id.
//!
//! [`IdentifiableSqlPersistence`] extends [`SqlPersistence`] with id-based
//! reads, updates and deletes, id generation on create, and `set`, which
//! inserts or replaces a row by id.

use super::{RowCodec, SqlBuilder, SqlClient, SqlConnection, SqlPersistence};
use super::connection::ConnectionResolver;
use crate::config::PersistenceConfig;
use crate::models::{IdValue, Identifiable, Row, SqlValue};
use crate::{Error, Result};
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use tracing::{instrument, trace};

/// Default identifier column.
pub const DEFAULT_ID_COLUMN: &str = "id";

/// Table persistence for entities implementing [`Identifiable<K>`].
///
/// Dereferences to [`SqlPersistence`], so lifecycle, schema, filter and page
/// operations are available directly. `create` is overridden to assign a
/// generated id when the entity has none.
pub struct IdentifiableSqlPersistence<T, K, C> {
    base: SqlPersistence<T, C>,
    id_column: String,
    _key: PhantomData<fn() -> K>,
}

impl<T, K, C> Deref for IdentifiableSqlPersistence<T, K, C> {
    type Target = SqlPersistence<T, C>;

    fn deref(&self) -> &Self::Target {
        &self.base
    }
}

impl<T, K, C> DerefMut for IdentifiableSqlPersistence<T, K, C> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.base
    }
}

impl<T, K, C> IdentifiableSqlPersistence<T, K, C>
where
    T: Identifiable<K> + Clone,
    K: IdValue,
    C: RowCodec<T>,
{
    /// Creates a closed persistence for `table_name`.
    #[must_use]
    pub fn new(table_name: impl Into<String>, codec: C) -> Self {
        Self::wrap(SqlPersistence::new(table_name, codec))
    }

    /// Creates a closed persistence whose table name comes from `config`.
    #[must_use]
    pub fn from_config(config: PersistenceConfig, codec: C) -> Self {
        Self::wrap(SqlPersistence::from_config(config, codec))
    }

    fn wrap(base: SqlPersistence<T, C>) -> Self {
        Self {
            base,
            id_column: DEFAULT_ID_COLUMN.to_string(),
            _key: PhantomData,
        }
    }

    /// Builder form of [`SqlPersistence::configure`].
    #[must_use]
    pub fn with_config(mut self, config: PersistenceConfig) -> Self {
        self.base.configure(config);
        self
    }

    /// Uses a connection owned elsewhere.
    #[must_use]
    pub fn with_connection(mut self, connection: Arc<SqlConnection>) -> Self {
        self.base = self.base.with_connection(connection);
        self
    }

    /// Resolver for a locally created connection.
    #[must_use]
    pub fn with_resolver(mut self, resolver: Arc<dyn ConnectionResolver>) -> Self {
        self.base = self.base.with_resolver(resolver);
        self
    }

    /// Uses `column` as the identifier column instead of `id`.
    #[must_use]
    pub fn with_id_column(mut self, column: impl Into<String>) -> Self {
        self.id_column = column.into();
        self
    }

    /// The identifier column.
    #[must_use]
    pub fn id_column(&self) -> &str {
        &self.id_column
    }

    fn id_condition(&self, client: &dyn SqlClient, first_param: usize) -> String {
        format!(
            "{}={}",
            client.dialect().quote_identifier(&self.id_column),
            client.dialect().placeholder(first_param)
        )
    }

    fn ids_condition(&self, client: &dyn SqlClient, count: usize) -> String {
        let builder = SqlBuilder::new(client.dialect());
        format!(
            "{} IN ({})",
            builder.quote_identifier(&self.id_column),
            builder.placeholders(1, count)
        )
    }

    /// Returns the entities whose ids are in `ids`, in no particular order.
    ///
    /// An empty `ids` returns an empty list without querying.
    ///
    /// # Errors
    ///
    /// Returns the backend error or a codec error.
    #[instrument(skip(self), fields(operation = "get_list_by_ids"))]
    pub async fn get_list_by_ids(&self, correlation_id: Option<&str>, ids: &[K]) -> Result<Vec<T>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let client = self.base.client(correlation_id)?;
        let table = self.base.quoted_table()?;

        let query = format!(
            "SELECT * FROM {table} WHERE {}",
            self.ids_condition(client.as_ref(), ids.len())
        );
        let params: Vec<SqlValue> = ids.iter().map(IdValue::to_sql_value).collect();
        let rows = client.query(&query, &params).await?;
        trace!(correlation_id, count = rows.len(), table = %table, "Retrieved items by ids");
        self.base.decode_rows(rows)
    }

    /// Returns the entity with `id`, or `None`.
    ///
    /// # Errors
    ///
    /// Returns the backend error or a codec error.
    #[instrument(skip(self), fields(operation = "get_one_by_id"))]
    pub async fn get_one_by_id(&self, correlation_id: Option<&str>, id: &K) -> Result<Option<T>> {
        let client = self.base.client(correlation_id)?;
        let table = self.base.quoted_table()?;

        let query = format!(
            "SELECT * FROM {table} WHERE {}",
            self.id_condition(client.as_ref(), 1)
        );
        let rows = client.query(&query, &[id.to_sql_value()]).await?;
        let item = self.base.decode_first(rows)?;
        if item.is_some() {
            trace!(correlation_id, ?id, table = %table, "Retrieved item by id");
        } else {
            trace!(correlation_id, ?id, table = %table, "Nothing found by id");
        }
        Ok(item)
    }

    /// Inserts an entity, generating an id if it has none.
    ///
    /// The caller's entity is not modified; the stored entity is returned.
    ///
    /// # Errors
    ///
    /// Returns the backend error (e.g. a duplicate id) or a codec error.
    #[instrument(skip(self, entity), fields(operation = "create"))]
    pub async fn create(&self, correlation_id: Option<&str>, entity: &T) -> Result<T> {
        let entity = with_id::<T, K>(entity);
        self.base.create(correlation_id, &entity).await
    }

    /// Inserts the entity, or replaces the stored row with the same id.
    ///
    /// An id is generated when the entity has none. The insert runs first;
    /// on a unique-key conflict the row with the entity's id is updated
    /// instead.
    ///
    /// # Errors
    ///
    /// Returns any other backend error, or a codec error. When the conflict
    /// was not on the id, so no row with that id exists, the original
    /// constraint error is returned.
    #[instrument(skip(self, entity), fields(operation = "set"))]
    pub async fn set(&self, correlation_id: Option<&str>, entity: &T) -> Result<T> {
        let client = self.base.client(correlation_id)?;
        let table = self.base.quoted_table()?;
        let entity = with_id::<T, K>(entity);
        let id = entity
            .id()
            .map(IdValue::to_sql_value)
            .unwrap_or_default();
        let row = self.base.codec().encode(&entity)?;

        match self.base.insert_row(client.as_ref(), &table, &row).await {
            Ok(item) => {
                trace!(correlation_id, table = %table, "Set inserted new item");
                Ok(item)
            },
            Err(Error::Database(e)) if client.dialect().is_unique_violation(&e) => {
                // A conflict on another unique column leaves no row with this id.
                let Some(updated) = self.update_row(client.as_ref(), &table, id, &row).await? else {
                    return Err(Error::Database(e));
                };
                trace!(correlation_id, table = %table, "Set updated existing item");
                Ok(updated)
            },
            Err(e) => Err(e),
        }
    }

    async fn update_row(
        &self,
        client: &dyn SqlClient,
        table: &str,
        id: SqlValue,
        row: &Row,
    ) -> Result<Option<T>> {
        let builder = SqlBuilder::new(client.dialect());
        let set_clause = builder.generate_set_parameters(row);
        let where_clause = self.id_condition(client, row.len() + 1);
        let query = client.dialect().update_returning(table, &set_clause, &where_clause);

        let mut params = builder.generate_values(row);
        params.push(id);
        let rows = client.query(&query, &params).await?;
        self.base.decode_first(rows)
    }

    /// Replaces every column of the row with the entity's id.
    ///
    /// Returns `None` when the entity has no id or no row matches.
    ///
    /// # Errors
    ///
    /// Returns the backend error or a codec error.
    #[instrument(skip(self, entity), fields(operation = "update"))]
    pub async fn update(&self, correlation_id: Option<&str>, entity: &T) -> Result<Option<T>> {
        let Some(id) = entity.id() else {
            return Ok(None);
        };
        let client = self.base.client(correlation_id)?;
        let table = self.base.quoted_table()?;
        let row = self.base.codec().encode(entity)?;

        let item = self
            .update_row(client.as_ref(), &table, id.to_sql_value(), &row)
            .await?;
        trace!(correlation_id, ?id, updated = item.is_some(), table = %table, "Updated item");
        Ok(item)
    }

    /// Updates only the given columns of the row with `id`.
    ///
    /// An empty field map updates nothing and returns the current row.
    ///
    /// # Errors
    ///
    /// Returns the backend error or a codec error.
    #[instrument(skip(self, fields), fields(operation = "update_partially"))]
    pub async fn update_partially(
        &self,
        correlation_id: Option<&str>,
        id: &K,
        fields: &Row,
    ) -> Result<Option<T>> {
        let client = self.base.client(correlation_id)?;
        let table = self.base.quoted_table()?;
        let row = self.base.codec().encode_partial(fields)?;
        if row.is_empty() {
            return self.get_one_by_id(correlation_id, id).await;
        }

        let item = self
            .update_row(client.as_ref(), &table, id.to_sql_value(), &row)
            .await?;
        trace!(correlation_id, ?id, updated = item.is_some(), table = %table, "Updated partially");
        Ok(item)
    }

    /// Deletes the row with `id` and returns the deleted entity, or `None`.
    ///
    /// # Errors
    ///
    /// Returns the backend error or a codec error.
    #[instrument(skip(self), fields(operation = "delete_by_id"))]
    pub async fn delete_by_id(&self, correlation_id: Option<&str>, id: &K) -> Result<Option<T>> {
        let client = self.base.client(correlation_id)?;
        let table = self.base.quoted_table()?;

        let query = client
            .dialect()
            .delete_returning(&table, &self.id_condition(client.as_ref(), 1));
        let rows = client.query(&query, &[id.to_sql_value()]).await?;
        let item = self.base.decode_first(rows)?;
        trace!(correlation_id, ?id, deleted = item.is_some(), table = %table, "Deleted item");
        Ok(item)
    }

    /// Deletes every row whose id is in `ids`. An empty list is a no-op.
    ///
    /// # Errors
    ///
    /// Returns the backend error.
    #[instrument(skip(self), fields(operation = "delete_by_ids"))]
    pub async fn delete_by_ids(&self, correlation_id: Option<&str>, ids: &[K]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let client = self.base.client(correlation_id)?;
        let table = self.base.quoted_table()?;

        let query = format!(
            "DELETE FROM {table} WHERE {}",
            self.ids_condition(client.as_ref(), ids.len())
        );
        let params: Vec<SqlValue> = ids.iter().map(IdValue::to_sql_value).collect();
        let count = client.execute(&query, &params).await?;
        trace!(correlation_id, count, table = %table, "Deleted items by ids");
        Ok(())
    }
}

/// Clones the entity, assigning a generated id if it has none.
fn with_id<T, K>(entity: &T) -> T
where
    T: Identifiable<K> + Clone,
    K: IdValue,
{
    let mut entity = entity.clone();
    if entity.id().is_none() {
        entity.set_id(K::generate());
    }
    entity
}

impl<T, K, C> std::fmt::Debug for IdentifiableSqlPersistence<T, K, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentifiableSqlPersistence")
            .field("base", &self.base)
            .field("id_column", &self.id_column)
            .finish()
    }
}
