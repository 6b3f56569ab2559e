//! Generic table persistence.
//!
//! [`SqlPersistence`] stores entities of one type in one table. It opens (or
//! borrows) a connection, bootstraps the schema when the table is missing,
//! and offers filter, page, count, random-pick, create and delete-by-filter
//! operations. Filters and sort expressions are raw SQL fragments inserted
//! verbatim; sanitizing them is the caller's responsibility. [`Filter`]
//! renders a safe fragment through [`SqlPersistence::render_filter`].

use super::client::is_postgres_uri;
use super::connection::ConnectionHandle;
use super::schema::IndexOptions;
use super::{
    ConnectionResolver, Dialect, PostgresDialect, RowCodec, SchemaRegistrar, SqlBuilder,
    SqlClient, SqlConnection, SqliteDialect, StaticConnectionResolver,
};
use crate::config::PersistenceConfig;
use crate::models::{DataPage, Filter, PagingParams, Row, SqlValue};
use crate::{CONNECT_FAILED, Error, NO_CONNECTION, Result};
use rand::Rng;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, instrument, trace, warn};

/// Lifecycle of a persistence component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Not connected.
    Closed,
    /// `open` in progress.
    Opening,
    /// Ready for data operations.
    Open,
    /// `close` in progress.
    Closing,
}

/// Persistence for entities of type `T` in a single table, converted by `C`.
///
/// `open`, `close` and `configure` take `&mut self`; callers serialize
/// lifecycle transitions. Data operations take `&self` and may run
/// concurrently up to what the connection pool allows.
pub struct SqlPersistence<T, C> {
    table_name: Option<String>,
    config: PersistenceConfig,
    codec: C,
    connection: Option<ConnectionHandle>,
    resolver: Option<Arc<dyn ConnectionResolver>>,
    client: Option<Arc<dyn SqlClient>>,
    database_name: Option<String>,
    schema: SchemaRegistrar,
    state: LifecycleState,
    _entity: PhantomData<fn() -> T>,
}

fn non_empty(table: Option<String>) -> Option<String> {
    table.filter(|name| !name.trim().is_empty())
}

fn where_clause(filter: &str) -> String {
    if filter.trim().is_empty() {
        String::new()
    } else {
        format!(" WHERE {filter}")
    }
}

impl<T, C> SqlPersistence<T, C>
where
    C: RowCodec<T>,
{
    /// Creates a closed persistence for `table_name`.
    #[must_use]
    pub fn new(table_name: impl Into<String>, codec: C) -> Self {
        let mut persistence = Self::from_config(PersistenceConfig::default(), codec);
        persistence.table_name = non_empty(Some(table_name.into()));
        persistence
    }

    /// Creates a closed persistence whose table name comes from `config`.
    #[must_use]
    pub fn from_config(config: PersistenceConfig, codec: C) -> Self {
        Self {
            table_name: non_empty(config.table.clone()),
            config,
            codec,
            connection: None,
            resolver: None,
            client: None,
            database_name: None,
            schema: SchemaRegistrar::new(),
            state: LifecycleState::Closed,
            _entity: PhantomData,
        }
    }

    /// Builder form of [`Self::configure`].
    #[must_use]
    pub fn with_config(mut self, config: PersistenceConfig) -> Self {
        self.configure(config);
        self
    }

    /// Uses a connection owned elsewhere. It is never opened or closed here.
    #[must_use]
    pub fn with_connection(mut self, connection: Arc<SqlConnection>) -> Self {
        self.connection = Some(ConnectionHandle::Borrowed(connection));
        self
    }

    /// Resolver for a locally created connection. Defaults to the configured URI.
    #[must_use]
    pub fn with_resolver(mut self, resolver: Arc<dyn ConnectionResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Applies configuration. A table name in `config` replaces the current one.
    pub fn configure(&mut self, config: PersistenceConfig) {
        if let Some(table) = non_empty(config.table.clone()) {
            self.table_name = Some(table);
        }
        self.config = config;
    }

    /// Appends a schema statement run on open when the table is missing.
    pub fn ensure_schema(&mut self, statement: impl Into<String>) {
        self.schema.ensure_schema(statement);
    }

    /// Appends a `CREATE [UNIQUE] INDEX` on this table.
    pub fn ensure_index(
        &mut self,
        name: impl Into<String>,
        keys: &[(&str, bool)],
        options: IndexOptions,
    ) {
        self.schema.ensure_index(name, keys, options);
    }

    /// Appends a `CREATE TABLE` for an `id` + `data` JSON document table.
    pub fn ensure_table(&mut self, id_type: Option<&str>, data_type: Option<&str>) {
        self.schema.ensure_table(id_type, data_type);
    }

    /// Discards pending schema statements.
    pub fn clear_schema(&mut self) {
        self.schema.clear_schema();
    }

    /// Table name, if set.
    #[must_use]
    pub fn table_name(&self) -> Option<&str> {
        self.table_name.as_deref()
    }

    /// Database name captured at open.
    #[must_use]
    pub fn database_name(&self) -> Option<&str> {
        self.database_name.as_deref()
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> LifecycleState {
        self.state
    }

    /// True when data operations are available.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state == LifecycleState::Open
    }

    /// Maximum rows returned per page.
    #[must_use]
    pub const fn max_page_size(&self) -> i64 {
        self.config.max_page_size
    }

    /// The entity codec.
    #[must_use]
    pub const fn codec(&self) -> &C {
        &self.codec
    }

    /// The connection in use, if one was created or supplied.
    #[must_use]
    pub fn connection(&self) -> Option<&Arc<SqlConnection>> {
        self.connection.as_ref().map(ConnectionHandle::connection)
    }

    /// Dialect of the open client, or the one implied by the configured URI.
    #[must_use]
    pub fn dialect(&self) -> &dyn Dialect {
        if let Some(client) = &self.client {
            return client.dialect();
        }
        if self
            .config
            .connection
            .uri
            .as_deref()
            .is_some_and(is_postgres_uri)
        {
            return &PostgresDialect;
        }
        &SqliteDialect
    }

    /// Renders a structured filter for this persistence's dialect.
    #[must_use]
    pub fn render_filter(&self, filter: &Filter) -> String {
        filter.render(self.dialect())
    }

    /// Opens the connection if owned, creates the schema, and marks the
    /// persistence open. A no-op when already open.
    ///
    /// # Errors
    ///
    /// Returns `NO_CONNECTION` if no connection is available, or
    /// `CONNECT_FAILED` if the connection cannot be opened or the schema
    /// cannot be created.
    #[instrument(skip(self), fields(operation = "open", table = self.table_name.as_deref()))]
    pub async fn open(&mut self, correlation_id: Option<&str>) -> Result<()> {
        if self.state == LifecycleState::Open {
            return Ok(());
        }
        self.state = LifecycleState::Opening;

        if self.connection.is_none() {
            let resolver = self.resolver.clone().unwrap_or_else(|| {
                Arc::new(StaticConnectionResolver::from_config(&self.config.connection))
            });
            let connection = SqlConnection::new(resolver).with_options(self.config.options);
            self.connection = Some(ConnectionHandle::Owned(Arc::new(connection)));
        }

        let Some(handle) = self.connection.clone() else {
            self.state = LifecycleState::Closed;
            return Err(Error::invalid_state(
                correlation_id,
                NO_CONNECTION,
                "SQL connection is missing",
            ));
        };

        if handle.is_owned() {
            if let Err(e) = handle.connection().open(correlation_id).await {
                self.state = LifecycleState::Closed;
                return Err(e);
            }
        }

        let Some(client) = handle.connection().client() else {
            self.state = LifecycleState::Closed;
            return Err(Error::connection(
                correlation_id,
                CONNECT_FAILED,
                "SQL connection is not opened",
            ));
        };

        if let Err(e) = self.create_schema(client.as_ref(), correlation_id).await {
            if handle.is_owned() {
                if let Err(close_error) = handle.connection().close(correlation_id).await {
                    warn!(correlation_id, error = %close_error, "Failed to close connection after schema error");
                }
            }
            self.state = LifecycleState::Closed;
            return Err(Error::connection(
                correlation_id,
                CONNECT_FAILED,
                "Failed to create database schema",
            )
            .with_cause(e));
        }

        self.database_name = handle.connection().database_name();
        self.client = Some(client);
        self.state = LifecycleState::Open;
        debug!(correlation_id, table = self.table_name.as_deref(), "Opened persistence");
        Ok(())
    }

    /// Runs the codec's schema hook plus registered statements.
    async fn create_schema(&self, client: &dyn SqlClient, correlation_id: Option<&str>) -> Result<()> {
        let Some(table) = self.table_name.as_deref() else {
            return Ok(());
        };
        let mut schema = self.schema.clone();
        self.codec.define_schema(table, &mut schema);
        schema.create_schema(client, table, correlation_id).await
    }

    /// Closes an owned connection and marks the persistence closed.
    ///
    /// A borrowed connection stays open. Local state is cleared even when
    /// closing the connection fails.
    ///
    /// # Errors
    ///
    /// Returns `DISCONNECT_FAILED` if the owned connection fails to close.
    #[instrument(skip(self), fields(operation = "close", table = self.table_name.as_deref()))]
    pub async fn close(&mut self, correlation_id: Option<&str>) -> Result<()> {
        if self.state == LifecycleState::Closed {
            return Ok(());
        }
        self.state = LifecycleState::Closing;

        let result = match &self.connection {
            Some(ConnectionHandle::Owned(connection)) => connection.close(correlation_id).await,
            _ => Ok(()),
        };

        self.client = None;
        self.database_name = None;
        self.state = LifecycleState::Closed;
        debug!(correlation_id, table = self.table_name.as_deref(), "Closed persistence");
        result
    }

    pub(crate) fn client(&self, correlation_id: Option<&str>) -> Result<&Arc<dyn SqlClient>> {
        self.client.as_ref().ok_or_else(|| {
            Error::invalid_state(correlation_id, "NOT_OPENED", "Persistence is not opened")
        })
    }

    pub(crate) fn quoted_table(&self) -> Result<String> {
        self.table_name
            .as_deref()
            .map(|table| self.dialect().quote_identifier(table))
            .ok_or_else(|| Error::configuration("NO_TABLE_NAME", "Table name is not defined"))
    }

    pub(crate) fn decode_rows(&self, rows: Vec<Row>) -> Result<Vec<T>> {
        rows.into_iter().map(|row| self.codec.decode(row)).collect()
    }

    pub(crate) fn decode_first(&self, rows: Vec<Row>) -> Result<Option<T>> {
        rows.into_iter()
            .next()
            .map(|row| self.codec.decode(row))
            .transpose()
    }

    /// Deletes every row in the table.
    ///
    /// # Errors
    ///
    /// Returns `NO_TABLE_NAME` if no table is set, `NOT_OPENED` if closed, or
    /// the backend error.
    #[instrument(skip(self), fields(operation = "clear"))]
    pub async fn clear(&self, correlation_id: Option<&str>) -> Result<()> {
        let table = self.quoted_table()?;
        let client = self.client(correlation_id)?;
        client.execute(&format!("DELETE FROM {table}"), &[]).await?;
        trace!(correlation_id, table = %table, "Cleared table");
        Ok(())
    }

    /// Returns one page of entities matching `filter`.
    ///
    /// `skip` defaults to 0 (negative values count as 0); `take` defaults to
    /// and is capped by the max page size. Without `sort` the page is
    /// ordered by the first column. `total` is only computed when requested.
    ///
    /// # Errors
    ///
    /// Returns the backend error or a codec error.
    #[instrument(skip(self), fields(operation = "get_page_by_filter"))]
    pub async fn get_page_by_filter(
        &self,
        correlation_id: Option<&str>,
        filter: &str,
        paging: Option<PagingParams>,
        sort: Option<&str>,
        select: Option<&str>,
    ) -> Result<DataPage<T>> {
        let client = self.client(correlation_id)?;
        let table = self.quoted_table()?;
        let paging = paging.unwrap_or_default();
        let skip = paging.skip_or(0);
        let take = paging.take_or(self.max_page_size());

        let select = select.filter(|s| !s.trim().is_empty()).unwrap_or("*");
        let sort = sort.filter(|s| !s.trim().is_empty()).unwrap_or("1");
        let filter_sql = where_clause(filter);
        let query = format!(
            "SELECT {select} FROM {table}{filter_sql} ORDER BY {sort} {}",
            client.dialect().paging_clause(skip, take)
        );

        let rows = client.query(&query, &[]).await?;
        trace!(correlation_id, count = rows.len(), table = %table, "Retrieved items");
        let data = self.decode_rows(rows)?;

        let total = if paging.total {
            Some(self.count(client.as_ref(), &table, &filter_sql).await?)
        } else {
            None
        };

        Ok(DataPage::new(data, total))
    }

    async fn count(&self, client: &dyn SqlClient, table: &str, filter_sql: &str) -> Result<i64> {
        let query = format!("SELECT COUNT(*) AS count FROM {table}{filter_sql}");
        let rows = client.query(&query, &[]).await?;
        if rows.len() != 1 {
            return Ok(0);
        }
        Ok(rows
            .first()
            .and_then(|row| row.values().next())
            .and_then(SqlValue::as_i64)
            .unwrap_or(0))
    }

    /// Counts rows matching `filter`. Returns 0 for a structurally empty result.
    ///
    /// # Errors
    ///
    /// Returns the backend error.
    #[instrument(skip(self), fields(operation = "get_count_by_filter"))]
    pub async fn get_count_by_filter(&self, correlation_id: Option<&str>, filter: &str) -> Result<i64> {
        let client = self.client(correlation_id)?;
        let table = self.quoted_table()?;
        let count = self.count(client.as_ref(), &table, &where_clause(filter)).await?;
        trace!(correlation_id, count, table = %table, "Counted items");
        Ok(count)
    }

    /// Returns every entity matching `filter`, unpaged.
    ///
    /// No `ORDER BY` is added unless `sort` is given.
    ///
    /// # Errors
    ///
    /// Returns the backend error or a codec error.
    #[instrument(skip(self), fields(operation = "get_list_by_filter"))]
    pub async fn get_list_by_filter(
        &self,
        correlation_id: Option<&str>,
        filter: &str,
        sort: Option<&str>,
        select: Option<&str>,
    ) -> Result<Vec<T>> {
        let client = self.client(correlation_id)?;
        let table = self.quoted_table()?;
        let select = select.filter(|s| !s.trim().is_empty()).unwrap_or("*");

        let mut query = format!("SELECT {select} FROM {table}{}", where_clause(filter));
        if let Some(sort) = sort.filter(|s| !s.trim().is_empty()) {
            query.push_str(" ORDER BY ");
            query.push_str(sort);
        }

        let rows = client.query(&query, &[]).await?;
        trace!(correlation_id, count = rows.len(), table = %table, "Retrieved items");
        self.decode_rows(rows)
    }

    /// Returns a uniformly chosen entity matching `filter`, or `None` if none match.
    ///
    /// # Errors
    ///
    /// Returns the backend error or a codec error.
    #[instrument(skip(self), fields(operation = "get_one_random"))]
    pub async fn get_one_random(&self, correlation_id: Option<&str>, filter: &str) -> Result<Option<T>> {
        let client = self.client(correlation_id)?;
        let table = self.quoted_table()?;
        let filter_sql = where_clause(filter);

        let count = self.count(client.as_ref(), &table, &filter_sql).await?;
        if count <= 0 {
            trace!(correlation_id, table = %table, "Random item wasn't found");
            return Ok(None);
        }

        let position = rand::thread_rng().gen_range(0..count);
        let query = format!(
            "SELECT * FROM {table}{filter_sql} ORDER BY 1 {}",
            client.dialect().paging_clause(position, 1)
        );

        let rows = client.query(&query, &[]).await?;
        let item = self.decode_first(rows)?;
        trace!(correlation_id, found = item.is_some(), table = %table, "Retrieved random item");
        Ok(item)
    }

    /// Inserts an entity and returns it as stored, including server defaults.
    ///
    /// # Errors
    ///
    /// Returns the backend error (e.g. a key conflict) or a codec error.
    #[instrument(skip(self, entity), fields(operation = "create"))]
    pub async fn create(&self, correlation_id: Option<&str>, entity: &T) -> Result<T> {
        let client = self.client(correlation_id)?;
        let table = self.quoted_table()?;
        let row = self.codec.encode(entity)?;
        self.insert_row(client.as_ref(), &table, &row).await
    }

    /// Inserts `row` with the dialect's returning syntax and decodes the result.
    pub(crate) async fn insert_row(&self, client: &dyn SqlClient, table: &str, row: &Row) -> Result<T> {
        if row.is_empty() {
            return Err(Error::InvalidInput("entity has no columns".to_string()));
        }

        let builder = SqlBuilder::new(client.dialect());
        let query = client.dialect().insert_returning(
            table,
            &builder.generate_columns(row),
            &builder.generate_parameters(row),
        );
        let rows = client.query(&query, &builder.generate_values(row)).await?;
        trace!(table = %table, "Created item");

        self.decode_first(rows)?.ok_or_else(|| Error::OperationFailed {
            operation: "create".to_string(),
            cause: "insert returned no row".to_string(),
        })
    }

    /// Deletes rows matching `filter`. The count is logged, not returned.
    ///
    /// # Errors
    ///
    /// Returns the backend error.
    #[instrument(skip(self), fields(operation = "delete_by_filter"))]
    pub async fn delete_by_filter(&self, correlation_id: Option<&str>, filter: &str) -> Result<()> {
        let client = self.client(correlation_id)?;
        let table = self.quoted_table()?;
        let query = format!("DELETE FROM {table}{}", where_clause(filter));
        let count = client.execute(&query, &[]).await?;
        trace!(correlation_id, count, table = %table, "Deleted items");
        Ok(())
    }
}

impl<T, C> std::fmt::Debug for SqlPersistence<T, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlPersistence")
            .field("table_name", &self.table_name)
            .field("state", &self.state)
            .field("connection", &self.connection)
            .finish_non_exhaustive()
    }
}
