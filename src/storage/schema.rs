//! Schema registrar.
//!
//! Collects the DDL that describes a table and its indexes, and runs it once
//! on open when the table does not exist yet. An existing table is never
//! altered.

use super::{Dialect, SqlClient};
use crate::Result;
use tracing::{debug, error};

/// Identifier column of a JSON document table.
pub const JSON_ID_COLUMN: &str = "id";

/// Document column of a JSON document table.
pub const JSON_DATA_COLUMN: &str = "data";

/// Options for [`SchemaRegistrar::ensure_index`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexOptions {
    /// Emit `CREATE UNIQUE INDEX`.
    pub unique: bool,
    /// Backend-specific index type inserted before the column list,
    /// e.g. `USING HASH` or `NONCLUSTERED`.
    pub index_type: Option<String>,
}

impl IndexOptions {
    /// Options for a unique index.
    #[must_use]
    pub const fn unique() -> Self {
        Self {
            unique: true,
            index_type: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct IndexDefinition {
    name: String,
    keys: Vec<(String, bool)>,
    options: IndexOptions,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct JsonTableDefinition {
    id_type: Option<String>,
    data_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum SchemaStatement {
    Raw(String),
    Index(IndexDefinition),
    JsonTable(JsonTableDefinition),
}

/// Ordered list of pending schema statements.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistrar {
    statements: Vec<SchemaStatement>,
}

impl SchemaRegistrar {
    /// Creates an empty registrar.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            statements: Vec::new(),
        }
    }

    /// Appends a raw statement. Nothing runs until [`Self::create_schema`].
    pub fn ensure_schema(&mut self, statement: impl Into<String>) {
        self.statements.push(SchemaStatement::Raw(statement.into()));
    }

    /// Appends a `CREATE [UNIQUE] INDEX` statement.
    ///
    /// Each key is `(column, ascending)`; `false` renders the column as `DESC`.
    /// Key order is preserved.
    pub fn ensure_index(&mut self, name: impl Into<String>, keys: &[(&str, bool)], options: IndexOptions) {
        self.statements.push(SchemaStatement::Index(IndexDefinition {
            name: name.into(),
            keys: keys
                .iter()
                .map(|(column, ascending)| ((*column).to_string(), *ascending))
                .collect(),
            options,
        }));
    }

    /// Appends a `CREATE TABLE` with an `id` primary key and a `data` column
    /// holding the entity as JSON.
    ///
    /// Types left as `None` use the dialect's defaults: `TEXT`/`TEXT` for
    /// `SQLite`, `TEXT`/`JSONB` for PostgreSQL, `VARCHAR(32)`/`NVARCHAR(MAX)`
    /// for SQL Server.
    pub fn ensure_table(&mut self, id_type: Option<&str>, data_type: Option<&str>) {
        self.statements.push(SchemaStatement::JsonTable(JsonTableDefinition {
            id_type: id_type.map(str::to_string),
            data_type: data_type.map(str::to_string),
        }));
    }

    /// Discards all pending statements.
    pub fn clear_schema(&mut self) {
        self.statements.clear();
    }

    /// Number of pending statements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.statements.len()
    }

    /// Returns true when nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    /// Renders the pending statements for `dialect`, in declaration order.
    #[must_use]
    pub fn render(&self, dialect: &dyn Dialect, table: &str) -> Vec<String> {
        self.statements
            .iter()
            .map(|statement| match statement {
                SchemaStatement::Raw(sql) => sql.clone(),
                SchemaStatement::Index(index) => render_index(dialect, table, index),
                SchemaStatement::JsonTable(definition) => render_json_table(dialect, table, definition),
            })
            .collect()
    }

    /// Runs the pending statements if `table` does not exist.
    ///
    /// Stops at the first failing statement and returns its error.
    ///
    /// # Errors
    ///
    /// Returns the backend error of the existence probe or of the first
    /// failing statement.
    pub async fn create_schema(
        &self,
        client: &dyn SqlClient,
        table: &str,
        correlation_id: Option<&str>,
    ) -> Result<()> {
        if self.statements.is_empty() {
            return Ok(());
        }

        let dialect = client.dialect();
        if table_exists(client, table).await? {
            return Ok(());
        }

        debug!(
            correlation_id,
            table, "Table does not exist. Creating database objects..."
        );

        for statement in self.render(dialect, table) {
            if let Err(e) = client.execute(&statement, &[]).await {
                error!(
                    correlation_id,
                    table,
                    statement = %statement,
                    error = %e,
                    "Failed to autocreate database object"
                );
                return Err(e);
            }
        }

        Ok(())
    }
}

/// Probes the catalog for `table`.
///
/// # Errors
///
/// Returns the backend error of the probe query.
pub async fn table_exists(client: &dyn SqlClient, table: &str) -> Result<bool> {
    let sql = client.dialect().table_exists_query(table);
    let rows = client.query(&sql, &[]).await?;
    Ok(rows
        .first()
        .and_then(|row| row.values().next())
        .is_some_and(|value| !value.is_null()))
}

fn render_json_table(dialect: &dyn Dialect, table: &str, definition: &JsonTableDefinition) -> String {
    let (default_id, default_data) = dialect.json_table_types();
    format!(
        "CREATE TABLE {} ({} {} PRIMARY KEY, {} {})",
        dialect.quote_identifier(table),
        dialect.quote_identifier(JSON_ID_COLUMN),
        definition.id_type.as_deref().unwrap_or(default_id),
        dialect.quote_identifier(JSON_DATA_COLUMN),
        definition.data_type.as_deref().unwrap_or(default_data),
    )
}

fn render_index(dialect: &dyn Dialect, table: &str, index: &IndexDefinition) -> String {
    let mut sql = String::from("CREATE");
    if index.options.unique {
        sql.push_str(" UNIQUE");
    }
    sql.push_str(" INDEX ");
    sql.push_str(&dialect.quote_identifier(&index.name));
    sql.push_str(" ON ");
    sql.push_str(&dialect.quote_identifier(table));
    if let Some(index_type) = &index.options.index_type {
        sql.push(' ');
        sql.push_str(index_type);
    }

    let columns = index
        .keys
        .iter()
        .map(|(column, ascending)| {
            let column = dialect.quote_identifier(column);
            if *ascending { column } else { format!("{column} DESC") }
        })
        .collect::<Vec<_>>()
        .join(",");
    sql.push_str(" (");
    sql.push_str(&columns);
    sql.push(')');
    sql
}
