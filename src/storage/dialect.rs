//! SQL dialect strategies.
//!
//! Everything that differs between backends at the statement level lives
//! behind [`Dialect`]: identifier delimiters, placeholders, paging, returning
//! the affected row from a mutation, the table-existence probe, literal
//! rendering, and the unique-violation predicate used by upsert.

use crate::DatabaseError;
use crate::models::SqlValue;
use std::fmt::Write as _;

/// Statement-level differences between SQL backends.
pub trait Dialect: Send + Sync + std::fmt::Debug {
    /// Backend name used in logs and metric labels.
    fn name(&self) -> &'static str;

    /// Opening and closing identifier delimiters.
    fn identifier_delimiters(&self) -> (char, char);

    /// Positional placeholder for the 1-based parameter `index`.
    fn placeholder(&self, index: usize) -> String;

    /// Clause appended after `ORDER BY` to select a page.
    fn paging_clause(&self, skip: i64, take: i64) -> String;

    /// `INSERT` that returns the inserted row.
    fn insert_returning(&self, table: &str, columns: &str, params: &str) -> String;

    /// `UPDATE` that returns the updated row.
    fn update_returning(&self, table: &str, set_clause: &str, where_clause: &str) -> String;

    /// `DELETE` that returns the deleted row.
    fn delete_returning(&self, table: &str, where_clause: &str) -> String;

    /// Query whose first row holds a non-null value iff `table` exists.
    ///
    /// `table` is the unquoted name, possibly `schema.table`.
    fn table_exists_query(&self, table: &str) -> String;

    /// Renders a boolean literal.
    fn bool_literal(&self, value: bool) -> &'static str;

    /// Renders a binary literal.
    fn blob_literal(&self, value: &[u8]) -> String;

    /// Returns true when the error reports a unique or primary key conflict.
    fn is_unique_violation(&self, error: &DatabaseError) -> bool;

    /// Default `(id, data)` column types of a JSON document table.
    fn json_table_types(&self) -> (&'static str, &'static str);

    /// Wraps each dotted segment of `name` in the dialect's delimiters.
    ///
    /// Empty names and names that already start with the opening delimiter
    /// are returned unchanged, so quoting is idempotent.
    fn quote_identifier(&self, name: &str) -> String {
        let (open, close) = self.identifier_delimiters();
        if name.is_empty() || name.starts_with(open) {
            return name.to_string();
        }
        let escaped_close: String = [close, close].iter().collect();
        name.split('.')
            .map(|segment| {
                let segment = segment.replace(close, &escaped_close);
                format!("{open}{segment}{close}")
            })
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Renders a value as an inline SQL literal with quotes escaped.
    fn render_literal(&self, value: &SqlValue) -> String {
        match value {
            SqlValue::Null => "NULL".to_string(),
            SqlValue::Bool(v) => self.bool_literal(*v).to_string(),
            SqlValue::Integer(v) => v.to_string(),
            SqlValue::Real(v) => v.to_string(),
            SqlValue::Text(v) => format!("'{}'", v.replace('\'', "''")),
            SqlValue::Blob(v) => self.blob_literal(v),
        }
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut out, b| {
        let _ = write!(out, "{b:02X}");
        out
    })
}

fn split_schema(table: &str) -> (Option<&str>, &str) {
    table
        .rsplit_once('.')
        .map_or((None, table), |(schema, name)| (Some(schema), name))
}

fn text_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// `SQLite` dialect.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDialect;

impl Dialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn identifier_delimiters(&self) -> (char, char) {
        ('"', '"')
    }

    fn placeholder(&self, index: usize) -> String {
        format!("?{index}")
    }

    fn paging_clause(&self, skip: i64, take: i64) -> String {
        format!("LIMIT {take} OFFSET {skip}")
    }

    fn insert_returning(&self, table: &str, columns: &str, params: &str) -> String {
        format!("INSERT INTO {table} ({columns}) VALUES ({params}) RETURNING *")
    }

    fn update_returning(&self, table: &str, set_clause: &str, where_clause: &str) -> String {
        format!("UPDATE {table} SET {set_clause} WHERE {where_clause} RETURNING *")
    }

    fn delete_returning(&self, table: &str, where_clause: &str) -> String {
        format!("DELETE FROM {table} WHERE {where_clause} RETURNING *")
    }

    fn table_exists_query(&self, table: &str) -> String {
        let (schema, name) = split_schema(table);
        let master = schema.map_or_else(
            || "sqlite_master".to_string(),
            |schema| format!("{}.sqlite_master", self.quote_identifier(schema)),
        );
        format!(
            "SELECT name FROM {master} WHERE type='table' AND name={}",
            text_literal(name)
        )
    }

    fn bool_literal(&self, value: bool) -> &'static str {
        if value { "1" } else { "0" }
    }

    fn blob_literal(&self, value: &[u8]) -> String {
        format!("X'{}'", hex(value))
    }

    fn is_unique_violation(&self, error: &DatabaseError) -> bool {
        // SQLITE_CONSTRAINT_PRIMARYKEY, SQLITE_CONSTRAINT_UNIQUE
        matches!(error.code.as_deref(), Some("1555" | "2067"))
    }

    fn json_table_types(&self) -> (&'static str, &'static str) {
        ("TEXT", "TEXT")
    }
}

/// PostgreSQL dialect.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDialect;

impl Dialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "postgresql"
    }

    fn identifier_delimiters(&self) -> (char, char) {
        ('"', '"')
    }

    fn placeholder(&self, index: usize) -> String {
        format!("${index}")
    }

    fn paging_clause(&self, skip: i64, take: i64) -> String {
        format!("OFFSET {skip} LIMIT {take}")
    }

    fn insert_returning(&self, table: &str, columns: &str, params: &str) -> String {
        format!("INSERT INTO {table} ({columns}) VALUES ({params}) RETURNING *")
    }

    fn update_returning(&self, table: &str, set_clause: &str, where_clause: &str) -> String {
        format!("UPDATE {table} SET {set_clause} WHERE {where_clause} RETURNING *")
    }

    fn delete_returning(&self, table: &str, where_clause: &str) -> String {
        format!("DELETE FROM {table} WHERE {where_clause} RETURNING *")
    }

    fn table_exists_query(&self, table: &str) -> String {
        // to_regclass yields NULL for a missing relation
        format!("SELECT to_regclass({})::text", text_literal(&self.quote_identifier(table)))
    }

    fn bool_literal(&self, value: bool) -> &'static str {
        if value { "TRUE" } else { "FALSE" }
    }

    fn blob_literal(&self, value: &[u8]) -> String {
        format!("'\\x{}'::bytea", hex(value))
    }

    fn is_unique_violation(&self, error: &DatabaseError) -> bool {
        error.code.as_deref() == Some("23505")
    }

    fn json_table_types(&self) -> (&'static str, &'static str) {
        ("TEXT", "JSONB")
    }
}

/// SQL Server dialect.
///
/// Statement generation only; no driver ships with this crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlServerDialect;

impl Dialect for SqlServerDialect {
    fn name(&self) -> &'static str {
        "sqlserver"
    }

    fn identifier_delimiters(&self) -> (char, char) {
        ('[', ']')
    }

    fn placeholder(&self, index: usize) -> String {
        format!("@{index}")
    }

    fn paging_clause(&self, skip: i64, take: i64) -> String {
        format!("OFFSET {skip} ROWS FETCH NEXT {take} ROWS ONLY")
    }

    fn insert_returning(&self, table: &str, columns: &str, params: &str) -> String {
        format!("INSERT INTO {table} ({columns}) OUTPUT INSERTED.* VALUES ({params})")
    }

    fn update_returning(&self, table: &str, set_clause: &str, where_clause: &str) -> String {
        format!("UPDATE {table} SET {set_clause} OUTPUT INSERTED.* WHERE {where_clause}")
    }

    fn delete_returning(&self, table: &str, where_clause: &str) -> String {
        format!("DELETE FROM {table} OUTPUT DELETED.* WHERE {where_clause}")
    }

    fn table_exists_query(&self, table: &str) -> String {
        format!(
            "SELECT OBJECT_ID({}, 'U') AS oid",
            text_literal(&self.quote_identifier(table))
        )
    }

    fn bool_literal(&self, value: bool) -> &'static str {
        if value { "1" } else { "0" }
    }

    fn blob_literal(&self, value: &[u8]) -> String {
        format!("0x{}", hex(value))
    }

    fn is_unique_violation(&self, error: &DatabaseError) -> bool {
        // 2601: duplicate key in unique index, 2627: unique constraint violation
        matches!(error.code.as_deref(), Some("2601" | "2627"))
    }

    fn json_table_types(&self) -> (&'static str, &'static str) {
        ("VARCHAR(32)", "NVARCHAR(MAX)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(&SqliteDialect, "LIMIT 10 OFFSET 20" ; "sqlite")]
    #[test_case(&PostgresDialect, "OFFSET 20 LIMIT 10" ; "postgres")]
    #[test_case(&SqlServerDialect, "OFFSET 20 ROWS FETCH NEXT 10 ROWS ONLY" ; "sqlserver")]
    fn test_paging_clause(dialect: &dyn Dialect, expected: &str) {
        assert_eq!(dialect.paging_clause(20, 10), expected);
    }

    #[test_case(&SqliteDialect, "?3" ; "sqlite")]
    #[test_case(&PostgresDialect, "$3" ; "postgres")]
    #[test_case(&SqlServerDialect, "@3" ; "sqlserver")]
    fn test_placeholder(dialect: &dyn Dialect, expected: &str) {
        assert_eq!(dialect.placeholder(3), expected);
    }

    #[test_case(&SqlServerDialect, "a.b", "[a].[b]" ; "sqlserver dotted")]
    #[test_case(&SqlServerDialect, "[a].[b]", "[a].[b]" ; "sqlserver already quoted")]
    #[test_case(&SqliteDialect, "dummies", "\"dummies\"" ; "sqlite plain")]
    #[test_case(&PostgresDialect, "public.dummies", "\"public\".\"dummies\"" ; "postgres dotted")]
    #[test_case(&SqliteDialect, "", "" ; "empty")]
    fn test_quote_identifier(dialect: &dyn Dialect, input: &str, expected: &str) {
        assert_eq!(dialect.quote_identifier(input), expected);
    }

    #[test]
    fn test_quote_identifier_escapes_closing_delimiter() {
        assert_eq!(SqlServerDialect.quote_identifier("a]b"), "[a]]b]");
        assert_eq!(SqliteDialect.quote_identifier("a\"b"), "\"a\"\"b\"");
    }

    #[test_case(&SqliteDialect, Some("1555"), true ; "sqlite primary key")]
    #[test_case(&SqliteDialect, Some("2067"), true ; "sqlite unique")]
    #[test_case(&SqliteDialect, Some("19"), false ; "sqlite other constraint")]
    #[test_case(&PostgresDialect, Some("23505"), true ; "postgres unique")]
    #[test_case(&PostgresDialect, Some("23503"), false ; "postgres foreign key")]
    #[test_case(&SqlServerDialect, Some("2601"), true ; "sqlserver index")]
    #[test_case(&SqlServerDialect, Some("2627"), true ; "sqlserver constraint")]
    #[test_case(&SqlServerDialect, None, false ; "no code")]
    fn test_is_unique_violation(dialect: &dyn Dialect, code: Option<&str>, expected: bool) {
        let error = DatabaseError::new(code.map(String::from), "conflict");
        assert_eq!(dialect.is_unique_violation(&error), expected);
    }

    #[test]
    fn test_returning_statements() {
        assert_eq!(
            SqlServerDialect.insert_returning("[t]", "[a]", "@1"),
            "INSERT INTO [t] ([a]) OUTPUT INSERTED.* VALUES (@1)"
        );
        assert_eq!(
            SqliteDialect.delete_returning("\"t\"", "\"id\"=?1"),
            "DELETE FROM \"t\" WHERE \"id\"=?1 RETURNING *"
        );
        assert_eq!(
            PostgresDialect.update_returning("\"t\"", "\"a\"=$1", "\"id\"=$2"),
            "UPDATE \"t\" SET \"a\"=$1 WHERE \"id\"=$2 RETURNING *"
        );
    }

    #[test]
    fn test_table_exists_queries() {
        assert_eq!(
            SqliteDialect.table_exists_query("dummies"),
            "SELECT name FROM sqlite_master WHERE type='table' AND name='dummies'"
        );
        assert_eq!(
            SqliteDialect.table_exists_query("aux.dummies"),
            "SELECT name FROM \"aux\".sqlite_master WHERE type='table' AND name='dummies'"
        );
        assert_eq!(
            PostgresDialect.table_exists_query("public.dummies"),
            "SELECT to_regclass('\"public\".\"dummies\"')::text"
        );
        assert_eq!(
            SqlServerDialect.table_exists_query("dbo.dummies"),
            "SELECT OBJECT_ID('[dbo].[dummies]', 'U') AS oid"
        );
    }

    #[test]
    fn test_render_literal() {
        assert_eq!(SqliteDialect.render_literal(&SqlValue::Null), "NULL");
        assert_eq!(SqliteDialect.render_literal(&SqlValue::Text("it's".into())), "'it''s'");
        assert_eq!(SqliteDialect.render_literal(&SqlValue::Blob(vec![0xAB, 1])), "X'AB01'");
        assert_eq!(PostgresDialect.render_literal(&SqlValue::Bool(false)), "FALSE");
        assert_eq!(SqlServerDialect.render_literal(&SqlValue::Blob(vec![0xff])), "0xFF");
    }
}
