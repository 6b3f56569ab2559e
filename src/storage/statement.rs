//! Statement builder.
//!
//! Pure helpers that turn rows and column lists into SQL fragments. For any
//! row, the column list, the placeholder list, the `SET` clause, and the
//! value list are produced in the same order; callers rely on that to bind
//! the i-th value to the i-th column.

use super::Dialect;
use crate::models::{ColumnNames, Row, SqlValue};

/// Builds SQL fragments for one dialect.
#[derive(Debug, Clone, Copy)]
pub struct SqlBuilder<'d> {
    dialect: &'d dyn Dialect,
}

impl<'d> SqlBuilder<'d> {
    /// Creates a builder for `dialect`.
    #[must_use]
    pub const fn new(dialect: &'d dyn Dialect) -> Self {
        Self { dialect }
    }

    /// The builder's dialect.
    #[must_use]
    pub const fn dialect(&self) -> &'d dyn Dialect {
        self.dialect
    }

    /// Quotes a possibly dotted identifier. Idempotent.
    #[must_use]
    pub fn quote_identifier(&self, name: &str) -> String {
        self.dialect.quote_identifier(name)
    }

    /// Comma-joined quoted column names, e.g. `"id","key"`.
    #[must_use]
    pub fn generate_columns<R: ColumnNames + ?Sized>(&self, row: &R) -> String {
        row.column_names()
            .into_iter()
            .map(|name| self.quote_identifier(name))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Comma-joined placeholders, one per column, starting at index 1.
    #[must_use]
    pub fn generate_parameters<R: ColumnNames + ?Sized>(&self, row: &R) -> String {
        self.placeholders(1, row.column_names().len())
    }

    /// Comma-joined `col=<placeholder>` assignments starting at index 1.
    #[must_use]
    pub fn generate_set_parameters<R: ColumnNames + ?Sized>(&self, row: &R) -> String {
        row.column_names()
            .into_iter()
            .enumerate()
            .map(|(i, name)| {
                format!(
                    "{}={}",
                    self.quote_identifier(name),
                    self.dialect.placeholder(i + 1)
                )
            })
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Values in column order.
    #[must_use]
    pub fn generate_values(&self, row: &Row) -> Vec<SqlValue> {
        row.values().cloned().collect()
    }

    /// `count` comma-joined placeholders starting at `first`.
    #[must_use]
    pub fn placeholders(&self, first: usize, count: usize) -> String {
        (first..first + count)
            .map(|i| self.dialect.placeholder(i))
            .collect::<Vec<_>>()
            .join(",")
    }
}
