//! Structured filter builder.
//!
//! Persistence operations accept raw `WHERE` fragments, which callers must
//! sanitize themselves. [`Filter`] is an alternative that renders conditions
//! with quoted identifiers and escaped literals for a given dialect.

use super::SqlValue;
use crate::storage::Dialect;

#[derive(Debug, Clone, PartialEq)]
enum Condition {
    Compare {
        column: String,
        op: &'static str,
        value: SqlValue,
    },
    Like {
        column: String,
        pattern: String,
    },
    In {
        column: String,
        values: Vec<SqlValue>,
    },
    IsNull {
        column: String,
        negated: bool,
    },
}

/// A conjunction of column conditions.
///
/// # Example
///
/// ```rust,ignore
/// let filter = Filter::new().eq("key", "Key 1").gt("count", 3);
/// let page = persistence
///     .get_page_by_filter(None, &persistence.render_filter(&filter), None, None, None)
///     .await?;
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<Condition>,
}

impl Filter {
    /// Creates an empty filter that matches every row.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            conditions: Vec::new(),
        }
    }

    fn compare(mut self, column: &str, op: &'static str, value: impl Into<SqlValue>) -> Self {
        self.conditions.push(Condition::Compare {
            column: column.to_string(),
            op,
            value: value.into(),
        });
        self
    }

    /// `column = value`. A null value renders as `IS NULL`.
    #[must_use]
    pub fn eq(self, column: &str, value: impl Into<SqlValue>) -> Self {
        self.compare(column, "=", value)
    }

    /// `column <> value`. A null value renders as `IS NOT NULL`.
    #[must_use]
    pub fn ne(self, column: &str, value: impl Into<SqlValue>) -> Self {
        self.compare(column, "<>", value)
    }

    /// `column > value`.
    #[must_use]
    pub fn gt(self, column: &str, value: impl Into<SqlValue>) -> Self {
        self.compare(column, ">", value)
    }

    /// `column >= value`.
    #[must_use]
    pub fn gte(self, column: &str, value: impl Into<SqlValue>) -> Self {
        self.compare(column, ">=", value)
    }

    /// `column < value`.
    #[must_use]
    pub fn lt(self, column: &str, value: impl Into<SqlValue>) -> Self {
        self.compare(column, "<", value)
    }

    /// `column <= value`.
    #[must_use]
    pub fn lte(self, column: &str, value: impl Into<SqlValue>) -> Self {
        self.compare(column, "<=", value)
    }

    /// `column LIKE pattern`.
    #[must_use]
    pub fn like(mut self, column: &str, pattern: impl Into<String>) -> Self {
        self.conditions.push(Condition::Like {
            column: column.to_string(),
            pattern: pattern.into(),
        });
        self
    }

    /// `column IN (values...)`. An empty list matches nothing.
    #[must_use]
    pub fn in_list<V: Into<SqlValue>>(
        mut self,
        column: &str,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        self.conditions.push(Condition::In {
            column: column.to_string(),
            values: values.into_iter().map(Into::into).collect(),
        });
        self
    }

    /// `column IS NULL`.
    #[must_use]
    pub fn is_null(mut self, column: &str) -> Self {
        self.conditions.push(Condition::IsNull {
            column: column.to_string(),
            negated: false,
        });
        self
    }

    /// `column IS NOT NULL`.
    #[must_use]
    pub fn is_not_null(mut self, column: &str) -> Self {
        self.conditions.push(Condition::IsNull {
            column: column.to_string(),
            negated: true,
        });
        self
    }

    /// Returns true when no conditions were added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Renders the filter as a `WHERE` fragment, without the keyword.
    ///
    /// An empty filter renders as an empty string.
    #[must_use]
    pub fn render(&self, dialect: &dyn Dialect) -> String {
        self.conditions
            .iter()
            .map(|condition| render_condition(condition, dialect))
            .collect::<Vec<_>>()
            .join(" AND ")
    }
}

fn render_condition(condition: &Condition, dialect: &dyn Dialect) -> String {
    match condition {
        Condition::Compare { column, op, value } => {
            let column = dialect.quote_identifier(column);
            match (value, *op) {
                (SqlValue::Null, "=") => format!("{column} IS NULL"),
                (SqlValue::Null, "<>") => format!("{column} IS NOT NULL"),
                _ => format!("{column}{op}{}", dialect.render_literal(value)),
            }
        },
        Condition::Like { column, pattern } => format!(
            "{} LIKE {}",
            dialect.quote_identifier(column),
            dialect.render_literal(&SqlValue::Text(pattern.clone()))
        ),
        Condition::In { values, .. } if values.is_empty() => "1=0".to_string(),
        Condition::In { column, values } => {
            let list = values
                .iter()
                .map(|value| dialect.render_literal(value))
                .collect::<Vec<_>>()
                .join(",");
            format!("{} IN ({list})", dialect.quote_identifier(column))
        },
        Condition::IsNull { column, negated } => {
            let not = if *negated { " NOT" } else { "" };
            format!("{} IS{not} NULL", dialect.quote_identifier(column))
        },
    }
}
