//! # sqlpersist
//!
//! Generic relational persistence for identifiable domain objects.
//!
//! A concrete persistence type names a table, supplies a [`RowCodec`] that
//! converts between its public entity and a flat [`Row`], and optionally
//! declares schema statements. The engine then provides connection lifecycle,
//! lazy schema creation, paging, filtering, partial updates and upsert without
//! hand-written SQL.
//!
//! ## Layers
//!
//! - [`SqlConnection`]: owns the pooled driver client
//! - [`SchemaRegistrar`]: pending DDL, executed once when the table is missing
//! - [`SqlBuilder`]: column lists, placeholders, `SET` clauses, quoting
//! - [`SqlPersistence`]: open/close/clear plus filter, page, count and create
//! - [`IdentifiableSqlPersistence`]: get/update/delete by id and `set` (upsert)
//! - [`IdentifiableJsonSqlPersistence`]: the same over an `id` + `data` JSON document table
//!
//! ## Example
//!
//! ```rust,ignore
//! use sqlpersist::{IdentifiableSqlPersistence, PersistenceConfig, SerdeCodec};
//!
//! let config = PersistenceConfig::new()
//!     .with_table("dummies")
//!     .with_uri("sqlite::memory:");
//! let mut persistence: IdentifiableSqlPersistence<Dummy, String, _> =
//!     IdentifiableSqlPersistence::new("dummies", SerdeCodec::new()).with_config(config);
//! persistence.ensure_schema("CREATE TABLE dummies (id TEXT PRIMARY KEY, key TEXT, content TEXT)");
//! persistence.open(None).await?;
//! let created = persistence.create(None, &dummy).await?;
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
#![allow(clippy::multiple_crate_versions)]

use std::fmt;
use thiserror::Error as ThisError;

pub mod config;
pub mod models;
pub mod observability;
pub mod storage;

pub use config::{ConnectionConfig, ConnectionOptions, PersistenceConfig};
pub use models::{
    DataPage, Filter, IdGenerator, IdValue, Identifiable, PagingParams, Row, SqlValue,
};
pub use storage::{
    ConnectionResolver, Dialect, IdentifiableJsonSqlPersistence, IdentifiableSqlPersistence,
    JsonRowCodec, LifecycleState, RowCodec, SchemaRegistrar, SerdeCodec, SqlBuilder, SqlClient,
    SqlConnection, SqlPersistence, StaticConnectionResolver,
};

/// Error code reported when a connection cannot be established.
pub const CONNECT_FAILED: &str = "CONNECT_FAILED";
/// Error code reported when closing a connection fails.
pub const DISCONNECT_FAILED: &str = "DISCONNECT_FAILED";
/// Error code reported when no connection object is available.
pub const NO_CONNECTION: &str = "NO_CONNECTION";

/// Error type for persistence operations.
///
/// # Error Variant Triggers
///
/// | Variant | Raised When |
/// |---------|-------------|
/// | `Connection` | URI resolution, connect, disconnect or schema bootstrap fails |
/// | `InvalidState` | An operation needs a connection that does not exist or is not open |
/// | `Configuration` | Required configuration (e.g. the table name) is missing |
/// | `Database` | The backend rejects a SELECT/INSERT/UPDATE/DELETE statement |
/// | `InvalidInput` | A codec cannot convert between entity and row |
/// | `OperationFailed` | Runtime plumbing fails (blocking task, config file I/O) |
/// | `FeatureNotEnabled` | A backend requires a Cargo feature that is not compiled in |
#[derive(Debug, ThisError)]
pub enum Error {
    /// Connection resolution, connect or disconnect failure.
    ///
    /// Always carries the underlying cause when one exists.
    #[error("{code}: {message}")]
    Connection {
        /// Machine-readable code (`CONNECT_FAILED`, `DISCONNECT_FAILED`).
        code: String,
        /// Human-readable description.
        message: String,
        /// Correlation id of the failed call.
        correlation_id: Option<String>,
        /// The wrapped failure.
        #[source]
        cause: Option<Box<Self>>,
    },

    /// An operation was attempted without a required connection present.
    #[error("{code}: {message}")]
    InvalidState {
        /// Machine-readable code (`NO_CONNECTION`, `NOT_OPENED`).
        code: String,
        /// Human-readable description.
        message: String,
        /// Correlation id of the failed call.
        correlation_id: Option<String>,
    },

    /// Required configuration is missing or malformed.
    #[error("{code}: {message}")]
    Configuration {
        /// Machine-readable code.
        code: String,
        /// Human-readable description.
        message: String,
    },

    /// The backend reported an error; propagated verbatim.
    #[error(transparent)]
    Database(#[from] DatabaseError),

    /// Conversion between entity and row failed.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An operation failed outside the database itself.
    #[error("operation '{operation}' failed: {cause}")]
    OperationFailed {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },

    /// Feature not enabled (requires feature flag).
    #[error("feature not enabled: {0} (compile with --features {0})")]
    FeatureNotEnabled(String),
}

impl Error {
    /// Builds a [`Error::Connection`] without a cause.
    pub fn connection(
        correlation_id: Option<&str>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Connection {
            code: code.into(),
            message: message.into(),
            correlation_id: correlation_id.map(String::from),
            cause: None,
        }
    }

    /// Builds a [`Error::InvalidState`].
    pub fn invalid_state(
        correlation_id: Option<&str>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidState {
            code: code.into(),
            message: message.into(),
            correlation_id: correlation_id.map(String::from),
        }
    }

    /// Builds a [`Error::Configuration`].
    pub fn configuration(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Configuration {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Attaches a cause to a connection error. Other variants are returned unchanged.
    #[must_use]
    pub fn with_cause(self, error: Self) -> Self {
        match self {
            Self::Connection {
                code,
                message,
                correlation_id,
                ..
            } => Self::Connection {
                code,
                message,
                correlation_id,
                cause: Some(Box::new(error)),
            },
            other => other,
        }
    }

    /// Returns the machine-readable code for coded variants.
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Connection { code, .. }
            | Self::InvalidState { code, .. }
            | Self::Configuration { code, .. } => Some(code.as_str()),
            Self::Database(e) => e.code.as_deref(),
            _ => None,
        }
    }
}

/// An error reported by the database backend.
///
/// `code` is the backend's own error code rendered as a string: the `SQLite`
/// extended result code, the PostgreSQL SQLSTATE, or the SQL Server error number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseError {
    /// Backend error code, when the driver reports one.
    pub code: Option<String>,
    /// Driver message.
    pub message: String,
}

impl DatabaseError {
    /// Creates a database error.
    pub fn new(code: Option<String>, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for DatabaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "database error {code}: {}", self.message),
            None => write!(f, "database error: {}", self.message),
        }
    }
}

impl std::error::Error for DatabaseError {}

impl From<rusqlite::Error> for DatabaseError {
    fn from(e: rusqlite::Error) -> Self {
        let code = match &e {
            rusqlite::Error::SqliteFailure(inner, _) => Some(inner.extended_code.to_string()),
            _ => None,
        };
        Self::new(code, e.to_string())
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Self::Database(e.into())
    }
}

#[cfg(feature = "postgres")]
impl From<tokio_postgres::Error> for DatabaseError {
    fn from(e: tokio_postgres::Error) -> Self {
        let code = e.code().map(|state| state.code().to_string());
        let message = e
            .as_db_error()
            .map_or_else(|| e.to_string(), |db| db.message().to_string());
        Self::new(code, message)
    }
}

#[cfg(feature = "postgres")]
impl From<tokio_postgres::Error> for Error {
    fn from(e: tokio_postgres::Error) -> Self {
        Self::Database(e.into())
    }
}

/// Result type alias for persistence operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::connection(Some("123"), CONNECT_FAILED, "Connection to sqlite failed");
        assert_eq!(err.to_string(), "CONNECT_FAILED: Connection to sqlite failed");

        let err = Error::InvalidInput("bad row".to_string());
        assert_eq!(err.to_string(), "invalid input: bad row");

        let err = Error::Database(DatabaseError::new(Some("23505".into()), "duplicate key"));
        assert_eq!(err.to_string(), "database error 23505: duplicate key");
    }

    #[test]
    fn test_with_cause_keeps_source() {
        let cause = Error::Database(DatabaseError::new(None, "refused"));
        let err = Error::connection(None, CONNECT_FAILED, "failed").with_cause(cause);

        let source = std::error::Error::source(&err).map(ToString::to_string);
        assert_eq!(source.as_deref(), Some("database error: refused"));
        assert_eq!(err.code(), Some(CONNECT_FAILED));
    }

    #[test]
    fn test_with_cause_ignores_other_variants() {
        let err = Error::configuration("NO_TABLE_NAME", "Table name is not defined")
            .with_cause(Error::InvalidInput("x".into()));
        assert!(matches!(err, Error::Configuration { .. }));
    }

    #[test]
    fn test_sqlite_error_code_is_extended() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (id TEXT PRIMARY KEY); INSERT INTO t VALUES ('1');")
            .unwrap();
        let err = conn.execute("INSERT INTO t VALUES ('1')", []).unwrap_err();
        let db: DatabaseError = err.into();
        assert_eq!(db.code.as_deref(), Some("1555"));
    }
}
