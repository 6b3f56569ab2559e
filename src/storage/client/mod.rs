//! Driver boundary.
//!
//! A [`SqlClient`] executes parameterized SQL against one backend and hands
//! back rows as [`Row`]s. Clients are created from a URI by [`connect`]:
//!
//! | URI | Backend |
//! |-----|---------|
//! | `sqlite::memory:`, `:memory:` | in-memory `SQLite` |
//! | `sqlite://<path>`, `sqlite:<path>`, `file:<uri>`, plain path | file-backed `SQLite` |
//! | `postgres://…`, `postgresql://…` | PostgreSQL pool (feature `postgres`) |

mod sqlite;

#[cfg(feature = "postgres")]
mod postgresql;

pub use sqlite::SqliteClient;

#[cfg(feature = "postgres")]
pub use postgresql::PostgresClient;

use super::Dialect;
use crate::config::ConnectionOptions;
use crate::models::{Row, SqlValue};
use crate::{Error, Result};
use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard};

/// An open handle to a database that executes parameterized statements.
///
/// Implementations may serve concurrent calls; pooling is the client's concern.
#[async_trait]
pub trait SqlClient: Send + Sync {
    /// Dialect used to build statements for this client.
    fn dialect(&self) -> &dyn Dialect;

    /// Name of the connected database, when known.
    fn database_name(&self) -> Option<String>;

    /// Runs a statement and returns all result rows.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Database`] with the backend's error code.
    async fn query(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>>;

    /// Runs a statement and returns the number of affected rows.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Database`] with the backend's error code.
    async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<u64>;

    /// Releases the underlying connection or pool.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails to shut down cleanly.
    async fn close(&self) -> Result<()>;
}

/// Opens a client for `uri`.
///
/// # Errors
///
/// Returns [`Error::FeatureNotEnabled`] for a PostgreSQL URI without the
/// `postgres` feature, or the backend error if the connection fails.
pub async fn connect(uri: &str, options: &ConnectionOptions) -> Result<Arc<dyn SqlClient>> {
    if is_postgres_uri(uri) {
        return connect_postgres(uri, options).await;
    }
    let client = SqliteClient::open(uri, options).await?;
    Ok(Arc::new(client))
}

pub(crate) fn is_postgres_uri(uri: &str) -> bool {
    uri.starts_with("postgres://") || uri.starts_with("postgresql://")
}

#[cfg(feature = "postgres")]
async fn connect_postgres(uri: &str, options: &ConnectionOptions) -> Result<Arc<dyn SqlClient>> {
    let client = PostgresClient::open(uri, options).await?;
    Ok(Arc::new(client))
}

#[cfg(not(feature = "postgres"))]
#[allow(clippy::unused_async)]
async fn connect_postgres(_uri: &str, _options: &ConnectionOptions) -> Result<Arc<dyn SqlClient>> {
    Err(Error::FeatureNotEnabled("postgres".to_string()))
}

/// Acquires a mutex, recovering the inner value if a previous holder panicked.
pub(crate) fn acquire_lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::warn!("Connection mutex was poisoned, recovering");
            metrics::counter!("sql_mutex_poison_recovery_total").increment(1);
            poisoned.into_inner()
        },
    }
}

/// Maps a failed blocking-task join into an error.
#[allow(clippy::needless_pass_by_value)]
fn join_error(operation: &str, e: tokio::task::JoinError) -> Error {
    Error::OperationFailed {
        operation: operation.to_string(),
        cause: e.to_string(),
    }
}
