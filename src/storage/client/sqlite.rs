//! `SQLite` client.

use super::{SqlClient, acquire_lock, join_error};
use crate::config::ConnectionOptions;
use crate::models::{Row, SqlValue};
use crate::storage::metrics::observe;
use crate::storage::{Dialect, SqliteDialect};
use crate::{DatabaseError, Error, Result};
use async_trait::async_trait;
use rusqlite::{Connection, OpenFlags, params_from_iter};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::instrument;

const BACKEND: &str = "sqlite";

/// Where a `SQLite` URI points.
#[derive(Debug, Clone, PartialEq, Eq)]
enum SqliteTarget {
    Memory,
    Path(PathBuf),
    Uri(String),
}

impl SqliteTarget {
    fn parse(uri: &str) -> Result<Self> {
        let uri = uri.trim();
        let target = match uri {
            ":memory:" | "sqlite::memory:" | "sqlite://:memory:" => Self::Memory,
            _ if uri.starts_with("file:") => Self::Uri(uri.to_string()),
            _ => {
                let path = uri
                    .strip_prefix("sqlite://")
                    .or_else(|| uri.strip_prefix("sqlite:"))
                    .unwrap_or(uri);
                Self::Path(PathBuf::from(path))
            },
        };

        if matches!(&target, Self::Path(path) if path.as_os_str().is_empty()) {
            return Err(Error::configuration(
                "INVALID_CONFIG",
                format!("SQLite URI '{uri}' has no database path"),
            ));
        }
        Ok(target)
    }

    fn database_name(&self) -> String {
        match self {
            Self::Memory => "memory".to_string(),
            Self::Path(path) => file_stem(path),
            Self::Uri(uri) => {
                let path = uri.trim_start_matches("file:");
                let path = path.split('?').next().unwrap_or(path);
                file_stem(Path::new(path))
            },
        }
    }

    fn open(&self) -> rusqlite::Result<Connection> {
        match self {
            Self::Memory => Connection::open_in_memory(),
            Self::Path(path) => Connection::open(path),
            Self::Uri(uri) => Connection::open_with_flags(
                uri,
                OpenFlags::SQLITE_OPEN_READ_WRITE
                    | OpenFlags::SQLITE_OPEN_CREATE
                    | OpenFlags::SQLITE_OPEN_URI
                    | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            ),
        }
    }
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map_or_else(|| "main".to_string(), |stem| stem.to_string_lossy().into_owned())
}

/// `SQLite` client over a single connection.
///
/// # Concurrency Model
///
/// Uses a `Mutex<Connection>` because `rusqlite::Connection` is not `Sync`.
/// Calls are serialized and run on the blocking thread pool. `busy_timeout`
/// is set from the connect timeout so that file databases shared with other
/// processes wait for locks instead of failing immediately.
///
/// # Connection Options
///
/// Only `connect_timeout` applies. There is no pool, so `max_pool_size` and
/// `idle_timeout` are ignored, and statements are not cancelled after
/// `request_timeout`.
pub struct SqliteClient {
    conn: Arc<Mutex<Option<Connection>>>,
    database_name: String,
}

impl SqliteClient {
    /// Opens a client for a `SQLite` URI.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Database`] if the database cannot be opened.
    #[instrument(skip(options), fields(backend = BACKEND))]
    pub async fn open(uri: &str, options: &ConnectionOptions) -> Result<Self> {
        let target = SqliteTarget::parse(uri)?;
        let busy_timeout = options.connect_timeout;
        let database_name = target.database_name();

        let start = Instant::now();
        let conn = tokio::task::spawn_blocking(move || -> Result<Connection> {
            let conn = target.open()?;
            configure_connection(&conn, &target, busy_timeout)?;
            Ok(conn)
        })
        .await
        .map_err(|e| join_error("sqlite_open", e));
        let conn = observe(BACKEND, "connect", start, conn.and_then(|r| r))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(Some(conn))),
            database_name,
        })
    }

    /// Opens an in-memory database (useful for testing).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Database`] if the database cannot be opened.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Arc::new(Mutex::new(Some(conn))),
            database_name: "memory".to_string(),
        })
    }

    /// Returns true until [`SqlClient::close`] has run.
    #[must_use]
    pub fn is_open(&self) -> bool {
        acquire_lock(&self.conn).is_some()
    }

    /// Runs `f` against the connection on the blocking thread pool.
    async fn with_connection<F, T>(&self, operation: &'static str, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let start = Instant::now();
        let result = tokio::task::spawn_blocking(move || {
            let guard = acquire_lock(&conn);
            let Some(conn) = guard.as_ref() else {
                return Err(Error::invalid_state(
                    None,
                    "NOT_OPENED",
                    "SQLite connection is closed",
                ));
            };
            f(conn)
        })
        .await
        .map_err(|e| join_error(operation, e))
        .and_then(|r| r);
        observe(BACKEND, operation, start, result)
    }
}

/// Applies pragmas for concurrency and lock waiting.
fn configure_connection(
    conn: &Connection,
    target: &SqliteTarget,
    busy_timeout: Duration,
) -> Result<()> {
    if !matches!(target, SqliteTarget::Memory) {
        // journal_mode returns a row, so pragma_update is used and the value ignored
        let _ = conn.pragma_update(None, "journal_mode", "WAL");
        let _ = conn.pragma_update(None, "synchronous", "NORMAL");
    }
    conn.busy_timeout(busy_timeout)?;
    Ok(())
}

fn query_rows(conn: &Connection, sql: &str, params: &[SqlValue]) -> rusqlite::Result<Vec<Row>> {
    let mut stmt = conn.prepare(sql)?;
    let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let mut rows = stmt.query(params_from_iter(params.iter()))?;

    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut decoded = Row::new();
        for (i, name) in names.iter().enumerate() {
            decoded.insert(name.clone(), SqlValue::from(row.get_ref(i)?));
        }
        out.push(decoded);
    }
    Ok(out)
}

#[async_trait]
impl SqlClient for SqliteClient {
    fn dialect(&self) -> &dyn Dialect {
        &SqliteDialect
    }

    fn database_name(&self) -> Option<String> {
        Some(self.database_name.clone())
    }

    async fn query(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>> {
        let sql = sql.to_string();
        let params = params.to_vec();
        self.with_connection("query", move |conn| {
            query_rows(conn, &sql, &params).map_err(Error::from)
        })
        .await
    }

    async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<u64> {
        let sql = sql.to_string();
        let params = params.to_vec();
        self.with_connection("execute", move |conn| {
            let affected = conn.execute(&sql, params_from_iter(params.iter()))?;
            Ok(affected as u64)
        })
        .await
    }

    async fn close(&self) -> Result<()> {
        let conn = Arc::clone(&self.conn);
        let start = Instant::now();
        let result = tokio::task::spawn_blocking(move || {
            let taken = acquire_lock(&conn).take();
            match taken {
                Some(conn) => conn
                    .close()
                    .map_err(|(_, e)| Error::Database(DatabaseError::from(e))),
                None => Ok(()),
            }
        })
        .await
        .map_err(|e| join_error("sqlite_close", e))
        .and_then(|r| r);
        observe(BACKEND, "close", start, result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_targets() {
        assert_eq!(SqliteTarget::parse("sqlite::memory:").unwrap(), SqliteTarget::Memory);
        assert_eq!(SqliteTarget::parse(":memory:").unwrap(), SqliteTarget::Memory);
        assert_eq!(
            SqliteTarget::parse("sqlite:///tmp/a.db").unwrap(),
            SqliteTarget::Path(PathBuf::from("/tmp/a.db"))
        );
        assert_eq!(
            SqliteTarget::parse("sqlite:data/a.db").unwrap(),
            SqliteTarget::Path(PathBuf::from("data/a.db"))
        );
        assert_eq!(
            SqliteTarget::parse("file:a.db?mode=rwc").unwrap(),
            SqliteTarget::Uri("file:a.db?mode=rwc".to_string())
        );
        assert!(SqliteTarget::parse("sqlite://").is_err());
    }

    #[tokio::test]
    async fn test_connect_timeout_becomes_busy_timeout() {
        let options = ConnectionOptions {
            max_pool_size: 1,
            connect_timeout: Duration::from_millis(250),
            request_timeout: Duration::from_millis(1),
            idle_timeout: Duration::ZERO,
        };
        let client = SqliteClient::open("sqlite::memory:", &options).await.unwrap();

        let rows = client.query("PRAGMA busy_timeout", &[]).await.unwrap();
        assert_eq!(rows[0].values().next(), Some(&SqlValue::Integer(250)));
    }

    #[test]
    fn test_database_name() {
        assert_eq!(SqliteTarget::Memory.database_name(), "memory");
        assert_eq!(
            SqliteTarget::Path(PathBuf::from("/tmp/dummies.db")).database_name(),
            "dummies"
        );
        assert_eq!(
            SqliteTarget::Uri("file:/tmp/items.sqlite?mode=rwc".to_string()).database_name(),
            "items"
        );
    }

    #[tokio::test]
    async fn test_query_and_execute() {
        let client = SqliteClient::in_memory().unwrap();
        client
            .execute("CREATE TABLE t (id TEXT PRIMARY KEY, n INTEGER, r REAL, b BLOB)", &[])
            .await
            .unwrap();

        let affected = client
            .execute(
                "INSERT INTO t (id, n, r, b) VALUES (?1, ?2, ?3, ?4)",
                &[
                    SqlValue::from("a"),
                    SqlValue::Integer(3),
                    SqlValue::Real(0.5),
                    SqlValue::Blob(vec![1, 2]),
                ],
            )
            .await
            .unwrap();
        assert_eq!(affected, 1);

        let rows = client
            .query("SELECT * FROM t WHERE id = ?1", &[SqlValue::from("a")])
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].columns().collect::<Vec<_>>(), vec!["id", "n", "r", "b"]);
        assert_eq!(rows[0].get("n"), Some(&SqlValue::Integer(3)));
        assert_eq!(rows[0].get("b"), Some(&SqlValue::Blob(vec![1, 2])));
    }

    #[tokio::test]
    async fn test_bool_stored_as_integer() {
        let client = SqliteClient::in_memory().unwrap();
        let rows = client
            .query("SELECT ?1 AS flag", &[SqlValue::Bool(true)])
            .await
            .unwrap();
        assert_eq!(rows[0].get("flag"), Some(&SqlValue::Integer(1)));
    }

    #[tokio::test]
    async fn test_constraint_error_carries_code() {
        let client = SqliteClient::in_memory().unwrap();
        client
            .execute("CREATE TABLE t (id TEXT PRIMARY KEY)", &[])
            .await
            .unwrap();
        client.execute("INSERT INTO t VALUES ('x')", &[]).await.unwrap();

        let err = client.execute("INSERT INTO t VALUES ('x')", &[]).await.unwrap_err();
        match err {
            Error::Database(db) => {
                assert!(SqliteDialect.is_unique_violation(&db));
            },
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let client = SqliteClient::in_memory().unwrap();
        assert!(client.is_open());
        client.close().await.unwrap();
        client.close().await.unwrap();
        assert!(!client.is_open());

        let err = client.query("SELECT 1", &[]).await.unwrap_err();
        assert_eq!(err.code(), Some("NOT_OPENED"));
    }

    #[tokio::test]
    async fn test_open_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dummies.db");
        let uri = format!("sqlite://{}", path.display());

        let client = SqliteClient::open(&uri, &ConnectionOptions::default()).await.unwrap();
        assert_eq!(client.database_name().as_deref(), Some("dummies"));
        client.execute("CREATE TABLE t (id INTEGER)", &[]).await.unwrap();
        client.close().await.unwrap();

        assert!(path.exists());
    }
}
