//! PostgreSQL client over a deadpool connection pool.

use super::SqlClient;
use crate::config::ConnectionOptions;
use crate::models::{Row, SqlValue};
use crate::storage::metrics::observe;
use crate::storage::{Dialect, PostgresDialect};
use crate::{Error, Result};
use async_trait::async_trait;
use deadpool_postgres::{Config, ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime, Timeouts};
use std::time::Instant;
use tokio_postgres::NoTls;
use tokio_postgres::types::{ToSql, Type};
use tracing::instrument;

const BACKEND: &str = "postgresql";

/// Helper to map pool errors.
fn pool_error(e: impl std::fmt::Display) -> Error {
    Error::OperationFailed {
        operation: "postgres_get_client".to_string(),
        cause: e.to_string(),
    }
}

/// PostgreSQL client.
///
/// Statements borrow a client from the pool for their duration, so calls on
/// one `PostgresClient` may run concurrently up to `max_pool_size`.
pub struct PostgresClient {
    pool: Pool,
    database_name: Option<String>,
}

impl PostgresClient {
    /// Creates the pool and verifies connectivity by checking out one client.
    ///
    /// `connect_timeout` and `statement_timeout` are appended to the URI as
    /// parameters; pool size and wait/create/recycle timeouts come from
    /// `options`.
    ///
    /// # Errors
    ///
    /// Returns an error if the URI is invalid, the pool cannot be created, or
    /// no connection can be established.
    #[instrument(skip(uri, options), fields(backend = BACKEND))]
    pub async fn open(uri: &str, options: &ConnectionOptions) -> Result<Self> {
        let uri = with_timeout_parameters(uri, options);
        let config = parse_connection_url(&uri)?;
        let cfg = build_pool_config(&config, options);
        let database_name = config
            .get_dbname()
            .or_else(|| config.get_user())
            .map(String::from);

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| Error::OperationFailed {
                operation: "postgres_create_pool".to_string(),
                cause: e.to_string(),
            })?;

        let start = Instant::now();
        let probe = pool.get().await.map(drop).map_err(pool_error);
        observe(BACKEND, "connect", start, probe)?;

        Ok(Self {
            pool,
            database_name,
        })
    }

    async fn run_query(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>> {
        let client = self.pool.get().await.map_err(pool_error)?;
        let refs: Vec<&(dyn ToSql + Sync)> = params.iter().map(|p| p as &(dyn ToSql + Sync)).collect();
        let rows = client.query(sql, &refs).await?;
        rows.iter().map(decode_row).collect()
    }

    async fn run_execute(&self, sql: &str, params: &[SqlValue]) -> Result<u64> {
        let client = self.pool.get().await.map_err(pool_error)?;
        let refs: Vec<&(dyn ToSql + Sync)> = params.iter().map(|p| p as &(dyn ToSql + Sync)).collect();
        Ok(client.execute(sql, &refs).await?)
    }
}

/// Appends `connect_timeout` (seconds) and `statement_timeout` (ms) to the URI.
fn with_timeout_parameters(uri: &str, options: &ConnectionOptions) -> String {
    let separator = if uri.contains('?') { '&' } else { '?' };
    let connect_secs = options.connect_timeout.as_secs().max(1);
    let statement_ms = options.request_timeout.as_millis();
    format!(
        "{uri}{separator}connect_timeout={connect_secs}&options=-c%20statement_timeout%3D{statement_ms}"
    )
}

/// Parses the connection URL into a tokio-postgres config.
fn parse_connection_url(url: &str) -> Result<tokio_postgres::Config> {
    url.parse::<tokio_postgres::Config>()
        .map_err(|e| Error::OperationFailed {
            operation: "postgres_parse_url".to_string(),
            cause: e.to_string(),
        })
}

/// Extracts host string from tokio-postgres Host.
#[cfg(unix)]
fn host_to_string(h: &tokio_postgres::config::Host) -> String {
    match h {
        tokio_postgres::config::Host::Tcp(s) => s.clone(),
        tokio_postgres::config::Host::Unix(p) => p.to_string_lossy().to_string(),
    }
}

/// Extracts host string from tokio-postgres Host (Windows: Tcp only).
#[cfg(not(unix))]
fn host_to_string(h: &tokio_postgres::config::Host) -> String {
    let tokio_postgres::config::Host::Tcp(s) = h;
    s.clone()
}

/// Builds a deadpool config from a tokio-postgres config.
fn build_pool_config(config: &tokio_postgres::Config, options: &ConnectionOptions) -> Config {
    let mut cfg = Config::new();
    cfg.host = config.get_hosts().first().map(host_to_string);
    cfg.port = config.get_ports().first().copied();
    cfg.user = config.get_user().map(String::from);
    cfg.password = config
        .get_password()
        .map(|p| String::from_utf8_lossy(p).to_string());
    cfg.dbname = config.get_dbname().map(String::from);
    cfg.options = config.get_options().map(String::from);
    cfg.application_name = config.get_application_name().map(String::from);
    cfg.connect_timeout = config.get_connect_timeout().copied();

    cfg.pool = Some(PoolConfig {
        max_size: options.max_pool_size.max(1),
        timeouts: Timeouts {
            wait: Some(options.request_timeout),
            create: Some(options.connect_timeout),
            recycle: Some(options.idle_timeout),
        },
        ..Default::default()
    });

    cfg.manager = Some(ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    });

    cfg
}

fn is_text(ty: &Type) -> bool {
    *ty == Type::TEXT || *ty == Type::VARCHAR || *ty == Type::BPCHAR || *ty == Type::NAME
}

/// Decodes one column by its declared type.
fn decode_value(row: &tokio_postgres::Row, index: usize, ty: &Type) -> Result<SqlValue> {
    let value = if *ty == Type::BOOL {
        row.try_get::<_, Option<bool>>(index)?.map(SqlValue::Bool)
    } else if *ty == Type::INT2 {
        row.try_get::<_, Option<i16>>(index)?
            .map(|v| SqlValue::Integer(i64::from(v)))
    } else if *ty == Type::INT4 {
        row.try_get::<_, Option<i32>>(index)?
            .map(|v| SqlValue::Integer(i64::from(v)))
    } else if *ty == Type::INT8 {
        row.try_get::<_, Option<i64>>(index)?.map(SqlValue::Integer)
    } else if *ty == Type::OID {
        row.try_get::<_, Option<u32>>(index)?
            .map(|v| SqlValue::Integer(i64::from(v)))
    } else if *ty == Type::FLOAT4 {
        row.try_get::<_, Option<f32>>(index)?
            .map(|v| SqlValue::Real(f64::from(v)))
    } else if *ty == Type::FLOAT8 {
        row.try_get::<_, Option<f64>>(index)?.map(SqlValue::Real)
    } else if *ty == Type::BYTEA {
        row.try_get::<_, Option<Vec<u8>>>(index)?.map(SqlValue::Blob)
    } else if *ty == Type::JSON || *ty == Type::JSONB {
        row.try_get::<_, Option<serde_json::Value>>(index)?
            .map(|v| SqlValue::Text(v.to_string()))
    } else if is_text(ty) || *ty == Type::UNKNOWN {
        row.try_get::<_, Option<String>>(index)?.map(SqlValue::Text)
    } else {
        return Err(Error::InvalidInput(format!(
            "unsupported PostgreSQL column type '{ty}' at position {index}; cast it to text in the query"
        )));
    };
    Ok(value.unwrap_or(SqlValue::Null))
}

fn decode_row(row: &tokio_postgres::Row) -> Result<Row> {
    row.columns()
        .iter()
        .enumerate()
        .map(|(i, column)| Ok((column.name().to_string(), decode_value(row, i, column.type_())?)))
        .collect()
}

#[async_trait]
impl SqlClient for PostgresClient {
    fn dialect(&self) -> &dyn Dialect {
        &PostgresDialect
    }

    fn database_name(&self) -> Option<String> {
        self.database_name.clone()
    }

    async fn query(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>> {
        let start = Instant::now();
        let result = self.run_query(sql, params).await;
        observe(BACKEND, "query", start, result)
    }

    async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<u64> {
        let start = Instant::now();
        let result = self.run_execute(sql, params).await;
        observe(BACKEND, "execute", start, result)
    }

    async fn close(&self) -> Result<()> {
        self.pool.close();
        Ok(())
    }
}
