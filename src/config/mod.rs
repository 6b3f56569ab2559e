//! Configuration management.
//!
//! Configuration is built once, either in code through the builder methods
//! or from a TOML file, and then passed by value into a persistence or
//! connection. Nothing here is process-global.
//!
//! # File format
//!
//! ```toml
//! table = "dummies"          # alias: collection
//! max_page_size = 100
//!
//! [connection]
//! uri = "sqlite://${DATA_DIR}/dummies.db"
//!
//! [options]                  # milliseconds
//! max_pool_size = 2
//! connect_timeout = 5000
//! request_timeout = 15000
//! idle_timeout = 30000
//! ```
//!
//! `${VAR}` references in the connection URI are expanded from the environment.

use crate::{Error, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Default maximum page size.
pub const DEFAULT_MAX_PAGE_SIZE: i64 = 100;

/// Pool and timeout settings for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionOptions {
    /// Maximum number of pooled connections.
    pub max_pool_size: usize,
    /// Time allowed to establish a connection.
    pub connect_timeout: Duration,
    /// Time allowed for a single statement.
    pub request_timeout: Duration,
    /// Time an idle pooled connection is kept.
    pub idle_timeout: Duration,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            max_pool_size: 3,
            connect_timeout: Duration::from_millis(15_000),
            request_timeout: Duration::from_millis(15_000),
            idle_timeout: Duration::from_millis(30_000),
        }
    }
}

impl ConnectionOptions {
    /// Defaults used by a persistence that creates its own connection.
    #[must_use]
    pub const fn persistence_defaults() -> Self {
        Self {
            max_pool_size: 2,
            connect_timeout: Duration::from_millis(5_000),
            request_timeout: Duration::from_millis(15_000),
            idle_timeout: Duration::from_millis(30_000),
        }
    }

    /// Overlays the values present in a config file section.
    fn merge(mut self, file: &ConfigFileOptions) -> Self {
        if let Some(v) = file.max_pool_size {
            self.max_pool_size = v;
        }
        if let Some(v) = file.connect_timeout {
            self.connect_timeout = Duration::from_millis(v);
        }
        if let Some(v) = file.request_timeout {
            self.request_timeout = Duration::from_millis(v);
        }
        if let Some(v) = file.idle_timeout {
            self.idle_timeout = Duration::from_millis(v);
        }
        self
    }
}

/// Where to connect.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Connection URI, e.g. `sqlite::memory:` or `postgres://user@host/db`.
    pub uri: Option<String>,
}

/// Configuration for a persistence component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistenceConfig {
    /// Target table name.
    pub table: Option<String>,
    /// Connection location, used when the persistence creates its own connection.
    pub connection: ConnectionConfig,
    /// Pool and timeout settings for a locally created connection.
    pub options: ConnectionOptions,
    /// Upper bound for `take` in paged queries.
    pub max_page_size: i64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            table: None,
            connection: ConnectionConfig::default(),
            options: ConnectionOptions::persistence_defaults(),
            max_page_size: DEFAULT_MAX_PAGE_SIZE,
        }
    }
}

/// Configuration file structure (for TOML parsing).
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    /// Table name.
    #[serde(alias = "collection")]
    pub table: Option<String>,
    /// Maximum page size.
    pub max_page_size: Option<i64>,
    /// Connection section.
    pub connection: Option<ConfigFileConnection>,
    /// Options section.
    pub options: Option<ConfigFileOptions>,
}

/// Connection section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileConnection {
    /// Connection URI.
    pub uri: Option<String>,
}

/// Options section in config file. Timeouts are in milliseconds.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileOptions {
    /// Pool size.
    pub max_pool_size: Option<usize>,
    /// Connect timeout.
    pub connect_timeout: Option<u64>,
    /// Request timeout.
    pub request_timeout: Option<u64>,
    /// Idle timeout.
    pub idle_timeout: Option<u64>,
}

impl PersistenceConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the table name.
    #[must_use]
    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    /// Sets the connection URI.
    #[must_use]
    pub fn with_uri(mut self, uri: impl Into<String>) -> Self {
        self.connection.uri = Some(uri.into());
        self
    }

    /// Sets the pool and timeout options.
    #[must_use]
    pub fn with_options(mut self, options: ConnectionOptions) -> Self {
        self.options = options;
        self
    }

    /// Sets the maximum page size.
    #[must_use]
    pub fn with_max_page_size(mut self, max_page_size: i64) -> Self {
        self.max_page_size = max_page_size;
        self
    }

    /// Parses configuration from TOML text. Missing keys keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid TOML, contains unknown keys,
    /// or holds invalid values.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let file: ConfigFile = toml::from_str(contents).map_err(|e| Error::OperationFailed {
            operation: "parse_config_file".to_string(),
            cause: e.to_string(),
        })?;

        let config = Self::from_config_file(file);
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| Error::OperationFailed {
            operation: "read_config_file".to_string(),
            cause: format!("{}: {e}", path.display()),
        })?;

        Self::from_toml_str(&contents)
    }

    fn from_config_file(file: ConfigFile) -> Self {
        let mut config = Self::default();

        if let Some(table) = file.table {
            config.table = Some(table);
        }
        if let Some(max_page_size) = file.max_page_size {
            config.max_page_size = max_page_size;
        }
        if let Some(uri) = file.connection.and_then(|c| c.uri) {
            config.connection.uri = Some(expand_env_vars(&uri));
        }
        if let Some(options) = file.options {
            config.options = config.options.merge(&options);
        }

        config
    }

    fn validate(&self) -> Result<()> {
        if self.max_page_size <= 0 {
            return Err(Error::configuration(
                "INVALID_CONFIG",
                format!("max_page_size must be positive, got {}", self.max_page_size),
            ));
        }
        if self.options.max_pool_size == 0 {
            return Err(Error::configuration(
                "INVALID_CONFIG",
                "max_pool_size must be at least 1",
            ));
        }
        if matches!(&self.table, Some(table) if table.trim().is_empty()) {
            return Err(Error::configuration(
                "INVALID_CONFIG",
                "table name must not be blank",
            ));
        }
        Ok(())
    }
}

/// Expands `${VAR}` references from the environment.
///
/// Unset variables expand to an empty string. An unterminated reference is
/// left as written.
fn expand_env_vars(input: &str) -> String {
    let mut output = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        output.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            output.push_str(&rest[start..]);
            return output;
        };
        output.push_str(&std::env::var(&after[..end]).unwrap_or_default());
        rest = &after[end + 1..];
    }

    output.push_str(rest);
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let options = ConnectionOptions::default();
        assert_eq!(options.max_pool_size, 3);
        assert_eq!(options.connect_timeout, Duration::from_secs(15));
        assert_eq!(options.request_timeout, Duration::from_secs(15));
        assert_eq!(options.idle_timeout, Duration::from_secs(30));

        let config = PersistenceConfig::default();
        assert_eq!(config.table, None);
        assert_eq!(config.max_page_size, 100);
        assert_eq!(config.options.max_pool_size, 2);
        assert_eq!(config.options.connect_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_builder() {
        let config = PersistenceConfig::new()
            .with_table("dummies")
            .with_uri("sqlite::memory:")
            .with_max_page_size(10);
        assert_eq!(config.table.as_deref(), Some("dummies"));
        assert_eq!(config.connection.uri.as_deref(), Some("sqlite::memory:"));
        assert_eq!(config.max_page_size, 10);
    }

    #[test]
    fn test_from_toml_partial() {
        let config = PersistenceConfig::from_toml_str(
            r#"
            collection = "dummies"

            [options]
            connect_timeout = 1000
            "#,
        )
        .unwrap();

        assert_eq!(config.table.as_deref(), Some("dummies"));
        assert_eq!(config.options.connect_timeout, Duration::from_secs(1));
        assert_eq!(config.options.max_pool_size, 2);
        assert_eq!(config.max_page_size, 100);
    }

    #[test]
    fn test_from_toml_rejects_invalid_values() {
        let err = PersistenceConfig::from_toml_str("max_page_size = 0").unwrap_err();
        assert_eq!(err.code(), Some("INVALID_CONFIG"));

        let err = PersistenceConfig::from_toml_str("unknown = 1").unwrap_err();
        assert!(matches!(err, Error::OperationFailed { .. }));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "table = \"items\"\n[connection]\nuri = \"sqlite::memory:\"\n"
        )
        .unwrap();

        let config = PersistenceConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.table.as_deref(), Some("items"));
        assert_eq!(config.connection.uri.as_deref(), Some("sqlite::memory:"));
    }

    #[test]
    fn test_load_missing_file() {
        let err = PersistenceConfig::load_from_file(Path::new("/nonexistent/sqlpersist.toml"))
            .unwrap_err();
        assert!(matches!(err, Error::OperationFailed { ref operation, .. } if operation == "read_config_file"));
    }

    #[test]
    fn test_expand_env_vars() {
        assert_eq!(expand_env_vars("sqlite::memory:"), "sqlite::memory:");
        assert_eq!(
            expand_env_vars("x${SQLPERSIST_SURELY_UNSET_VAR}y"),
            "xy"
        );
        assert_eq!(expand_env_vars("a${UNTERMINATED"), "a${UNTERMINATED");
        let path = std::env::var("PATH").unwrap_or_default();
        assert_eq!(expand_env_vars("${PATH}"), path);
    }
}
