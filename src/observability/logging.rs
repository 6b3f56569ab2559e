//! Structured logging configuration.

use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Environment variable that overrides the configured log filter.
pub const LOG_FILTER_ENV: &str = "RUST_LOG";

/// Output format for log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Newline-delimited JSON.
    Json,
    /// Human-readable text.
    #[default]
    Pretty,
}

impl LogFormat {
    /// Parses a format name. Unknown names fall back to [`LogFormat::Pretty`].
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => Self::Json,
            _ => Self::Pretty,
        }
    }
}

/// Logging configuration.
#[derive(Debug)]
pub struct LoggingConfig {
    /// Event filter.
    pub filter: EnvFilter,
    /// Output format.
    pub format: LogFormat,
    /// Optional file to append to instead of stderr.
    pub file: Option<PathBuf>,
}

impl LoggingConfig {
    /// Builds a configuration from a default level directive.
    ///
    /// `RUST_LOG`, when set and valid, takes precedence over `default_directive`.
    #[must_use]
    pub fn new(default_directive: &str, format: LogFormat) -> Self {
        let filter = EnvFilter::try_from_env(LOG_FILTER_ENV)
            .or_else(|_| EnvFilter::try_new(default_directive))
            .unwrap_or_else(|_| EnvFilter::new("info"));
        Self {
            filter,
            format,
            file: None,
        }
    }

    /// Writes log events to a file.
    #[must_use]
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self::new("sqlpersist=info", LogFormat::default())
    }
}
