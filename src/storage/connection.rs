//! Connection manager.
//!
//! [`SqlConnection`] owns one [`SqlClient`] (a pool for server backends),
//! opened from a URI supplied by a [`ConnectionResolver`]. It can be shared
//! between several persistence components; each of them only closes a
//! connection it created itself.

use super::client::{self, SqlClient, acquire_lock};
use crate::config::{ConnectionConfig, ConnectionOptions};
use crate::{CONNECT_FAILED, DISCONNECT_FAILED, Error, Result};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tracing::{debug, instrument};

/// Supplies the connection URI at open time.
#[async_trait]
pub trait ConnectionResolver: Send + Sync {
    /// Resolves the URI to connect to.
    ///
    /// # Errors
    ///
    /// Returns an error if no URI can be determined.
    async fn resolve(&self, correlation_id: Option<&str>) -> Result<String>;
}

/// Resolver that returns a fixed URI.
#[derive(Debug, Clone, Default)]
pub struct StaticConnectionResolver {
    uri: Option<String>,
}

impl StaticConnectionResolver {
    /// Creates a resolver for `uri`.
    #[must_use]
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: Some(uri.into()),
        }
    }

    /// Creates a resolver from the connection section of a config.
    #[must_use]
    pub fn from_config(config: &ConnectionConfig) -> Self {
        Self {
            uri: config.uri.clone(),
        }
    }
}

#[async_trait]
impl ConnectionResolver for StaticConnectionResolver {
    async fn resolve(&self, _correlation_id: Option<&str>) -> Result<String> {
        self.uri.clone().ok_or_else(|| {
            Error::configuration("NO_CONNECTION_URI", "Connection URI is not configured")
        })
    }
}

/// Shared handle to a database connection.
pub struct SqlConnection {
    options: ConnectionOptions,
    resolver: Arc<dyn ConnectionResolver>,
    client: Mutex<Option<Arc<dyn SqlClient>>>,
}

impl SqlConnection {
    /// Creates a closed connection with default options.
    #[must_use]
    pub fn new(resolver: Arc<dyn ConnectionResolver>) -> Self {
        Self {
            options: ConnectionOptions::default(),
            resolver,
            client: Mutex::new(None),
        }
    }

    /// Creates a closed connection to a fixed URI.
    #[must_use]
    pub fn from_uri(uri: impl Into<String>) -> Self {
        Self::new(Arc::new(StaticConnectionResolver::new(uri)))
    }

    /// Replaces pool and timeout options. Takes effect on the next open.
    #[must_use]
    pub fn with_options(mut self, options: ConnectionOptions) -> Self {
        self.options = options;
        self
    }

    /// Replaces pool and timeout options. Takes effect on the next open.
    pub fn configure(&mut self, options: ConnectionOptions) {
        self.options = options;
    }

    /// Current options.
    #[must_use]
    pub const fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    /// Resolves the URI and opens the client. A no-op when already open.
    ///
    /// # Errors
    ///
    /// Returns `CONNECT_FAILED` wrapping the resolution or driver error.
    #[instrument(skip(self), fields(operation = "connect"))]
    pub async fn open(&self, correlation_id: Option<&str>) -> Result<()> {
        if self.is_open() {
            return Ok(());
        }

        let uri = self.resolver.resolve(correlation_id).await.map_err(|e| {
            Error::connection(correlation_id, CONNECT_FAILED, "Failed to resolve connection URI")
                .with_cause(e)
        })?;

        match client::connect(&uri, &self.options).await {
            Ok(client) => {
                debug!(
                    correlation_id,
                    backend = client.dialect().name(),
                    database = client.database_name().as_deref().unwrap_or_default(),
                    "Connected to database"
                );
                *acquire_lock(&self.client) = Some(client);
                Ok(())
            },
            Err(e) => Err(Error::connection(
                correlation_id,
                CONNECT_FAILED,
                "Connection to database failed",
            )
            .with_cause(e)),
        }
    }

    /// Closes the client. Closing a closed connection succeeds.
    ///
    /// The cached client is cleared even when the driver reports a failure.
    ///
    /// # Errors
    ///
    /// Returns `DISCONNECT_FAILED` wrapping the driver error.
    #[instrument(skip(self), fields(operation = "disconnect"))]
    pub async fn close(&self, correlation_id: Option<&str>) -> Result<()> {
        let Some(client) = acquire_lock(&self.client).take() else {
            return Ok(());
        };

        client.close().await.map_err(|e| {
            Error::connection(
                correlation_id,
                DISCONNECT_FAILED,
                "Failed to disconnect from database",
            )
            .with_cause(e)
        })?;

        debug!(correlation_id, "Disconnected from database");
        Ok(())
    }

    /// True iff a live client exists.
    #[must_use]
    pub fn is_open(&self) -> bool {
        acquire_lock(&self.client).is_some()
    }

    /// The open client, if any.
    #[must_use]
    pub fn client(&self) -> Option<Arc<dyn SqlClient>> {
        acquire_lock(&self.client).clone()
    }

    /// Name of the connected database, if open.
    #[must_use]
    pub fn database_name(&self) -> Option<String> {
        self.client().and_then(|client| client.database_name())
    }
}

impl std::fmt::Debug for SqlConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlConnection")
            .field("options", &self.options)
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}

/// A connection owned by a persistence component or borrowed from elsewhere.
///
/// Only an owned connection is opened and closed by the component holding it.
#[derive(Debug, Clone)]
pub enum ConnectionHandle {
    /// Created by the holder; opened and closed with it.
    Owned(Arc<SqlConnection>),
    /// Supplied by the caller; never closed by the holder.
    Borrowed(Arc<SqlConnection>),
}

impl ConnectionHandle {
    /// The underlying connection.
    #[must_use]
    pub const fn connection(&self) -> &Arc<SqlConnection> {
        match self {
            Self::Owned(connection) | Self::Borrowed(connection) => connection,
        }
    }

    /// True for [`ConnectionHandle::Owned`].
    #[must_use]
    pub const fn is_owned(&self) -> bool {
        matches!(self, Self::Owned(_))
    }
}
