//! Storage layer.
//!
//! Bottom-up:
//! - [`client`]: driver boundary ([`SqlClient`]) with `SQLite` and PostgreSQL clients
//! - [`dialect`]: statement differences between backends
//! - [`connection`]: shared connection lifecycle and URI resolution
//! - [`schema`] and [`statement`]: DDL registration and statement fragments
//! - [`persistence`] and [`identifiable`]: the table persistence engine
//! - [`json`]: identifiable persistence over JSON document tables

// Allow significant_drop_tightening - dropping the connection guard slightly early
// provides no meaningful benefit.
#![allow(clippy::significant_drop_tightening)]
// Allow manual_let_else for clearer error handling in some contexts.
#![allow(clippy::manual_let_else)]
// Allow match_same_arms for explicit enum handling.
#![allow(clippy::match_same_arms)]

pub mod client;
pub mod codec;
pub mod connection;
pub mod dialect;
pub mod identifiable;
pub mod json;
pub mod metrics;
pub mod persistence;
pub mod schema;
pub mod statement;

#[cfg(feature = "postgres")]
pub use client::PostgresClient;
pub use client::{SqlClient, SqliteClient};
pub use codec::{RowCodec, SerdeCodec};
pub use connection::{ConnectionHandle, ConnectionResolver, SqlConnection, StaticConnectionResolver};
pub use dialect::{Dialect, PostgresDialect, SqlServerDialect, SqliteDialect};
pub use identifiable::IdentifiableSqlPersistence;
pub use json::{IdentifiableJsonSqlPersistence, JsonRowCodec};
pub use persistence::{LifecycleState, SqlPersistence};
pub use schema::{IndexOptions, JSON_DATA_COLUMN, JSON_ID_COLUMN, SchemaRegistrar, table_exists};
pub use statement::SqlBuilder;
