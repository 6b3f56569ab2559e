//! Data models for the persistence layer.
//!
//! This module contains the storage-side representation of entities
//! ([`SqlValue`], [`Row`]), paging parameters and results, identifier
//! handling, and the structured filter builder.

mod filter;
mod identifiable;
mod paging;
mod row;
mod value;

pub use filter::Filter;
pub use identifiable::{IdGenerator, IdValue, Identifiable};
pub use paging::{DataPage, PagingParams};
pub use row::{ColumnNames, Row};
pub use value::SqlValue;
