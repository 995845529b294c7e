//! Data models for the access layer.
//!
//! This module re-exports all model types used throughout the crate.

pub mod connection;
pub mod query;
pub mod schema;

// Re-export commonly used types
pub use connection::{
    CharacterSet, ConnectionParams, ConnectionParamsError, ConnectionState, DEFAULT_CHARACTER_SET,
    DEFAULT_COLLATION, DEFAULT_PORT, DbVendor, HostSpec, TlsOptions,
};
pub use query::{ColumnRef, QueryResult, Row, value_to_string};
pub use schema::{
    FieldInfo, IndexColumn, IndexInfo, PRIMARY_INDEX_NAME, PRIMARY_KEY_ROLE, TableMetadata,
};
