//! Database access layer.
//!
//! This module provides MySQL access through an explicit [`Session`]:
//! - Connection establishment with TLS verification
//! - Query execution and error classification
//! - Nested transactions over a depth counter
//! - Schema metadata cache
//! - Column type comparison
//! - A driver seam with a sqlx implementation and a scripted one for tests

pub mod connection;
pub mod driver;
pub mod executor;
pub mod field_type;
pub mod metrics;
pub mod mysql;
pub mod quote;
pub mod schema;
#[doc(hidden)]
pub mod scripted;
pub mod server;
pub mod session;
pub mod transaction;
pub mod types;

pub use connection::{Connection, ConnectionManager, DEFAULT_CONNECT_TIMEOUT_SECS};
pub use driver::{ConnectTarget, Connector, Driver, DriverError, TlsMode};
pub use executor::QueryExecutor;
pub use field_type::{FieldType, is_same_field_type};
pub use metrics::{QueryObserver, QueryStats, TracingObserver};
pub use mysql::{MySqlConnector, MySqlDriver};
pub use quote::{quote_identifier, quote_literal};
pub use schema::SchemaCache;
pub use session::Session;
pub use transaction::{TransactionCoordinator, TransactionIntent};
