//! MySQL access layer.
//!
//! Opens TLS-verified connections, runs SQL text, collapses nested
//! transactions onto MySQL's single level, caches table metadata and compares
//! column type declarations. Everything hangs off a [`Session`].

pub mod config;
pub mod db;
pub mod error;
pub mod models;

pub use config::Config;
pub use db::Session;
pub use error::{DbError, DbResult};
