//! Synchronous driver seam.
//!
//! Everything above this module is blocking and single-caller. A [`Connector`]
//! opens a [`Driver`], and the driver runs one SQL statement at a time and hands
//! back a fully materialized [`QueryResult`]. Any async runtime stays inside the
//! driver implementation.

use crate::models::QueryResult;
use std::path::PathBuf;
use std::time::Duration;

/// Client error: unknown error.
pub const CR_UNKNOWN_ERROR: u16 = 2000;
/// Client error: MySQL server has gone away.
pub const CR_SERVER_GONE_ERROR: u16 = 2006;
/// Client error: lost connection to MySQL server during query.
pub const CR_SERVER_LOST: u16 = 2013;
/// Client error: SSL connection error.
pub const CR_SSL_CONNECTION_ERROR: u16 = 2026;

/// Error numbers meaning the connection itself is gone.
pub const CONNECTION_LOST_CODES: [u16; 2] = [CR_SERVER_GONE_ERROR, CR_SERVER_LOST];

/// Error reported by a driver: the server (or client library) error number plus
/// its message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("MySQL error {code}: {message}")]
pub struct DriverError {
    pub code: u16,
    pub message: String,
    pub sql_state: Option<String>,
}

impl DriverError {
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            sql_state: None,
        }
    }

    pub fn with_sql_state(mut self, sql_state: impl Into<String>) -> Self {
        self.sql_state = Some(sql_state.into());
        self
    }

    /// Server gone away or connection lost mid-query.
    pub fn is_connection_lost(&self) -> bool {
        CONNECTION_LOST_CODES.contains(&self.code)
    }
}

/// How the transport is secured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TlsMode {
    Disabled,
    /// Encrypted, server certificate not verified.
    EncryptOnly,
    /// Encrypted and verified against the given certificate authority.
    VerifyCa(PathBuf),
}

impl TlsMode {
    pub fn is_enabled(&self) -> bool {
        !matches!(self, Self::Disabled)
    }
}

/// Network-level target handed to a [`Connector`].
#[derive(Clone)]
pub struct ConnectTarget {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub tls: TlsMode,
    pub connect_timeout: Duration,
}

impl std::fmt::Debug for ConnectTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectTarget")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("tls", &self.tls)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

/// An open session with the server.
pub trait Driver: Send {
    /// Run one statement and materialize its result.
    fn query(&mut self, sql: &str) -> Result<QueryResult, DriverError>;

    /// Release the session. Further queries must fail.
    fn close(&mut self) {}
}

/// Opens driver sessions.
pub trait Connector {
    fn connect(&self, target: &ConnectTarget) -> Result<Box<dyn Driver>, DriverError>;
}
