//! Error types for the database access layer.
//!
//! This module defines all error types using `thiserror`. Each variant maps to one
//! failure class callers are expected to handle differently: connection setup,
//! a dropped connection, a failed statement, an empty scalar result, or a
//! transaction boundary called out of order.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    /// The server dropped the connection (client error 2006 or 2013).
    #[error("Connection lost (MySQL error {code}): {message}")]
    ConnectionLost {
        code: u16,
        message: String,
        sql: String,
    },

    #[error("Query failed (MySQL error {code}): {message}")]
    Query {
        sql: String,
        code: u16,
        message: String,
        /// e.g., "42S02" for unknown table
        sql_state: Option<String>,
    },

    #[error("Found no result for query: {sql}")]
    NoResult { sql: String },

    #[error("Cannot {operation}: no transaction has been started")]
    NoTransaction { operation: String },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },
}

impl DbError {
    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a connection lost error.
    pub fn connection_lost(code: u16, message: impl Into<String>, sql: impl Into<String>) -> Self {
        Self::ConnectionLost {
            code,
            message: message.into(),
            sql: sql.into(),
        }
    }

    /// Create a query error with optional SQL state.
    pub fn query(
        sql: impl Into<String>,
        code: u16,
        message: impl Into<String>,
        sql_state: Option<String>,
    ) -> Self {
        Self::Query {
            sql: sql.into(),
            code,
            message: message.into(),
            sql_state,
        }
    }

    /// Create a no result error.
    pub fn no_result(sql: impl Into<String>) -> Self {
        Self::NoResult { sql: sql.into() }
    }

    /// Create a no transaction error.
    pub fn no_transaction(operation: impl Into<String>) -> Self {
        Self::NoTransaction {
            operation: operation.into(),
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::ConnectionLost { .. } => {
                Some("Re-establish the connection; no statement was retried")
            }
            _ => None,
        }
    }

    /// Check if this error is retryable after reconnecting.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConnectionLost { .. })
    }

    /// Server or client error number, when the error came from the driver.
    pub fn code(&self) -> Option<u16> {
        match self {
            Self::ConnectionLost { code, .. } | Self::Query { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;
