//! Query execution.
//!
//! [`QueryExecutor`] sends SQL text over its [`Connection`] and classifies driver
//! failures into [`DbError`] variants. The connection reports the cost of every
//! statement to its [`QueryObserver`].
//!
//! Classification:
//! - error 2006 (server gone away) or 2013 (lost connection): `ConnectionLost`,
//!   and the connection is closed
//! - any other driver error: `Query`, carrying the SQL text, code and message
//! - a scalar lookup on an empty result: `NoResult`

use crate::db::connection::Connection;
use crate::db::driver::DriverError;
use crate::db::metrics::QueryObserver;
use crate::error::{DbError, DbResult};
use crate::models::{ColumnRef, QueryResult, Row};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::{debug, warn};

/// Runs statements on one connection.
pub struct QueryExecutor {
    connection: Connection,
}

impl std::fmt::Debug for QueryExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryExecutor")
            .field("connection", &self.connection)
            .finish()
    }
}

impl QueryExecutor {
    pub fn new(connection: Connection) -> Self {
        Self { connection }
    }

    /// Report timings to `observer` instead of the connection's current one.
    pub fn with_observer(mut self, observer: Arc<dyn QueryObserver>) -> Self {
        self.connection.set_observer(observer);
        self
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn connection_mut(&mut self) -> &mut Connection {
        &mut self.connection
    }

    /// Swap in a new connection, returning the previous one. The new
    /// connection keeps reporting to the same observer.
    pub fn replace_connection(&mut self, mut connection: Connection) -> Connection {
        connection.set_observer(self.connection.observer());
        std::mem::replace(&mut self.connection, connection)
    }

    /// Execute one statement and materialize its result.
    pub fn execute(&mut self, sql: &str) -> DbResult<QueryResult> {
        debug!(sql = %sql, "Executing statement");
        self.connection.run(sql).map_err(|e| classify(sql, e))
    }

    /// Value of `column` in the first row.
    ///
    /// An empty result is [`DbError::NoResult`]; a column missing from the
    /// result is [`DbError::InvalidInput`]. SQL NULL comes back as `Null`.
    pub fn execute_scalar<'a>(
        &mut self,
        sql: &str,
        column: impl Into<ColumnRef<'a>>,
    ) -> DbResult<JsonValue> {
        let column = column.into();
        let result = self.execute(sql)?;
        let row = result.first().ok_or_else(|| DbError::no_result(sql))?;
        row.get(column)
            .cloned()
            .ok_or_else(|| missing_column(sql, column))
    }

    /// All rows of the result.
    pub fn execute_all(&mut self, sql: &str) -> DbResult<Vec<Row>> {
        Ok(self.execute(sql)?.into_rows())
    }

    /// One column across all rows.
    pub fn execute_column<'a>(
        &mut self,
        sql: &str,
        column: impl Into<ColumnRef<'a>>,
    ) -> DbResult<Vec<JsonValue>> {
        let column = column.into();
        let result = self.execute(sql)?;
        result
            .rows
            .iter()
            .map(|row| row.get(column).cloned().ok_or_else(|| missing_column(sql, column)))
            .collect()
    }
}

fn missing_column(sql: &str, column: ColumnRef<'_>) -> DbError {
    DbError::invalid_input(format!("Column {} is not in the result of: {}", column, sql))
}

/// Turn a driver failure into the error callers handle.
pub(crate) fn classify(sql: &str, error: DriverError) -> DbError {
    if error.is_connection_lost() {
        warn!(code = error.code, sql = %sql, "Connection lost while executing statement");
        DbError::connection_lost(error.code, error.message, sql)
    } else {
        DbError::query(sql, error.code, error.message, error.sql_state)
    }
}
