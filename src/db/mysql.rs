//! MySQL driver over sqlx.
//!
//! Each [`MySqlDriver`] owns one `MySqlConnection` and a current-thread tokio
//! runtime used to block on it. Statements are sent through the text protocol
//! so `USE`, `SET` and `SHOW` behave exactly as in the mysql client.

use crate::db::driver::{
    CR_SERVER_GONE_ERROR, CR_SERVER_LOST, CR_SSL_CONNECTION_ERROR, CR_UNKNOWN_ERROR,
    ConnectTarget, Connector, Driver, DriverError, TlsMode,
};
use crate::db::metrics::statement_kind;
use crate::db::types::{column_names, row_values};
use crate::models::QueryResult;
use futures_util::TryStreamExt;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection, MySqlDatabaseError, MySqlSslMode};
use sqlx::{Column, ConnectOptions, Connection, Either, Executor};
use tokio::runtime::Runtime;
use tracing::{debug, warn};

/// Statement kinds that return a result set even when it has no rows.
const ROW_STATEMENTS: [&str; 6] = ["SELECT", "SHOW", "EXPLAIN", "DESCRIBE", "DESC", "WITH"];

/// Connector opening [`MySqlDriver`] sessions.
#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlConnector;

impl MySqlConnector {
    pub fn new() -> Self {
        Self
    }

    /// Connect options for `target`. sqlx's own session setup (sql_mode flags,
    /// a UTC time zone, `SET NAMES`) is switched off: the connection manager
    /// applies the character set and time zone itself, and only when asked.
    fn options(target: &ConnectTarget) -> MySqlConnectOptions {
        let options = MySqlConnectOptions::new()
            .host(&target.host)
            .port(target.port)
            .username(&target.user)
            .password(&target.password)
            .pipes_as_concat(false)
            .no_engine_substitution(false)
            .timezone(None)
            .set_names(false);

        match &target.tls {
            TlsMode::Disabled => options.ssl_mode(MySqlSslMode::Disabled),
            TlsMode::EncryptOnly => options.ssl_mode(MySqlSslMode::Required),
            TlsMode::VerifyCa(ca) => options.ssl_mode(MySqlSslMode::VerifyCa).ssl_ca(ca),
        }
    }
}

impl Connector for MySqlConnector {
    fn connect(&self, target: &ConnectTarget) -> Result<Box<dyn Driver>, DriverError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| {
                DriverError::new(CR_UNKNOWN_ERROR, format!("Failed to start runtime: {}", e))
            })?;

        let options = Self::options(target);
        debug!(
            host = %target.host,
            port = target.port,
            tls = ?target.tls,
            "Opening MySQL connection"
        );

        let connection = runtime
            .block_on(tokio::time::timeout(target.connect_timeout, options.connect()))
            .map_err(|_| {
                DriverError::new(
                    CR_SERVER_LOST,
                    format!(
                        "Connection timed out after {}s",
                        target.connect_timeout.as_secs()
                    ),
                )
            })?
            .map_err(driver_error)?;

        Ok(Box::new(MySqlDriver {
            runtime,
            connection: Some(connection),
        }))
    }
}

/// One blocking MySQL session.
pub struct MySqlDriver {
    runtime: Runtime,
    connection: Option<MySqlConnection>,
}

impl std::fmt::Debug for MySqlDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MySqlDriver")
            .field("open", &self.connection.is_some())
            .finish()
    }
}

impl Driver for MySqlDriver {
    fn query(&mut self, sql: &str) -> Result<QueryResult, DriverError> {
        let Some(connection) = self.connection.as_mut() else {
            return Err(DriverError::new(
                CR_SERVER_GONE_ERROR,
                "MySQL server has gone away",
            ));
        };

        let items = self
            .runtime
            .block_on((&mut *connection).fetch_many(sql).try_collect::<Vec<_>>())
            .map_err(driver_error)?;

        let mut columns = Vec::new();
        let mut rows = Vec::new();
        let mut rows_affected = 0;
        let mut last_insert_id = None;
        for item in items {
            match item {
                Either::Left(done) => {
                    rows_affected += done.rows_affected();
                    if done.last_insert_id() > 0 {
                        last_insert_id = Some(done.last_insert_id());
                    }
                }
                Either::Right(row) => {
                    if columns.is_empty() {
                        columns = column_names(&row);
                    }
                    rows.push(row_values(&row));
                }
            }
        }

        // Names come from the rows, so an empty result set is described instead.
        if rows.is_empty() && ROW_STATEMENTS.contains(&statement_kind(sql).as_str()) {
            columns = described_columns(&self.runtime, connection, sql);
        }

        let mut result = QueryResult::from_rows(&columns, rows);
        result.rows_affected = rows_affected;
        result.last_insert_id = last_insert_id;
        Ok(result)
    }

    fn close(&mut self) {
        if let Some(connection) = self.connection.take() {
            if let Err(e) = self.runtime.block_on(connection.close()) {
                warn!(error = %e, "Error while closing MySQL connection");
            }
        }
    }
}

impl Drop for MySqlDriver {
    fn drop(&mut self) {
        self.close();
    }
}

/// Column names of `sql` from a prepared-statement describe. Statements the
/// server cannot prepare yield no names.
fn described_columns(runtime: &Runtime, connection: &mut MySqlConnection, sql: &str) -> Vec<String> {
    match runtime.block_on(connection.describe(sql)) {
        Ok(described) => described
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect(),
        Err(e) => {
            debug!(error = %e, "Could not describe empty result set");
            Vec::new()
        }
    }
}

/// Map a sqlx error onto a MySQL error number.
///
/// Server errors keep their own number. Transport failures become client
/// errors: I/O and protocol breakage count as a lost connection.
pub fn driver_error(err: sqlx::Error) -> DriverError {
    match err {
        sqlx::Error::Database(db_err) => {
            let sql_state = db_err.code().map(|c| c.to_string());
            let code = db_err
                .try_downcast_ref::<MySqlDatabaseError>()
                .map(|e| e.number())
                .unwrap_or(CR_UNKNOWN_ERROR);
            DriverError {
                code,
                message: db_err.message().to_string(),
                sql_state,
            }
        }
        sqlx::Error::Io(io_err) => {
            DriverError::new(CR_SERVER_LOST, format!("I/O error: {}", io_err))
        }
        sqlx::Error::Protocol(msg) => {
            DriverError::new(CR_SERVER_LOST, format!("Protocol error: {}", msg))
        }
        sqlx::Error::PoolClosed | sqlx::Error::WorkerCrashed => {
            DriverError::new(CR_SERVER_GONE_ERROR, "MySQL server has gone away")
        }
        sqlx::Error::Tls(tls_err) => {
            DriverError::new(CR_SSL_CONNECTION_ERROR, format!("TLS error: {}", tls_err))
        }
        other => DriverError::new(CR_UNKNOWN_ERROR, other.to_string()),
    }
}
