//! Connection establishment.
//!
//! [`ConnectionManager`] turns [`ConnectionParams`] into an open [`Connection`]:
//! it parses the host spec, applies TLS before the handshake, proves after the
//! handshake that the session really is encrypted, then selects the database and
//! configures the session.

use crate::db::driver::{CR_SERVER_GONE_ERROR, ConnectTarget, Connector, Driver, DriverError, TlsMode};
use crate::db::executor::classify;
use crate::db::metrics::{QueryEvent, QueryObserver, TracingObserver, statement_kind};
use crate::db::mysql::MySqlConnector;
use crate::db::quote::{quote_identifier, quote_literal};
use crate::error::{DbError, DbResult};
use crate::models::{
    CharacterSet, ConnectionParams, ConnectionState, HostSpec, QueryResult, TlsOptions,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Default timeout for establishing a connection.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Session status variables that are non-empty only on an encrypted session.
const TLS_STATUS_VARIABLES: [&str; 2] = ["ssl_version", "ssl_cipher"];

/// An open session plus the identity it was opened with.
pub struct Connection {
    host: HostSpec,
    user: String,
    password: String,
    database: String,
    tls: TlsOptions,
    character_set: Option<CharacterSet>,
    timezone: Option<String>,
    driver: Box<dyn Driver>,
    state: ConnectionState,
    last_error: Option<DriverError>,
    affected_rows: u64,
    observer: Arc<dyn QueryObserver>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("host", &self.host)
            .field("user", &self.user)
            .field("database", &self.database)
            .field("tls", &self.tls)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Run one statement on the driver, recording the outcome and reporting
    /// it to the observer.
    ///
    /// A lost connection closes the driver; every later call fails with
    /// "server has gone away" without reaching it.
    pub(crate) fn run(&mut self, sql: &str) -> Result<QueryResult, DriverError> {
        let start = Instant::now();
        let outcome = self.send(sql);

        let label = statement_kind(sql);
        self.observer.observe(&QueryEvent {
            label: &label,
            sql,
            elapsed: start.elapsed(),
            success: outcome.is_ok(),
            rows: outcome.as_ref().map(QueryResult::row_count).unwrap_or(0),
        });
        outcome
    }

    fn send(&mut self, sql: &str) -> Result<QueryResult, DriverError> {
        if self.state == ConnectionState::Closed {
            let err = DriverError::new(CR_SERVER_GONE_ERROR, "MySQL server has gone away");
            self.last_error = Some(err.clone());
            return Err(err);
        }

        match self.driver.query(sql) {
            Ok(result) => {
                self.last_error = None;
                self.affected_rows = result.rows_affected;
                Ok(result)
            }
            Err(err) => {
                if err.is_connection_lost() {
                    warn!(code = err.code, host = %self.host, "Connection to the server lost");
                    self.driver.close();
                    self.state = ConnectionState::Closed;
                }
                self.last_error = Some(err.clone());
                Err(err)
            }
        }
    }

    /// Error number of the last statement, 0 when it succeeded.
    pub fn errno(&self) -> u16 {
        self.last_error.as_ref().map(|e| e.code).unwrap_or(0)
    }

    /// Error message of the last statement, empty when it succeeded.
    pub fn error(&self) -> &str {
        self.last_error
            .as_ref()
            .map(|e| e.message.as_str())
            .unwrap_or_default()
    }

    /// Rows changed by the last successful statement.
    pub fn affected_rows(&self) -> u64 {
        self.affected_rows
    }

    pub fn host_spec(&self) -> &HostSpec {
        &self.host
    }

    pub fn server(&self) -> &str {
        &self.host.server
    }

    pub fn port(&self) -> u16 {
        self.host.port
    }

    pub fn is_persistent(&self) -> bool {
        self.host.persistent
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    /// Currently selected database, empty for a server-level session.
    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn tls(&self) -> &TlsOptions {
        &self.tls
    }

    pub fn character_set(&self) -> Option<&CharacterSet> {
        self.character_set.as_ref()
    }

    pub fn timezone(&self) -> Option<&str> {
        self.timezone.as_deref()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open
    }

    pub(crate) fn observer(&self) -> Arc<dyn QueryObserver> {
        Arc::clone(&self.observer)
    }

    /// Report every later statement to `observer`.
    pub(crate) fn set_observer(&mut self, observer: Arc<dyn QueryObserver>) {
        self.observer = observer;
    }

    /// Switch the default database.
    pub fn select_database(&mut self, name: &str) -> DbResult<()> {
        let sql = format!("USE {}", quote_identifier(name));
        self.run(&sql).map_err(|e| {
            DbError::connection(
                format!(
                    "Could not select DB (host={}, user={}, db_name={}): {}",
                    self.host.server, self.user, name, e.message
                ),
                "Check that the database exists and that the user may access it",
            )
        })?;
        debug!(database = %name, "Selected database");
        self.database = name.to_string();
        Ok(())
    }

    /// Forget the selected database after it was dropped.
    pub(crate) fn clear_database(&mut self) {
        self.database.clear();
    }

    /// Record a database the session switched to outside `select_database`.
    pub(crate) fn set_database(&mut self, name: &str) {
        self.database = name.to_string();
    }

    /// Apply `SET NAMES`. An empty charset leaves the session untouched.
    pub fn set_character_set(&mut self, character_set: &CharacterSet) -> DbResult<()> {
        if character_set.charset.is_empty() {
            return Ok(());
        }
        let sql = if character_set.collation.is_empty() {
            format!("SET NAMES {}", quote_literal(&character_set.charset))
        } else {
            format!(
                "SET NAMES {} COLLATE {}",
                quote_literal(&character_set.charset),
                quote_literal(&character_set.collation)
            )
        };
        self.run(&sql).map_err(|e| classify(&sql, e))?;
        self.character_set = Some(character_set.clone());
        Ok(())
    }

    /// Apply `SET time_zone`. Named zones need the server's time zone tables.
    pub fn set_timezone(&mut self, timezone: &str) -> DbResult<()> {
        let sql = format!("SET time_zone = {}", quote_literal(timezone));
        self.run(&sql).map_err(|e| classify(&sql, e))?;
        self.timezone = Some(timezone.to_string());
        Ok(())
    }

    /// Parameters that reopen this session as it is now.
    pub fn params(&self) -> ConnectionParams {
        let host_spec = if self.host.port == crate::models::DEFAULT_PORT {
            self.host.server.clone()
        } else {
            format!("{}:{}", self.host.server, self.host.port)
        };
        ConnectionParams {
            host_spec,
            user: self.user.clone(),
            password: self.password.clone(),
            database: self.database.clone(),
            tls: self.tls.clone(),
            character_set: self.character_set.clone(),
            timezone: self.timezone.clone(),
        }
    }

    /// Close the session. Idempotent.
    pub fn close(&mut self) {
        if self.state == ConnectionState::Open {
            self.driver.close();
            self.state = ConnectionState::Closed;
            info!(host = %self.host, "Connection closed");
        }
    }

    /// Reads the first row's value column of `SHOW SESSION STATUS LIKE '<name>'`.
    fn session_status(&mut self, name: &str) -> Result<Option<String>, DriverError> {
        let sql = format!("SHOW SESSION STATUS LIKE {}", quote_literal(name));
        let result = self.run(&sql)?;
        Ok(result.first().and_then(|row| row.get_string(1)))
    }

    /// True when both the TLS version and cipher of the session are set.
    fn is_encrypted(&mut self) -> Result<bool, DriverError> {
        for name in TLS_STATUS_VARIABLES {
            let value = self.session_status(name)?;
            if value.as_deref().is_none_or(str::is_empty) {
                debug!(variable = name, "TLS status variable is empty");
                return Ok(false);
            }
        }
        Ok(true)
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

/// Opens verified connections through a [`Connector`].
#[derive(Debug, Clone)]
pub struct ConnectionManager<C: Connector = MySqlConnector> {
    connector: C,
    connect_timeout: Duration,
}

impl ConnectionManager<MySqlConnector> {
    /// Create a manager that opens MySQL connections.
    pub fn new() -> Self {
        Self::with_connector(MySqlConnector::new())
    }
}

impl Default for ConnectionManager<MySqlConnector> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Connector> ConnectionManager<C> {
    /// Create a manager that opens connections through `connector`.
    pub fn with_connector(connector: C) -> Self {
        Self {
            connector,
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
        }
    }

    /// Set the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Open a connection.
    ///
    /// In order: parse the host spec, check the CA file, connect with TLS applied
    /// before the handshake, verify encryption, select the database, then apply
    /// the character set and time zone. Any failure after the handshake closes
    /// the connection before returning.
    pub fn connect(&self, params: &ConnectionParams) -> DbResult<Connection> {
        self.open(params, Arc::new(TracingObserver))
    }

    /// Open a fresh connection with the identity of `connection`, reporting to
    /// the same observer from its first statement on.
    pub fn reconnect(&self, connection: &Connection) -> DbResult<Connection> {
        info!(host = %connection.host, "Reconnecting");
        self.open(&connection.params(), connection.observer())
    }

    fn open(
        &self,
        params: &ConnectionParams,
        observer: Arc<dyn QueryObserver>,
    ) -> DbResult<Connection> {
        let host = HostSpec::parse(&params.host_spec)
            .map_err(|e| DbError::invalid_input(e.to_string()))?;

        let tls = tls_mode(&params.tls)?;

        info!(
            host = %host.host,
            port = host.port,
            user = %params.user,
            persistent = host.persistent,
            tls = tls.is_enabled(),
            "Connecting to database server"
        );
        if host.persistent {
            debug!("Persistent connections are not pooled; opening a dedicated session");
        }

        let target = ConnectTarget {
            host: host.host.clone(),
            port: host.port,
            user: params.user.clone(),
            password: params.password.clone(),
            tls,
            connect_timeout: self.connect_timeout,
        };

        let driver = self.connector.connect(&target).map_err(|e| {
            DbError::connection(
                format!(
                    "Could not connect to the DB server (host={}, user={}): {}",
                    host.server, params.user, e.message
                ),
                connection_suggestion(&e),
            )
        })?;

        let mut connection = Connection {
            host,
            user: params.user.clone(),
            password: params.password.clone(),
            database: String::new(),
            tls: params.tls.clone(),
            character_set: None,
            timezone: None,
            driver,
            state: ConnectionState::Open,
            last_error: None,
            affected_rows: 0,
            observer,
        };

        if params.tls.enabled {
            verify_tls(&mut connection)?;
        }

        if !params.database.is_empty() {
            connection.select_database(&params.database)?;
        }

        if let Some(character_set) = &params.character_set {
            connection.set_character_set(character_set)?;
        }

        if let Some(timezone) = &params.timezone {
            connection.set_timezone(timezone)?;
        }

        info!(
            host = %connection.host,
            database = %connection.database,
            "Connected successfully"
        );
        Ok(connection)
    }
}

/// Driver-level TLS mode for the configured options.
fn tls_mode(tls: &TlsOptions) -> DbResult<TlsMode> {
    if !tls.enabled {
        return Ok(TlsMode::Disabled);
    }
    match &tls.ca {
        None => Ok(TlsMode::EncryptOnly),
        Some(ca) if ca.is_file() => Ok(TlsMode::VerifyCa(ca.clone())),
        Some(ca) => Err(DbError::connection(
            format!(
                "Certificate authority file '{}' does not exist",
                ca.display()
            ),
            "Check the tls_ca setting or leave it empty to encrypt without verification",
        )),
    }
}

/// Reject the connection unless the session reports a TLS version and cipher.
fn verify_tls(connection: &mut Connection) -> DbResult<()> {
    let outcome = connection.is_encrypted();
    match outcome {
        Ok(true) => {
            debug!("TLS session verified");
            Ok(())
        }
        Ok(false) => {
            connection.close();
            Err(DbError::connection(
                "Connection to the database was opened with TLS parameters but the session is not actually encrypted",
                "Enable TLS on the server (require_secure_transport, ssl_cert, ssl_key) or disable it in the configuration",
            ))
        }
        Err(e) => {
            connection.close();
            Err(DbError::connection(
                format!("Could not verify the TLS session: {}", e.message),
                "Check that the user may read session status variables",
            ))
        }
    }
}

fn connection_suggestion(error: &DriverError) -> String {
    let message = error.message.to_lowercase();

    if message.contains("connection refused") {
        return "Check that the MySQL server is running and accessible".to_string();
    }

    if error.code == 1045 || message.contains("access denied") || message.contains("password") {
        return "Verify the username and password".to_string();
    }

    if message.contains("tls") || message.contains("ssl") || message.contains("certificate") {
        return "Check TLS configuration: the server must accept encrypted connections and the CA must match its certificate".to_string();
    }

    if message.contains("timed out") {
        return "Check network connectivity to the database host".to_string();
    }

    "Verify the host spec format: [p:]host[:port]".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::scripted::Script;
    use crate::models::QueryResult;
    use serde_json::json;
    use std::path::PathBuf;

    fn status(name: &str, value: &str) -> QueryResult {
        QueryResult::from_rows(&["Variable_name", "Value"], vec![vec![json!(name), json!(value)]])
    }

    #[test]
    fn test_tls_mode_selection() {
        assert_eq!(tls_mode(&TlsOptions::disabled()).unwrap(), TlsMode::Disabled);
        assert_eq!(
            tls_mode(&TlsOptions::enabled(None)).unwrap(),
            TlsMode::EncryptOnly
        );
        let missing = TlsOptions::enabled(Some(PathBuf::from("/nonexistent/ca.pem")));
        assert!(matches!(
            tls_mode(&missing),
            Err(DbError::Connection { .. })
        ));
    }

    #[test]
    fn test_connect_applies_database_and_charset() {
        let script = Script::new();
        let manager = ConnectionManager::with_connector(script.connector());
        let params = ConnectionParams::new("db.example.com:3307", "itop", "pw", "itop");

        let connection = manager.connect(&params).unwrap();
        assert_eq!(connection.database(), "itop");
        assert_eq!(connection.port(), 3307);
        assert_eq!(
            script.statements(),
            vec![
                "USE `itop`".to_string(),
                "SET NAMES 'utf8mb4' COLLATE 'utf8mb4_unicode_ci'".to_string(),
            ]
        );
        let target = &script.targets()[0];
        assert_eq!(target.host, "db.example.com");
        assert_eq!(target.tls, TlsMode::Disabled);
    }

    #[test]
    fn test_connect_verifies_tls() {
        let script = Script::new();
        script
            .on("SHOW SESSION STATUS LIKE 'ssl_version'", status("Ssl_version", "TLSv1.3"))
            .on(
                "SHOW SESSION STATUS LIKE 'ssl_cipher'",
                status("Ssl_cipher", "TLS_AES_256_GCM_SHA384"),
            );
        let manager = ConnectionManager::with_connector(script.connector());
        let params = ConnectionParams::new("localhost", "root", "", "")
            .with_tls(TlsOptions::enabled(None))
            .with_character_set(None);

        let connection = manager.connect(&params).unwrap();
        assert!(connection.is_open());
        assert_eq!(script.targets()[0].tls, TlsMode::EncryptOnly);
    }

    #[test]
    fn test_connect_failure_reports_host_and_user() {
        let script = Script::new();
        script.refuse_connections(DriverError::new(1045, "Access denied for user 'itop'"));
        let manager = ConnectionManager::with_connector(script.connector());
        let err = manager
            .connect(&ConnectionParams::new("p:db:3306", "itop", "bad", "itop"))
            .unwrap_err();
        match err {
            DbError::Connection {
                message,
                suggestion,
            } => {
                assert!(message.contains("Could not connect to the DB server"));
                assert!(message.contains("host=p:db"));
                assert!(message.contains("user=itop"));
                assert!(suggestion.contains("username and password"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_invalid_port_is_invalid_input() {
        let manager = ConnectionManager::with_connector(Script::new().connector());
        let err = manager
            .connect(&ConnectionParams::new("db:notaport", "u", "p", ""))
            .unwrap_err();
        assert!(matches!(err, DbError::InvalidInput { .. }));
    }

    #[test]
    fn test_select_database_failure_has_context() {
        let script = Script::new();
        script.fail("USE `missing`", DriverError::new(1049, "Unknown database 'missing'"));
        let manager = ConnectionManager::with_connector(script.connector());
        let mut connection = manager
            .connect(&ConnectionParams::new("localhost", "root", "", ""))
            .unwrap();

        let err = connection.select_database("missing").unwrap_err();
        assert!(err.to_string().contains("db_name=missing"));
        assert_eq!(connection.errno(), 1049);
        assert_eq!(connection.error(), "Unknown database 'missing'");
        assert_eq!(connection.database(), "");
    }

    #[test]
    fn test_lost_connection_closes() {
        let script = Script::new();
        script.fail("SELECT 1", DriverError::new(2013, "Lost connection"));
        let manager = ConnectionManager::with_connector(script.connector());
        let mut connection = manager
            .connect(&ConnectionParams::new("localhost", "root", "", ""))
            .unwrap();

        assert!(connection.run("SELECT 1").is_err());
        assert!(!connection.is_open());
        assert_eq!(connection.run("SELECT 2").unwrap_err().code, 2006);
        assert_eq!(script.count("SELECT 2"), 0);
    }

    #[test]
    fn test_reconnect_reuses_identity() {
        let script = Script::new();
        let manager = ConnectionManager::with_connector(script.connector());
        let params = ConnectionParams::new("p:db.example.com:3310", "itop", "pw", "itop")
            .with_timezone("Europe/Paris");
        let mut first = manager.connect(&params).unwrap();
        first.close();

        let second = manager.reconnect(&first).unwrap();
        assert!(second.is_open());
        assert!(second.is_persistent());
        assert_eq!(second.port(), 3310);
        assert_eq!(second.database(), "itop");
        assert_eq!(second.timezone(), Some("Europe/Paris"));
        assert_eq!(script.targets().len(), 2);
        assert_eq!(script.targets()[1].password, "pw");
    }
}
