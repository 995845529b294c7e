//! In-memory driver that replays canned results.
//!
//! A [`Script`] maps statements to results and records every statement it
//! receives. Statements with no matching rule succeed with an empty result.
//! The script is shared, so a test keeps a handle to it after the driver has been
//! moved into a connection.
//!
//! ```
//! use db_source::db::scripted::Script;
//! use db_source::models::QueryResult;
//! use db_source::db::Driver;
//!
//! let script = Script::new();
//! script.on("SELECT 1", QueryResult::from_rows(&["1"], vec![vec![1.into()]]));
//! let mut driver = script.driver();
//! assert_eq!(driver.query("SELECT 1").unwrap().row_count(), 1);
//! assert_eq!(script.count("SELECT 1"), 1);
//! ```

use crate::db::connection::{Connection, ConnectionManager};
use crate::db::driver::{CR_SERVER_GONE_ERROR, ConnectTarget, Connector, Driver, DriverError};
use crate::db::session::Session;
use crate::error::DbResult;
use crate::models::{ConnectionParams, QueryResult};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone)]
enum Matcher {
    Exact(String),
    Prefix(String),
}

impl Matcher {
    fn matches(&self, sql: &str) -> bool {
        match self {
            Self::Exact(s) => s == sql,
            Self::Prefix(p) => sql.starts_with(p.as_str()),
        }
    }
}

#[derive(Debug, Clone)]
struct Rule {
    matcher: Matcher,
    outcome: Result<QueryResult, DriverError>,
}

#[derive(Debug, Default)]
struct ScriptState {
    rules: Vec<Rule>,
    statements: Vec<String>,
    targets: Vec<ConnectTarget>,
    connect_error: Option<DriverError>,
}

/// Shared set of canned responses plus the statement log.
#[derive(Debug, Clone, Default)]
pub struct Script {
    state: Arc<Mutex<ScriptState>>,
}

impl Script {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push(&self, matcher: Matcher, outcome: Result<QueryResult, DriverError>) -> &Self {
        self.lock().rules.push(Rule { matcher, outcome });
        self
    }

    /// Answer `sql` (compared after trimming) with `result`. Later rules take
    /// precedence over earlier ones.
    pub fn on(&self, sql: &str, result: QueryResult) -> &Self {
        self.push(Matcher::Exact(sql.trim().to_string()), Ok(result))
    }

    /// Answer every statement starting with `prefix` with `result`.
    pub fn on_prefix(&self, prefix: &str, result: QueryResult) -> &Self {
        self.push(Matcher::Prefix(prefix.to_string()), Ok(result))
    }

    /// Fail `sql` with `error`.
    pub fn fail(&self, sql: &str, error: DriverError) -> &Self {
        self.push(Matcher::Exact(sql.trim().to_string()), Err(error))
    }

    /// Make the next connection attempts fail.
    pub fn refuse_connections(&self, error: DriverError) -> &Self {
        self.lock().connect_error = Some(error);
        self
    }

    /// Every statement received so far, in order.
    pub fn statements(&self) -> Vec<String> {
        self.lock().statements.clone()
    }

    /// How many times `sql` (trimmed) was received.
    pub fn count(&self, sql: &str) -> usize {
        let sql = sql.trim();
        self.lock().statements.iter().filter(|s| *s == sql).count()
    }

    /// Forget the statement log, keeping the rules.
    pub fn clear_statements(&self) {
        self.lock().statements.clear();
    }

    /// Targets passed to [`ScriptedConnector::connect`], in order.
    pub fn targets(&self) -> Vec<ConnectTarget> {
        self.lock().targets.clone()
    }

    /// A driver answering from this script.
    pub fn driver(&self) -> ScriptedDriver {
        ScriptedDriver {
            script: self.clone(),
            closed: false,
        }
    }

    /// A connector handing out drivers for this script.
    pub fn connector(&self) -> ScriptedConnector {
        ScriptedConnector {
            script: self.clone(),
        }
    }

    /// Open a plain connection on this script: host `localhost`, no database,
    /// no TLS and no session setup, so the statement log starts empty.
    pub fn connect(&self) -> DbResult<Connection> {
        let params =
            ConnectionParams::new("localhost", "root", "", "").with_character_set(None);
        ConnectionManager::with_connector(self.connector()).connect(&params)
    }

    /// Open a [`Session`] with the same plain parameters as [`Script::connect`].
    pub fn session(&self) -> DbResult<Session<ScriptedConnector>> {
        let params =
            ConnectionParams::new("localhost", "root", "", "").with_character_set(None);
        Session::open(ConnectionManager::with_connector(self.connector()), &params)
    }

    fn answer(&self, sql: &str) -> Result<QueryResult, DriverError> {
        let sql = sql.trim();
        let mut state = self.lock();
        state.statements.push(sql.to_string());
        let rule = state
            .rules
            .iter()
            .rev()
            .find(|r| matches!(r.matcher, Matcher::Exact(_)) && r.matcher.matches(sql))
            .or_else(|| state.rules.iter().rev().find(|r| r.matcher.matches(sql)));
        match rule {
            Some(rule) => rule.outcome.clone(),
            None => Ok(QueryResult::default()),
        }
    }
}

/// Driver backed by a [`Script`].
#[derive(Debug)]
pub struct ScriptedDriver {
    script: Script,
    closed: bool,
}

impl Driver for ScriptedDriver {
    fn query(&mut self, sql: &str) -> Result<QueryResult, DriverError> {
        if self.closed {
            return Err(DriverError::new(
                CR_SERVER_GONE_ERROR,
                "MySQL server has gone away",
            ));
        }
        self.script.answer(sql)
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

/// Connector backed by a [`Script`].
#[derive(Debug, Clone)]
pub struct ScriptedConnector {
    script: Script,
}

impl Connector for ScriptedConnector {
    fn connect(&self, target: &ConnectTarget) -> Result<Box<dyn Driver>, DriverError> {
        let refused = {
            let mut state = self.script.lock();
            state.targets.push(target.clone());
            state.connect_error.clone()
        };
        if let Some(error) = refused {
            return Err(error);
        }
        Ok(Box::new(self.script.driver()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unmatched_statement_returns_empty_result() {
        let script = Script::new();
        let mut driver = script.driver();
        let result = driver.query("UPDATE t SET a = 1").unwrap();
        assert_eq!(result, QueryResult::default());
        assert_eq!(script.statements(), vec!["UPDATE t SET a = 1".to_string()]);
    }

    #[test]
    fn test_exact_rule_beats_prefix_rule() {
        let script = Script::new();
        script
            .on("SELECT 1", QueryResult::from_rows(&["a"], vec![vec![json!(1)]]))
            .on_prefix("SELECT", QueryResult::from_rows(&["b"], vec![]));
        let mut driver = script.driver();
        assert_eq!(driver.query("SELECT 1").unwrap().columns, vec!["a"]);
        assert_eq!(driver.query("SELECT 2").unwrap().columns, vec!["b"]);
    }

    #[test]
    fn test_later_rule_wins() {
        let script = Script::new();
        script.on("SELECT 1", QueryResult::affected(1));
        script.on("SELECT 1", QueryResult::affected(2));
        assert_eq!(script.driver().query("SELECT 1").unwrap().rows_affected, 2);
    }

    #[test]
    fn test_failures_and_closed_driver() {
        let script = Script::new();
        script.fail("SELECT * FROM nope", DriverError::new(1146, "no such table"));
        let mut driver = script.driver();
        assert_eq!(driver.query("SELECT * FROM nope").unwrap_err().code, 1146);

        driver.close();
        assert!(driver.query("SELECT 1").unwrap_err().is_connection_lost());
        assert_eq!(script.count("SELECT 1"), 0);
    }
}
