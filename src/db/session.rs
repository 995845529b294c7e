//! The explicit context object of the access layer.
//!
//! A [`Session`] owns one connection (through its executor), the transaction
//! depth and the schema cache. All state that would otherwise be process-wide
//! lives here, so two sessions never interfere.

use crate::db::connection::{Connection, ConnectionManager};
use crate::db::driver::Connector;
use crate::db::executor::QueryExecutor;
use crate::db::metrics::QueryObserver;
use crate::db::mysql::MySqlConnector;
use crate::db::schema::SchemaCache;
use crate::db::transaction::{TransactionCoordinator, TransactionIntent};
use crate::error::{DbError, DbResult};
use crate::models::{ColumnRef, ConnectionParams, QueryResult, Row, TableMetadata};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct Session<C: Connector = MySqlConnector> {
    manager: ConnectionManager<C>,
    executor: QueryExecutor,
    transactions: TransactionCoordinator,
    schema: SchemaCache,
}

impl<C: Connector> std::fmt::Debug for Session<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("connection", self.executor.connection())
            .field("transaction_depth", &self.transactions.depth())
            .field("cached_tables", &self.schema.len())
            .finish()
    }
}

impl Session<MySqlConnector> {
    /// Connect to a MySQL server.
    pub fn connect(params: &ConnectionParams) -> DbResult<Self> {
        Self::open(ConnectionManager::new(), params)
    }
}

impl<C: Connector> Session<C> {
    /// Open a session through `manager`.
    pub fn open(manager: ConnectionManager<C>, params: &ConnectionParams) -> DbResult<Self> {
        let connection = manager.connect(params)?;
        Ok(Self {
            manager,
            executor: QueryExecutor::new(connection),
            transactions: TransactionCoordinator::new(),
            schema: SchemaCache::new(),
        })
    }

    /// Report statement timings to `observer`.
    pub fn with_observer(mut self, observer: Arc<dyn QueryObserver>) -> Self {
        self.executor = self.executor.with_observer(observer);
        self
    }

    pub fn connection(&self) -> &Connection {
        self.executor.connection()
    }

    /// Direct access to the executor. Statements sent this way bypass
    /// transaction routing.
    pub fn executor(&mut self) -> &mut QueryExecutor {
        &mut self.executor
    }

    pub fn schema_cache(&self) -> &SchemaCache {
        &self.schema
    }

    // ---------------------------------------------------------------------
    // Statements
    // ---------------------------------------------------------------------

    /// Execute a statement. A statement that is exactly `START TRANSACTION`,
    /// `COMMIT` or `ROLLBACK` goes through the transaction depth counter and
    /// yields an empty result; anything else is sent as is.
    pub fn query(&mut self, sql: &str) -> DbResult<QueryResult> {
        if let Some(intent) = TransactionIntent::recognize(sql) {
            debug!(operation = intent.operation(), "Routing transaction statement");
            self.transactions.apply(&mut self.executor, intent)?;
            return Ok(QueryResult::default());
        }
        self.executor.execute(sql)
    }

    /// Value of `column` in the first row; see [`QueryExecutor::execute_scalar`].
    pub fn query_scalar<'a>(
        &mut self,
        sql: &str,
        column: impl Into<ColumnRef<'a>>,
    ) -> DbResult<JsonValue> {
        self.executor.execute_scalar(sql, column)
    }

    pub fn query_all(&mut self, sql: &str) -> DbResult<Vec<Row>> {
        self.executor.execute_all(sql)
    }

    pub fn query_column<'a>(
        &mut self,
        sql: &str,
        column: impl Into<ColumnRef<'a>>,
    ) -> DbResult<Vec<JsonValue>> {
        self.executor.execute_column(sql, column)
    }

    // ---------------------------------------------------------------------
    // Transactions
    // ---------------------------------------------------------------------

    pub fn begin(&mut self) -> DbResult<()> {
        self.transactions.begin(&mut self.executor)
    }

    pub fn commit(&mut self) -> DbResult<()> {
        self.transactions.commit(&mut self.executor)
    }

    pub fn rollback(&mut self) -> DbResult<()> {
        self.transactions.rollback(&mut self.executor)
    }

    /// Roll back every open level at once.
    pub fn rollback_all(&mut self) -> DbResult<()> {
        self.transactions.rollback_all(&mut self.executor)
    }

    pub fn is_inside_transaction(&self) -> bool {
        self.transactions.is_inside_transaction()
    }

    pub fn transaction_depth(&self) -> u32 {
        self.transactions.depth()
    }

    /// Run `work` inside a transaction level: committed when it returns `Ok`,
    /// rolled back when it returns `Err`. The closure's error wins over a
    /// rollback failure.
    pub fn transaction<T, F>(&mut self, work: F) -> DbResult<T>
    where
        F: FnOnce(&mut Self) -> DbResult<T>,
    {
        self.begin()?;
        match work(&mut *self) {
            Ok(value) => {
                self.commit()?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = self.rollback() {
                    warn!(error = %rollback_err, "Rollback after failed transaction work also failed");
                }
                Err(err)
            }
        }
    }

    // ---------------------------------------------------------------------
    // Schema metadata
    // ---------------------------------------------------------------------

    pub fn table_info(&mut self, table: &str) -> DbResult<Option<&TableMetadata>> {
        self.schema.table_info(&mut self.executor, table)
    }

    pub fn is_table(&mut self, table: &str) -> DbResult<bool> {
        self.schema.is_table(&mut self.executor, table)
    }

    pub fn is_field(&mut self, table: &str, field: &str) -> DbResult<bool> {
        self.schema.is_field(&mut self.executor, table, field)
    }

    pub fn is_key(&mut self, table: &str, field: &str) -> DbResult<bool> {
        self.schema.is_key(&mut self.executor, table, field)
    }

    pub fn is_auto_increment(&mut self, table: &str, field: &str) -> DbResult<bool> {
        self.schema.is_auto_increment(&mut self.executor, table, field)
    }

    pub fn is_null_allowed(&mut self, table: &str, field: &str) -> DbResult<bool> {
        self.schema.is_null_allowed(&mut self.executor, table, field)
    }

    pub fn field_type(&mut self, table: &str, field: &str) -> DbResult<Option<String>> {
        self.schema.field_type(&mut self.executor, table, field)
    }

    pub fn field_spec(&mut self, table: &str, field: &str) -> DbResult<Option<String>> {
        self.schema.field_spec(&mut self.executor, table, field)
    }

    pub fn has_index<S: AsRef<str>>(
        &mut self,
        table: &str,
        index: &str,
        columns: Option<&[S]>,
        lengths: Option<&[Option<u32>]>,
    ) -> DbResult<bool> {
        self.schema
            .has_index(&mut self.executor, table, index, columns, lengths)
    }

    pub fn field_names(&mut self, table: &str) -> DbResult<Vec<String>> {
        self.schema.field_names(&mut self.executor, table)
    }

    /// Forget the cached metadata of one table, e.g. after altering it.
    pub fn reset_table_cache(&mut self, table: &str) {
        self.schema.reset(table);
    }

    pub fn reset_schema_cache(&mut self) {
        self.schema.reset_all();
    }

    // ---------------------------------------------------------------------
    // Connection lifecycle
    // ---------------------------------------------------------------------

    /// Switch the default database. The schema cache is emptied since its
    /// entries belong to the previous database.
    pub fn select_database(&mut self, name: &str) -> DbResult<()> {
        self.executor.connection_mut().select_database(name)?;
        self.schema.reset_all();
        Ok(())
    }

    /// Replace the connection with a fresh one of the same identity.
    ///
    /// Refused while a transaction is open on a live connection. When the
    /// connection was lost the server already discarded the transaction, so the
    /// depth is reset.
    pub fn reconnect(&mut self) -> DbResult<()> {
        if self.transactions.is_inside_transaction() {
            if self.connection().is_open() {
                return Err(DbError::invalid_input(format!(
                    "Cannot reconnect inside a transaction (depth {})",
                    self.transactions.depth()
                )));
            }
            self.transactions.reset();
        }

        let connection = self.manager.reconnect(self.executor.connection())?;
        let mut previous = self.executor.replace_connection(connection);
        previous.close();
        self.schema.reset_all();
        info!("Session reconnected");
        Ok(())
    }

    /// Prepare a reused connection for a new unit of work: roll back anything
    /// left open, drop the schema cache and re-apply the session character set
    /// and time zone.
    pub fn begin_unit_of_work(&mut self) -> DbResult<()> {
        if self.transactions.is_inside_transaction() {
            warn!(
                depth = self.transactions.depth(),
                "Previous unit of work left a transaction open"
            );
            self.transactions.rollback_all(&mut self.executor)?;
        }
        self.schema.reset_all();

        let connection = self.executor.connection_mut();
        if let Some(character_set) = connection.character_set().cloned() {
            connection.set_character_set(&character_set)?;
        }
        if let Some(timezone) = connection.timezone().map(str::to_string) {
            connection.set_timezone(&timezone)?;
        }
        Ok(())
    }

    /// Close the connection. Open transaction levels are discarded with it.
    pub fn close(mut self) {
        if self.transactions.is_inside_transaction() {
            warn!(
                depth = self.transactions.depth(),
                "Closing session with an open transaction"
            );
            self.transactions.reset();
        }
        self.executor.connection_mut().close();
    }
}
