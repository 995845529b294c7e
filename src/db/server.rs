//! Server-level helpers on [`Session`]: databases, privileges, replication
//! status, charset checks and a few statement shortcuts.

use crate::db::driver::Connector;
use crate::db::quote::{quote_identifier, quote_literal};
use crate::db::schema::schema_literal;
use crate::db::session::Session;
use crate::error::{DbError, DbResult};
use crate::models::{
    CharacterSet, DEFAULT_CHARACTER_SET, DEFAULT_COLLATION, DbVendor, QueryResult, Row,
    value_to_string,
};
use tracing::{debug, info};

/// `SHOW SLAVE STATUS` columns telling whether a replication thread runs.
const REPLICA_THREAD_COLUMNS: [&str; 2] = ["Slave_IO_Running", "Slave_SQL_Running"];

impl<C: Connector> Session<C> {
    pub fn set_character_set(&mut self, charset: &str, collation: &str) -> DbResult<()> {
        self.executor()
            .connection_mut()
            .set_character_set(&CharacterSet::new(charset, collation))
    }

    pub fn set_timezone(&mut self, timezone: &str) -> DbResult<()> {
        self.executor().connection_mut().set_timezone(timezone)
    }

    // ---------------------------------------------------------------------
    // Databases
    // ---------------------------------------------------------------------

    pub fn list_databases(&mut self) -> DbResult<Vec<String>> {
        let values = self.query_column("SHOW DATABASES", 0)?;
        Ok(values.iter().filter_map(value_to_string).collect())
    }

    /// Whether database `name` exists, compared case-insensitively.
    ///
    /// When the user may not list databases, falls back to trying `USE` and
    /// switching back to the selected database. A session with no database
    /// selected cannot switch back, so it stays on `name`.
    pub fn is_database(&mut self, name: &str) -> DbResult<bool> {
        match self.list_databases() {
            Ok(names) => Ok(names.iter().any(|n| n.eq_ignore_ascii_case(name))),
            Err(DbError::Query { code, .. }) => {
                debug!(code, database = %name, "Cannot list databases, probing with USE");
                self.probe_database(name)
            }
            Err(err) => Err(err),
        }
    }

    fn probe_database(&mut self, name: &str) -> DbResult<bool> {
        let previous = self.connection().database().to_string();
        match self.query(&format!("USE {}", quote_identifier(name))) {
            Ok(_) => {}
            Err(DbError::Query { .. }) => return Ok(false),
            Err(err) => return Err(err),
        }

        if previous.is_empty() {
            self.executor().connection_mut().set_database(name);
            self.reset_schema_cache();
        } else {
            self.query(&format!("USE {}", quote_identifier(&previous)))?;
        }
        Ok(true)
    }

    /// Create a database with the default charset and collation, then select it.
    pub fn create_database(&mut self, name: &str) -> DbResult<()> {
        let sql = format!(
            "CREATE DATABASE {} CHARACTER SET {} COLLATE {}",
            quote_identifier(name),
            DEFAULT_CHARACTER_SET,
            DEFAULT_COLLATION
        );
        self.query(&sql)?;
        info!(database = %name, "Database created");
        self.select_database(name)
    }

    /// Drop `name`, or the selected database when `None`.
    pub fn drop_database(&mut self, name: Option<&str>) -> DbResult<()> {
        let current = self.connection().database().to_string();
        let name = name.unwrap_or(&current).to_string();
        if name.is_empty() {
            return Err(DbError::invalid_input("No database to drop"));
        }

        self.query(&format!("DROP DATABASE {}", quote_identifier(&name)))?;
        info!(database = %name, "Database dropped");
        if name == current {
            self.executor().connection_mut().clear_database();
        }
        self.reset_schema_cache();
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Server information
    // ---------------------------------------------------------------------

    /// Value of the global or session variable `name`, `None` for NULL.
    pub fn server_variable(&mut self, name: &str) -> DbResult<Option<String>> {
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.');
        if !valid {
            return Err(DbError::invalid_input(format!(
                "Invalid server variable name: {name:?}"
            )));
        }
        let value = self.query_scalar(&format!("SELECT @@{name} AS theVar"), "theVar")?;
        Ok(value_to_string(&value))
    }

    pub fn server_version(&mut self) -> DbResult<String> {
        Ok(self.server_variable("version")?.unwrap_or_default())
    }

    pub fn vendor(&mut self) -> DbResult<DbVendor> {
        let version = self.server_version()?;
        let comment = self.server_variable("version_comment")?.unwrap_or_default();
        Ok(DbVendor::detect(&version, &comment))
    }

    /// Grants of the current user: rows joined with `", "`, columns with `"/"`.
    pub fn raw_privileges(&mut self) -> DbResult<String> {
        let rows = self.query_all("SHOW GRANTS")?;
        Ok(rows
            .iter()
            .map(|row| {
                row.values()
                    .iter()
                    .filter_map(value_to_string)
                    .collect::<Vec<_>>()
                    .join("/")
            })
            .collect::<Vec<_>>()
            .join(", "))
    }

    /// Whether this server replicates from a source: its IO or SQL thread runs.
    pub fn is_replica(&mut self) -> DbResult<bool> {
        let rows = self.query_all("SHOW SLAVE STATUS")?;
        Ok(rows.iter().any(|row| {
            REPLICA_THREAD_COLUMNS
                .iter()
                .any(|column| row.get_string(*column).as_deref() == Some("Yes"))
        }))
    }

    // ---------------------------------------------------------------------
    // Tables and statements
    // ---------------------------------------------------------------------

    /// Run a `CREATE TABLE` statement. The whole schema cache is dropped.
    pub fn create_table(&mut self, sql: &str) -> DbResult<()> {
        self.query(sql)?;
        self.reset_schema_cache();
        Ok(())
    }

    pub fn drop_table(&mut self, table: &str) -> DbResult<()> {
        self.query(&format!("DROP TABLE {}", quote_identifier(table)))?;
        self.reset_schema_cache();
        Ok(())
    }

    /// Run an `INSERT` and return the generated id, 0 when there is none.
    pub fn insert(&mut self, sql: &str) -> DbResult<u64> {
        Ok(self.query(sql)?.last_insert_id.unwrap_or(0))
    }

    /// Rows changed by the last successful statement.
    pub fn affected_rows(&self) -> u64 {
        self.connection().affected_rows()
    }

    /// `AUTO_INCREMENT` value the next insert into `table` will get.
    pub fn next_insert_id(&mut self, table: &str) -> DbResult<Option<u64>> {
        let sql = format!("SHOW TABLE STATUS LIKE {}", quote_literal(table));
        let result = self.query(&sql)?;
        Ok(result.first().and_then(|row| row.get_u64("Auto_increment")))
    }

    /// Run `sql` (typically an `EXPLAIN`) and keep column names with the rows.
    pub fn explain(&mut self, sql: &str) -> DbResult<QueryResult> {
        self.query(sql)
    }

    /// Check that `sql` runs, discarding its result.
    pub fn test_query(&mut self, sql: &str) -> DbResult<()> {
        self.query(sql).map(|_| ())
    }

    pub fn dump_table(&mut self, table: &str) -> DbResult<Vec<Row>> {
        self.query_all(&format!("SELECT * FROM {}", quote_identifier(table)))
    }

    // ---------------------------------------------------------------------
    // Charset checks
    // ---------------------------------------------------------------------

    /// `ALTER TABLE` statement converting `table` to the default charset and
    /// collation, `None` when it already uses them or does not exist.
    pub fn check_table_charset(&mut self, table: &str) -> DbResult<Option<String>> {
        let sql = format!(
            "SELECT C.CHARACTER_SET_NAME AS charset, T.TABLE_COLLATION AS collation \
             FROM information_schema.`TABLES` T \
             JOIN information_schema.`COLLATION_CHARACTER_SET_APPLICABILITY` C \
             ON T.TABLE_COLLATION = C.COLLATION_NAME \
             WHERE T.TABLE_SCHEMA = {} AND T.TABLE_NAME = {}",
            schema_literal(self.connection().database()),
            quote_literal(table)
        );
        let result = self.query(&sql)?;
        let Some(row) = result.first() else {
            return Ok(None);
        };
        if uses_defaults(row) {
            return Ok(None);
        }
        Ok(Some(format!(
            "ALTER TABLE {} CHARACTER SET {} COLLATE {}",
            quote_identifier(table),
            DEFAULT_CHARACTER_SET,
            DEFAULT_COLLATION
        )))
    }

    /// `ALTER DATABASE` statement converting the selected database to the
    /// default charset and collation, `None` when it already uses them.
    pub fn check_database_charset(&mut self) -> DbResult<Option<String>> {
        let sql = format!(
            "SELECT DEFAULT_CHARACTER_SET_NAME AS charset, DEFAULT_COLLATION_NAME AS collation \
             FROM information_schema.SCHEMATA WHERE SCHEMA_NAME = {}",
            schema_literal(self.connection().database())
        );
        let result = self.query(&sql)?;
        let Some(row) = result.first() else {
            return Ok(None);
        };
        if uses_defaults(row) {
            return Ok(None);
        }
        Ok(Some(format!(
            "ALTER DATABASE CHARACTER SET {} COLLATE {}",
            DEFAULT_CHARACTER_SET, DEFAULT_COLLATION
        )))
    }
}

fn uses_defaults(row: &Row) -> bool {
    row.get_string("charset").as_deref() == Some(DEFAULT_CHARACTER_SET)
        && row.get_string("collation").as_deref() == Some(DEFAULT_COLLATION)
}
