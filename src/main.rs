//! db-source - Main entry point.
//!
//! Diagnostic binary over the access layer: checks a connection, describes a
//! table, runs a statement or compares two column types. Results go to stdout
//! as JSON; logs go to stderr.

use clap::Parser;
use db_source::Session;
use db_source::config::{Command, Config};
use db_source::db::{ConnectionManager, QueryStats, is_same_field_type};
use db_source::error::DbError;
use serde_json::{Value as JsonValue, json};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

fn open_session(config: &Config) -> Result<Session, DbError> {
    let params = config
        .connection_params()
        .map_err(|e| DbError::invalid_input(e.to_string()))?;
    let manager = ConnectionManager::new().with_connect_timeout(config.connect_timeout_duration());
    Session::open(manager, &params)
}

fn check(session: &mut Session) -> Result<JsonValue, DbError> {
    let version = session.server_version()?;
    let vendor = session.vendor()?;
    let connection = session.connection();
    Ok(json!({
        "server": connection.server(),
        "port": connection.port(),
        "persistent": connection.is_persistent(),
        "user": connection.user(),
        "database": connection.database(),
        "tls": connection.tls(),
        "character_set": connection.character_set(),
        "version": version,
        "vendor": vendor.display_name(),
    }))
}

fn describe(session: &mut Session, table: &str) -> Result<JsonValue, DbError> {
    let Some(metadata) = session.table_info(table)? else {
        return Err(DbError::invalid_input(format!("No such table: {table}")));
    };
    let specs: Vec<JsonValue> = metadata
        .fields
        .iter()
        .map(|f| json!({ "name": f.name, "spec": f.spec() }))
        .collect();
    Ok(json!({ "table": metadata, "specs": specs }))
}

fn query(session: &mut Session, sql: &str, stats: &QueryStats) -> Result<JsonValue, DbError> {
    let result = session.query(sql)?;
    let rows: Vec<JsonValue> = result
        .rows
        .iter()
        .map(|row| JsonValue::Object(row.to_json_map()))
        .collect();
    Ok(json!({
        "columns": result.columns,
        "rows": rows,
        "rows_affected": result.rows_affected,
        "last_insert_id": result.last_insert_id,
        "stats": stats.snapshot(),
    }))
}

fn with_session<F>(config: &Config, work: F) -> Result<JsonValue, DbError>
where
    F: FnOnce(&mut Session, &QueryStats) -> Result<JsonValue, DbError>,
{
    let stats = Arc::new(QueryStats::new());
    let mut session = open_session(config)?.with_observer(stats.clone());
    let output = work(&mut session, stats.as_ref());
    session.close();
    output
}

fn run(config: &Config) -> Result<JsonValue, DbError> {
    match &config.command {
        Command::CompareTypes { generated, actual } => Ok(json!({
            "generated": generated,
            "actual": actual,
            "same": is_same_field_type(generated, actual),
        })),
        Command::Check => with_session(config, |session, _| check(session)),
        Command::Describe { table } => with_session(config, |session, _| describe(session, table)),
        Command::Query { sql } => with_session(config, |session, stats| query(session, sql, stats)),
    }
}

fn main() -> ExitCode {
    // Parse configuration from command line and environment
    let config = Config::parse();

    // Initialize logging
    init_tracing(&config);

    info!(command = ?config.command, "Starting db-source v{}", env!("CARGO_PKG_VERSION"));

    match run(&config) {
        Ok(output) => {
            println!("{output:#}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Command failed");
            let output = json!({
                "error": e.to_string(),
                "code": e.code(),
                "suggestion": e.suggestion(),
            });
            println!("{output:#}");
            ExitCode::FAILURE
        }
    }
}
