//! Integration tests for connection establishment.

use db_source::DbError;
use db_source::db::scripted::{Script, ScriptedConnector};
use db_source::db::{ConnectionManager, DriverError, QueryStats, TlsMode};
use db_source::models::{ConnectionParams, HostSpec, QueryResult, TlsOptions};
use serde_json::json;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

const SSL_VERSION_SQL: &str = "SHOW SESSION STATUS LIKE 'ssl_version'";
const SSL_CIPHER_SQL: &str = "SHOW SESSION STATUS LIKE 'ssl_cipher'";

fn status(name: &str, value: &str) -> QueryResult {
    QueryResult::from_rows(&["Variable_name", "Value"], vec![vec![json!(name), json!(value)]])
}

fn manager(script: &Script) -> ConnectionManager<ScriptedConnector> {
    ConnectionManager::with_connector(script.connector())
}

fn tls_params(ca: Option<PathBuf>) -> ConnectionParams {
    ConnectionParams::new("db.example.com", "itop", "secret", "itop")
        .with_tls(TlsOptions::enabled(ca))
}

#[test]
fn test_plaintext_session_rejected_before_use() {
    let script = Script::new();
    script
        .on(SSL_VERSION_SQL, status("Ssl_version", ""))
        .on(SSL_CIPHER_SQL, status("Ssl_cipher", ""));

    let err = manager(&script).connect(&tls_params(None)).unwrap_err();
    assert!(matches!(err, DbError::Connection { .. }));
    assert!(err.suggestion().is_some());
    assert_eq!(script.statements(), vec![SSL_VERSION_SQL.to_string()]);
    assert_eq!(script.count("USE `itop`"), 0);
}

#[test]
fn test_missing_cipher_is_rejected() {
    let script = Script::new();
    script.on(SSL_VERSION_SQL, status("Ssl_version", "TLSv1.3"));

    let err = manager(&script).connect(&tls_params(None)).unwrap_err();
    assert!(matches!(err, DbError::Connection { .. }));
    assert!(script.statements().iter().all(|s| !s.starts_with("USE")));
}

#[test]
fn test_encrypted_session_accepted() {
    let script = Script::new();
    script
        .on(SSL_VERSION_SQL, status("Ssl_version", "TLSv1.3"))
        .on(SSL_CIPHER_SQL, status("Ssl_cipher", "TLS_AES_256_GCM_SHA384"));

    let connection = manager(&script).connect(&tls_params(None)).unwrap();
    assert_eq!(connection.database(), "itop");
    assert_eq!(script.targets()[0].tls, TlsMode::EncryptOnly);
    assert_eq!(
        &script.statements()[..3],
        &[
            SSL_VERSION_SQL.to_string(),
            SSL_CIPHER_SQL.to_string(),
            "USE `itop`".to_string()
        ]
    );
}

#[test]
fn test_ca_file_selects_verification() {
    let mut ca = tempfile::NamedTempFile::new().unwrap();
    writeln!(ca, "-----BEGIN CERTIFICATE-----").unwrap();

    let script = Script::new();
    script
        .on(SSL_VERSION_SQL, status("Ssl_version", "TLSv1.2"))
        .on(SSL_CIPHER_SQL, status("Ssl_cipher", "ECDHE-RSA-AES128-GCM-SHA256"));

    manager(&script)
        .connect(&tls_params(Some(ca.path().to_path_buf())))
        .unwrap();
    assert_eq!(
        script.targets()[0].tls,
        TlsMode::VerifyCa(ca.path().to_path_buf())
    );
}

#[test]
fn test_missing_ca_file_fails_without_connecting() {
    let dir = tempfile::tempdir().unwrap();
    let script = Script::new();

    let err = manager(&script)
        .connect(&tls_params(Some(dir.path().join("missing-ca.pem"))))
        .unwrap_err();
    assert!(matches!(err, DbError::Connection { .. }));
    assert!(script.targets().is_empty());
}

#[test]
fn test_plain_connection_applies_session_settings() {
    let script = Script::new();
    let params = ConnectionParams::new("p:db.example.com:3307", "itop", "secret", "itop")
        .with_timezone("+00:00");

    let connection = manager(&script).connect(&params).unwrap();
    assert!(connection.is_persistent());
    assert_eq!(connection.port(), 3307);

    let target = &script.targets()[0];
    assert_eq!(target.host, "db.example.com");
    assert_eq!(target.port, 3307);
    assert_eq!(target.tls, TlsMode::Disabled);
    assert!(!format!("{target:?}").contains("secret"));

    assert_eq!(
        script.statements(),
        vec![
            "USE `itop`".to_string(),
            "SET NAMES 'utf8mb4' COLLATE 'utf8mb4_unicode_ci'".to_string(),
            "SET time_zone = '+00:00'".to_string(),
        ]
    );
}

#[test]
fn test_refused_connection_names_host_and_user() {
    let script = Script::new();
    script.refuse_connections(DriverError::new(1045, "Access denied for user 'itop'"));

    let params = ConnectionParams::new("db.example.com", "itop", "wrong", "");
    match manager(&script).connect(&params).unwrap_err() {
        DbError::Connection { message, suggestion } => {
            assert!(message.contains("host=db.example.com"));
            assert!(message.contains("user=itop"));
            assert!(!message.contains("wrong"));
            assert_eq!(suggestion, "Verify the username and password");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn test_host_spec_examples() {
    let spec = HostSpec::parse("p:db.example.com:3307").unwrap();
    assert!(spec.persistent);
    assert_eq!(spec.host, "db.example.com");
    assert_eq!(spec.port, 3307);

    let spec = HostSpec::parse("localhost").unwrap();
    assert!(!spec.persistent);
    assert_eq!(spec.port, 3306);

    assert!(HostSpec::parse("localhost:notaport").is_err());
}

#[test]
fn test_params_from_url_connect() {
    let script = Script::new();
    let params = ConnectionParams::from_url("mysql://app:p%40ss@db:3310/crm")
        .unwrap()
        .with_character_set(None);
    assert_eq!(params.password, "p@ss");

    let connection = manager(&script).connect(&params).unwrap();
    assert_eq!(connection.database(), "crm");
    assert_eq!(script.targets()[0].password, "p@ss");
    assert_eq!(script.targets()[0].port, 3310);
}

#[test]
fn test_session_settings_reach_the_observer() {
    let script = Script::new();
    let stats = Arc::new(QueryStats::new());
    let mut session = script.session().unwrap().with_observer(stats.clone());

    session.set_timezone("+00:00").unwrap();
    session.set_character_set("utf8mb4", "utf8mb4_unicode_ci").unwrap();
    session.select_database("itop").unwrap();
    session.begin().unwrap();
    session.query("UPDATE ticket SET status = 'closed'").unwrap();
    session.commit().unwrap();
    session.begin_unit_of_work().unwrap();
    session.reconnect().unwrap();
    session.query("SELECT 1").unwrap();

    assert_eq!(stats.total_count(), script.statements().len() as u64);
    let snapshot = stats.snapshot();
    // explicit, unit of work, reconnect
    assert_eq!(snapshot["SET"].count, 6);
    assert_eq!(snapshot["USE"].count, 2);
    assert_eq!(snapshot["SELECT"].count, 1);
}
