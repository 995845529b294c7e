//! Integration tests for nested transactions.

use db_source::DbError;
use db_source::db::scripted::Script;
use db_source::db::transaction::{BEGIN_SQL, COMMIT_SQL, ROLLBACK_SQL};
use db_source::db::DriverError;

fn boundaries(script: &Script) -> Vec<String> {
    script
        .statements()
        .into_iter()
        .filter(|s| s == BEGIN_SQL || s == COMMIT_SQL || s == ROLLBACK_SQL)
        .collect()
}

#[test]
fn test_nested_levels_send_one_pair() {
    for depth in 1..=5 {
        let script = Script::new();
        let mut session = script.session().unwrap();
        for _ in 0..depth {
            session.begin().unwrap();
        }
        assert_eq!(session.transaction_depth(), depth);
        for _ in 0..depth {
            session.commit().unwrap();
        }
        assert!(!session.is_inside_transaction());
        assert_eq!(boundaries(&script), vec![BEGIN_SQL, COMMIT_SQL]);
    }
}

#[test]
fn test_inner_rollback_then_outer_rollback() {
    let script = Script::new();
    let mut session = script.session().unwrap();
    session.begin().unwrap();
    session.begin().unwrap();
    session.rollback().unwrap();
    assert_eq!(session.transaction_depth(), 1);
    assert_eq!(script.count(ROLLBACK_SQL), 0);

    session.rollback().unwrap();
    assert_eq!(session.transaction_depth(), 0);
    assert_eq!(boundaries(&script), vec![BEGIN_SQL, ROLLBACK_SQL]);
}

#[test]
fn test_inner_rollback_then_outer_commit_commits() {
    let script = Script::new();
    let mut session = script.session().unwrap();
    session.begin().unwrap();
    session.query("INSERT INTO ticket (ref) VALUES ('R-1')").unwrap();
    session.begin().unwrap();
    session.query("INSERT INTO ticket (ref) VALUES ('R-2')").unwrap();
    session.rollback().unwrap();
    session.commit().unwrap();

    assert_eq!(boundaries(&script), vec![BEGIN_SQL, COMMIT_SQL]);
}

#[test]
fn test_boundaries_at_depth_zero_fail() {
    let script = Script::new();
    let mut session = script.session().unwrap();
    assert!(matches!(session.commit(), Err(DbError::NoTransaction { .. })));
    assert!(matches!(session.rollback(), Err(DbError::NoTransaction { .. })));
    assert!(matches!(session.query("COMMIT"), Err(DbError::NoTransaction { .. })));
    assert!(script.statements().is_empty());
}

#[test]
fn test_statement_text_is_routed() {
    let script = Script::new();
    let mut session = script.session().unwrap();
    session.query("START TRANSACTION").unwrap();
    session.query("START TRANSACTION").unwrap();
    session.query("ROLLBACK").unwrap();
    session.query("ROLLBACK").unwrap();
    assert_eq!(boundaries(&script), vec![BEGIN_SQL, ROLLBACK_SQL]);
}

#[test]
fn test_failed_outer_commit_leaves_depth_zero() {
    let script = Script::new();
    script.fail(COMMIT_SQL, DriverError::new(1213, "Deadlock found when trying to get lock"));
    let mut session = script.session().unwrap();
    session.begin().unwrap();
    let err = session.commit().unwrap_err();
    assert_eq!(err.code(), Some(1213));
    assert_eq!(session.transaction_depth(), 0);
}

#[test]
fn test_closure_rolls_back_nested_work() {
    let script = Script::new();
    let mut session = script.session().unwrap();
    let outcome: Result<(), DbError> = session.transaction(|s| {
        s.transaction(|inner| {
            inner.query("DELETE FROM ticket")?;
            Ok(())
        })?;
        Err(DbError::invalid_input("validation failed"))
    });
    assert!(outcome.is_err());
    assert_eq!(boundaries(&script), vec![BEGIN_SQL, ROLLBACK_SQL]);
}
