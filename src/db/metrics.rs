//! Per-query cost reporting.
//!
//! Every connection reports each statement, successful or not, to a
//! [`QueryObserver`]. [`TracingObserver`] logs it; [`QueryStats`] aggregates it
//! per statement kind.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tracing::debug;

/// One executed statement.
#[derive(Debug, Clone, Copy)]
pub struct QueryEvent<'a> {
    /// Statement kind, e.g. `SELECT` or `SHOW`
    pub label: &'a str,
    pub sql: &'a str,
    pub elapsed: Duration,
    pub success: bool,
    pub rows: usize,
}

/// Sink for statement timings.
pub trait QueryObserver: Send + Sync {
    fn observe(&self, event: &QueryEvent<'_>);
}

/// Logs every statement at debug level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl QueryObserver for TracingObserver {
    fn observe(&self, event: &QueryEvent<'_>) {
        debug!(
            label = event.label,
            sql = %event.sql,
            elapsed_ms = event.elapsed.as_millis() as u64,
            success = event.success,
            rows = event.rows,
            "Query executed"
        );
    }
}

/// Aggregated timings for one statement kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct LabelStats {
    pub count: u64,
    pub failures: u64,
    pub total: Duration,
    pub max: Duration,
}

/// In-memory aggregate keyed by statement kind.
#[derive(Debug, Default)]
pub struct QueryStats {
    labels: Mutex<BTreeMap<String, LabelStats>>,
}

impl QueryStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the current aggregates.
    pub fn snapshot(&self) -> BTreeMap<String, LabelStats> {
        self.labels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Total statements seen.
    pub fn total_count(&self) -> u64 {
        self.snapshot().values().map(|s| s.count).sum()
    }
}

impl QueryObserver for QueryStats {
    fn observe(&self, event: &QueryEvent<'_>) {
        let mut labels = self.labels.lock().unwrap_or_else(PoisonError::into_inner);
        let stats = labels.entry(event.label.to_string()).or_default();
        stats.count += 1;
        if !event.success {
            stats.failures += 1;
        }
        stats.total += event.elapsed;
        stats.max = stats.max.max(event.elapsed);
    }
}

/// Statement kind used as the observer label: the first keyword, upper-cased.
pub fn statement_kind(sql: &str) -> String {
    sql.split_whitespace()
        .next()
        .map(|word| word.trim_end_matches(';').to_ascii_uppercase())
        .filter(|word| !word.is_empty())
        .unwrap_or_else(|| "EMPTY".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(label: &'static str, ms: u64, success: bool) -> QueryEvent<'static> {
        QueryEvent {
            label,
            sql: "SELECT 1",
            elapsed: Duration::from_millis(ms),
            success,
            rows: 1,
        }
    }

    #[test]
    fn test_stats_aggregate_per_label() {
        let stats = QueryStats::new();
        stats.observe(&event("SELECT", 5, true));
        stats.observe(&event("SELECT", 12, false));
        stats.observe(&event("SHOW", 1, true));

        let snapshot = stats.snapshot();
        let select = &snapshot["SELECT"];
        assert_eq!(select.count, 2);
        assert_eq!(select.failures, 1);
        assert_eq!(select.total, Duration::from_millis(17));
        assert_eq!(select.max, Duration::from_millis(12));
        assert_eq!(stats.total_count(), 3);
    }

    #[test]
    fn test_statement_kind() {
        assert_eq!(statement_kind("  select * from t"), "SELECT");
        assert_eq!(statement_kind("COMMIT;"), "COMMIT");
        assert_eq!(statement_kind("   "), "EMPTY");
    }
}
