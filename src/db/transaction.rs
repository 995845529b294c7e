//! Nested transactions over MySQL's single-level transactions.
//!
//! MySQL has no nested transactions: a second `START TRANSACTION` implicitly
//! commits the first. [`TransactionCoordinator`] keeps a depth counter instead.
//! Only the outermost begin reaches the server, and only the commit or rollback
//! that brings the depth back to zero does.
//!
//! An inner rollback therefore undoes nothing by itself. The work is undone only
//! when the outermost level also rolls back; if the outermost level commits, the
//! inner work is committed with it.

use crate::db::executor::QueryExecutor;
use crate::error::{DbError, DbResult};
use tracing::{debug, warn};

pub const BEGIN_SQL: &str = "START TRANSACTION";
pub const COMMIT_SQL: &str = "COMMIT";
pub const ROLLBACK_SQL: &str = "ROLLBACK";

/// Transaction boundary recognised in SQL text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionIntent {
    Begin,
    Commit,
    Rollback,
}

impl TransactionIntent {
    /// Recognise a statement that is exactly `START TRANSACTION`, `COMMIT` or
    /// `ROLLBACK`: case-insensitive, surrounding whitespace ignored, internal
    /// whitespace collapsed, one optional trailing semicolon.
    ///
    /// Statements that merely mention those words are not transaction
    /// boundaries.
    pub fn recognize(sql: &str) -> Option<Self> {
        let trimmed = sql.trim();
        let trimmed = trimmed.strip_suffix(';').unwrap_or(trimmed);
        let normalized = trimmed
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_ascii_uppercase();

        match normalized.as_str() {
            BEGIN_SQL => Some(Self::Begin),
            COMMIT_SQL => Some(Self::Commit),
            ROLLBACK_SQL => Some(Self::Rollback),
            _ => None,
        }
    }

    pub fn operation(&self) -> &'static str {
        match self {
            Self::Begin => "begin",
            Self::Commit => "commit",
            Self::Rollback => "rollback",
        }
    }
}

/// Depth counter collapsing nested begin/commit/rollback onto one transaction.
#[derive(Debug, Default)]
pub struct TransactionCoordinator {
    depth: u32,
}

impl TransactionCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of unmatched begins.
    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn is_inside_transaction(&self) -> bool {
        self.depth > 0
    }

    /// Open a transaction level. Only the outermost level sends
    /// `START TRANSACTION`; the depth is unchanged if that statement fails.
    pub fn begin(&mut self, executor: &mut QueryExecutor) -> DbResult<()> {
        if self.depth == 0 {
            executor.execute(BEGIN_SQL)?;
        }
        self.depth += 1;
        debug!(depth = self.depth, "Transaction level opened");
        Ok(())
    }

    /// Close a level by committing. Only the outermost level sends `COMMIT`.
    pub fn commit(&mut self, executor: &mut QueryExecutor) -> DbResult<()> {
        self.end(executor, TransactionIntent::Commit)
    }

    /// Close a level by rolling back. Only the outermost level sends `ROLLBACK`;
    /// an inner rollback is bookkeeping only.
    pub fn rollback(&mut self, executor: &mut QueryExecutor) -> DbResult<()> {
        self.end(executor, TransactionIntent::Rollback)
    }

    /// Roll back whatever is open, regardless of depth. No-op at depth 0.
    pub fn rollback_all(&mut self, executor: &mut QueryExecutor) -> DbResult<()> {
        if self.depth == 0 {
            return Ok(());
        }
        warn!(depth = self.depth, "Rolling back all transaction levels");
        self.depth = 0;
        executor.execute(ROLLBACK_SQL)?;
        Ok(())
    }

    /// Forget the depth without touching the server, e.g. after the connection
    /// was lost and the server already discarded the transaction.
    pub fn reset(&mut self) {
        if self.depth > 0 {
            warn!(depth = self.depth, "Discarding transaction depth");
        }
        self.depth = 0;
    }

    /// Apply a recognised boundary.
    pub fn apply(&mut self, executor: &mut QueryExecutor, intent: TransactionIntent) -> DbResult<()> {
        match intent {
            TransactionIntent::Begin => self.begin(executor),
            TransactionIntent::Commit => self.commit(executor),
            TransactionIntent::Rollback => self.rollback(executor),
        }
    }

    // The depth drops before the real statement is sent: a failed COMMIT or
    // ROLLBACK still leaves the coordinator at depth 0.
    fn end(&mut self, executor: &mut QueryExecutor, intent: TransactionIntent) -> DbResult<()> {
        if self.depth == 0 {
            return Err(DbError::no_transaction(intent.operation()));
        }

        self.depth -= 1;
        if self.depth > 0 {
            if intent == TransactionIntent::Rollback {
                warn!(
                    depth = self.depth,
                    "Inner rollback recorded; nothing is undone until the outermost level rolls back"
                );
            } else {
                debug!(depth = self.depth, "Inner commit recorded");
            }
            return Ok(());
        }

        let sql = match intent {
            TransactionIntent::Rollback => ROLLBACK_SQL,
            _ => COMMIT_SQL,
        };
        executor.execute(sql)?;
        debug!(operation = intent.operation(), "Transaction closed");
        Ok(())
    }
}
