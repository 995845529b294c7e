//! Query-related data models.
//!
//! This module defines the materialized result of a statement and its rows.

use serde_json::Value as JsonValue;
use std::sync::Arc;

/// Column selector: by zero-based ordinal or by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnRef<'a> {
    Index(usize),
    Name(&'a str),
}

impl From<usize> for ColumnRef<'_> {
    fn from(index: usize) -> Self {
        Self::Index(index)
    }
}

impl<'a> From<&'a str> for ColumnRef<'a> {
    fn from(name: &'a str) -> Self {
        Self::Name(name)
    }
}

impl std::fmt::Display for ColumnRef<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Index(i) => write!(f, "#{}", i),
            Self::Name(n) => write!(f, "'{}'", n),
        }
    }
}

/// One result row. Values are addressable by ordinal and by column name.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<JsonValue>,
}

impl Row {
    /// Create a row sharing the column names of its result set.
    pub fn new(columns: Arc<[String]>, values: Vec<JsonValue>) -> Self {
        Self { columns, values }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[JsonValue] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Get a cell. Name lookup is exact first, then ASCII case-insensitive.
    pub fn get<'a>(&self, column: impl Into<ColumnRef<'a>>) -> Option<&JsonValue> {
        match column.into() {
            ColumnRef::Index(i) => self.values.get(i),
            ColumnRef::Name(name) => self
                .position(name)
                .and_then(|i| self.values.get(i)),
        }
    }

    /// Get a cell rendered as text. SQL NULL and missing columns yield `None`.
    pub fn get_string<'a>(&self, column: impl Into<ColumnRef<'a>>) -> Option<String> {
        self.get(column).and_then(value_to_string)
    }

    /// Get a cell as an unsigned integer, accepting numeric strings.
    pub fn get_u64<'a>(&self, column: impl Into<ColumnRef<'a>>) -> Option<u64> {
        match self.get(column)? {
            JsonValue::Number(n) => n.as_u64(),
            JsonValue::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Convert to a JSON object keyed by column name.
    pub fn to_json_map(&self) -> serde_json::Map<String, JsonValue> {
        self.columns
            .iter()
            .cloned()
            .zip(self.values.iter().cloned())
            .collect()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c == name)
            .or_else(|| self.columns.iter().position(|c| c.eq_ignore_ascii_case(name)))
    }
}

/// Render a scalar JSON value the way the server would print it.
pub fn value_to_string(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::Null => None,
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Bool(b) => Some(if *b { "1" } else { "0" }.to_string()),
        JsonValue::Number(n) => Some(n.to_string()),
        other => Some(other.to_string()),
    }
}

/// Fully materialized statement result.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
    pub rows_affected: u64,
    /// Set when the statement generated an AUTO_INCREMENT value.
    pub last_insert_id: Option<u64>,
}

impl QueryResult {
    /// Build a result set from column names and raw row values.
    pub fn from_rows<S: AsRef<str>>(columns: &[S], rows: Vec<Vec<JsonValue>>) -> Self {
        let names: Vec<String> = columns.iter().map(|c| c.as_ref().to_string()).collect();
        let shared: Arc<[String]> = names.clone().into();
        let rows = rows
            .into_iter()
            .map(|values| Row::new(Arc::clone(&shared), values))
            .collect();
        Self {
            columns: names,
            rows,
            rows_affected: 0,
            last_insert_id: None,
        }
    }

    /// Result of a statement that returns no rows.
    pub fn affected(rows_affected: u64) -> Self {
        Self {
            rows_affected,
            ..Self::default()
        }
    }

    /// Set the generated AUTO_INCREMENT value.
    pub fn with_last_insert_id(mut self, id: u64) -> Self {
        self.last_insert_id = Some(id);
        self
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn first(&self) -> Option<&Row> {
        self.rows.first()
    }

    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }
}
