//! Schema metadata cache.
//!
//! Per-table column and index metadata, loaded on first access from
//! `information_schema.COLUMNS` and `SHOW INDEXES`, then served from memory until
//! it is reset. An entry is either absent or complete: if either catalog query
//! fails nothing is cached. A table with no columns in the catalog does not exist
//! and is never cached, so it is looked up again next time.
//!
//! # Architecture
//!
//! SQL text lives in the `queries` submodule; row mapping is in `load_table`.

use crate::db::executor::QueryExecutor;
use crate::db::quote::quote_literal;
use crate::error::DbResult;
use crate::models::{FieldInfo, IndexColumn, IndexInfo, Row, TableMetadata};
use std::collections::HashMap;
use tracing::debug;

mod queries {
    use super::schema_literal;
    use crate::db::quote::{quote_identifier, quote_literal};

    /// Columns of one table in ordinal order. An empty schema means the
    /// session's current database.
    pub fn table_columns(schema: &str, table: &str) -> String {
        format!(
            "SELECT \
                CONVERT(COLUMN_NAME USING utf8) AS COLUMN_NAME, \
                CONVERT(COLUMN_TYPE USING utf8) AS COLUMN_TYPE, \
                CONVERT(IS_NULLABLE USING utf8) AS IS_NULLABLE, \
                CONVERT(COLUMN_KEY USING utf8) AS COLUMN_KEY, \
                CONVERT(COLUMN_DEFAULT USING utf8) AS COLUMN_DEFAULT, \
                CONVERT(EXTRA USING utf8) AS EXTRA, \
                CONVERT(CHARACTER_SET_NAME USING utf8) AS CHARACTER_SET_NAME, \
                CONVERT(COLLATION_NAME USING utf8) AS COLLATION_NAME, \
                CHARACTER_MAXIMUM_LENGTH \
            FROM information_schema.`COLUMNS` \
            WHERE TABLE_SCHEMA = {} AND TABLE_NAME = {} \
            ORDER BY ORDINAL_POSITION",
            schema_literal(schema),
            quote_literal(table)
        )
    }

    pub fn table_indexes(table: &str) -> String {
        format!("SHOW INDEXES FROM {}", quote_identifier(table))
    }
}

/// Lazily populated table metadata keyed by lower-cased table name.
#[derive(Debug, Default)]
pub struct SchemaCache {
    tables: HashMap<String, TableMetadata>,
}

impl SchemaCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Metadata of `table`, loading it on first access. `None` when the table
    /// does not exist.
    pub fn table_info(
        &mut self,
        executor: &mut QueryExecutor,
        table: &str,
    ) -> DbResult<Option<&TableMetadata>> {
        let key = table.to_lowercase();
        if !self.tables.contains_key(&key) {
            match load_table(executor, table)? {
                Some(metadata) => {
                    debug!(
                        table = %table,
                        fields = metadata.fields.len(),
                        indexes = metadata.indexes.len(),
                        "Cached table metadata"
                    );
                    self.tables.insert(key.clone(), metadata);
                }
                None => debug!(table = %table, "Table not found"),
            }
        }
        Ok(self.tables.get(&key))
    }

    /// Whether `table` is currently cached, without loading it.
    pub fn is_cached(&self, table: &str) -> bool {
        self.tables.contains_key(&table.to_lowercase())
    }

    /// Number of cached tables.
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Drop the entry of one table.
    pub fn reset(&mut self, table: &str) {
        if self.tables.remove(&table.to_lowercase()).is_some() {
            debug!(table = %table, "Schema cache entry reset");
        }
    }

    /// Drop every entry.
    pub fn reset_all(&mut self) {
        if !self.tables.is_empty() {
            debug!(tables = self.tables.len(), "Schema cache reset");
        }
        self.tables.clear();
    }

    pub fn is_table(&mut self, executor: &mut QueryExecutor, table: &str) -> DbResult<bool> {
        Ok(self.table_info(executor, table)?.is_some())
    }

    pub fn is_field(&mut self, executor: &mut QueryExecutor, table: &str, field: &str) -> DbResult<bool> {
        Ok(self.field(executor, table, field)?.is_some())
    }

    /// True when `field` is part of the primary key.
    pub fn is_key(&mut self, executor: &mut QueryExecutor, table: &str, field: &str) -> DbResult<bool> {
        Ok(self
            .field(executor, table, field)?
            .is_some_and(FieldInfo::is_primary_key))
    }

    pub fn is_auto_increment(
        &mut self,
        executor: &mut QueryExecutor,
        table: &str,
        field: &str,
    ) -> DbResult<bool> {
        Ok(self
            .field(executor, table, field)?
            .is_some_and(FieldInfo::is_auto_increment))
    }

    pub fn is_null_allowed(
        &mut self,
        executor: &mut QueryExecutor,
        table: &str,
        field: &str,
    ) -> DbResult<bool> {
        Ok(self.field(executor, table, field)?.is_some_and(|f| f.nullable))
    }

    /// Raw column type, e.g. `varchar(255)`.
    pub fn field_type(
        &mut self,
        executor: &mut QueryExecutor,
        table: &str,
        field: &str,
    ) -> DbResult<Option<String>> {
        Ok(self
            .field(executor, table, field)?
            .map(|f| f.column_type.clone()))
    }

    /// Column declaration rebuilt from the catalog, comparable with a generated
    /// one through [`crate::db::field_type::is_same_field_type`].
    pub fn field_spec(
        &mut self,
        executor: &mut QueryExecutor,
        table: &str,
        field: &str,
    ) -> DbResult<Option<String>> {
        Ok(self.field(executor, table, field)?.map(FieldInfo::spec))
    }

    /// Check an index by name and, optionally, by its ordered columns and prefix
    /// lengths.
    pub fn has_index<S: AsRef<str>>(
        &mut self,
        executor: &mut QueryExecutor,
        table: &str,
        index: &str,
        columns: Option<&[S]>,
        lengths: Option<&[Option<u32>]>,
    ) -> DbResult<bool> {
        let Some(info) = self
            .table_info(executor, table)?
            .and_then(|t| t.index(index))
        else {
            return Ok(false);
        };
        Ok(match columns {
            None => true,
            Some(columns) => info.matches(columns, lengths),
        })
    }

    /// Column names in ordinal order; empty for a missing table.
    pub fn field_names(&mut self, executor: &mut QueryExecutor, table: &str) -> DbResult<Vec<String>> {
        Ok(self
            .table_info(executor, table)?
            .map(TableMetadata::field_names)
            .unwrap_or_default())
    }

    fn field(
        &mut self,
        executor: &mut QueryExecutor,
        table: &str,
        field: &str,
    ) -> DbResult<Option<&FieldInfo>> {
        Ok(self
            .table_info(executor, table)?
            .and_then(|t| t.field(field)))
    }
}

/// Query both catalogs for `table`. Nothing is returned unless both succeed.
fn load_table(executor: &mut QueryExecutor, table: &str) -> DbResult<Option<TableMetadata>> {
    let schema = executor.connection().database().to_string();
    let columns = executor.execute_all(&queries::table_columns(&schema, table))?;
    if columns.is_empty() {
        return Ok(None);
    }

    let mut metadata = TableMetadata::new(table);
    for row in &columns {
        metadata = metadata.with_field(field_from_row(row));
    }

    let index_rows = executor.execute_all(&queries::table_indexes(table))?;
    for index in indexes_from_rows(&index_rows) {
        metadata = metadata.with_index(index);
    }

    Ok(Some(metadata))
}

fn field_from_row(row: &Row) -> FieldInfo {
    let text = |column: &str| row.get_string(column).unwrap_or_default();
    let nullable = text("IS_NULLABLE").eq_ignore_ascii_case("YES");

    let mut field = FieldInfo::new(text("COLUMN_NAME"), text("COLUMN_TYPE"), nullable)
        .with_key(text("COLUMN_KEY"))
        .with_extra(text("EXTRA"));

    if let Some(default) = row.get_string("COLUMN_DEFAULT") {
        field = field.with_default(default);
    }
    if let Some(charset) = row.get_string("CHARACTER_SET_NAME").filter(|c| !c.is_empty()) {
        field = field.with_charset(charset, text("COLLATION_NAME"));
    }
    if let Some(length) = row.get_u64("CHARACTER_MAXIMUM_LENGTH") {
        field = field.with_char_max_length(length);
    }
    field
}

/// Group `SHOW INDEXES` rows by key name, columns ordered by `Seq_in_index`.
fn indexes_from_rows(rows: &[Row]) -> Vec<IndexInfo> {
    let mut grouped: Vec<(String, bool, Vec<(u64, IndexColumn)>)> = Vec::new();

    for row in rows {
        let name = row.get_string("Key_name").unwrap_or_default();
        let seq = row.get_u64("Seq_in_index").unwrap_or(0);
        let column = IndexColumn::new(
            row.get_string("Column_name").unwrap_or_default(),
            row.get_u64("Sub_part").and_then(|n| u32::try_from(n).ok()),
        );
        let unique = row.get_u64("Non_unique") == Some(0);

        match grouped.iter_mut().find(|(n, _, _)| *n == name) {
            Some((_, _, columns)) => columns.push((seq, column)),
            None => grouped.push((name, unique, vec![(seq, column)])),
        }
    }

    grouped
        .into_iter()
        .map(|(name, unique, mut columns)| {
            columns.sort_by_key(|(seq, _)| *seq);
            IndexInfo::new(name, columns.into_iter().map(|(_, c)| c).collect()).with_unique(unique)
        })
        .collect()
}

/// Literal used when a catalog query filters on a schema name; an empty name
/// means the session's current database.
pub(crate) fn schema_literal(schema: &str) -> String {
    if schema.is_empty() {
        "DATABASE()".to_string()
    } else {
        quote_literal(schema)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::QueryResult;
    use serde_json::json;

    fn index_rows() -> Vec<Row> {
        QueryResult::from_rows(
            &["Table", "Non_unique", "Key_name", "Seq_in_index", "Column_name", "Sub_part"],
            vec![
                vec![json!("ticket"), json!(1), json!("idx_ref"), json!(2), json!("org_id"), json!(null)],
                vec![json!("ticket"), json!(0), json!("PRIMARY"), json!(1), json!("id"), json!(null)],
                vec![json!("ticket"), json!(1), json!("idx_ref"), json!(1), json!("ref"), json!(95)],
            ],
        )
        .into_rows()
    }

    #[test]
    fn test_indexes_grouped_and_ordered() {
        let indexes = indexes_from_rows(&index_rows());
        assert_eq!(indexes.len(), 2);

        let idx = indexes.iter().find(|i| i.name == "idx_ref").unwrap();
        assert_eq!(idx.column_names(), vec!["ref".to_string(), "org_id".to_string()]);
        assert_eq!(idx.sub_parts(), vec![Some(95), None]);
        assert!(!idx.is_unique);

        let primary = indexes.iter().find(|i| i.name == "PRIMARY").unwrap();
        assert!(primary.is_unique);
    }

    #[test]
    fn test_field_from_row() {
        let rows = QueryResult::from_rows(
            &[
                "COLUMN_NAME", "COLUMN_TYPE", "IS_NULLABLE", "COLUMN_KEY", "COLUMN_DEFAULT",
                "EXTRA", "CHARACTER_SET_NAME", "COLLATION_NAME", "CHARACTER_MAXIMUM_LENGTH",
            ],
            vec![vec![
                json!("name"), json!("varchar(255)"), json!("NO"), json!(""), json!(""),
                json!(""), json!("utf8mb4"), json!("utf8mb4_unicode_ci"), json!(255),
            ]],
        )
        .into_rows();
        let field = field_from_row(&rows[0]);
        assert_eq!(field.name, "name");
        assert!(!field.nullable);
        assert_eq!(field.default.as_deref(), Some(""));
        assert_eq!(field.char_max_length, Some(255));
        assert_eq!(
            field.spec(),
            "varchar(255) CHARACTER SET utf8mb4 COLLATE utf8mb4_unicode_ci NOT NULL DEFAULT ''"
        );
    }

    #[test]
    fn test_columns_query_targets_schema() {
        let sql = queries::table_columns("itop", "ticket");
        assert!(sql.contains("TABLE_SCHEMA = 'itop' AND TABLE_NAME = 'ticket'"));
        assert!(sql.ends_with("ORDER BY ORDINAL_POSITION"));

        let sql = queries::table_columns("", "ticket");
        assert!(sql.contains("TABLE_SCHEMA = DATABASE()"));
        assert_eq!(queries::table_indexes("ticket"), "SHOW INDEXES FROM `ticket`");
    }
}
