//! Schema-related data models.
//!
//! This module defines the cached metadata of a table: its columns in ordinal
//! order and its indexes keyed by name.

use crate::db::field_type::{FieldType, coerce_numeric, is_numeric};
use crate::db::quote::quote_literal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Column key role as reported by `information_schema.COLUMNS.COLUMN_KEY`.
pub const PRIMARY_KEY_ROLE: &str = "PRI";

/// Name MySQL gives to the primary key index.
pub const PRIMARY_INDEX_NAME: &str = "PRIMARY";

/// Data types whose numeric defaults are written without quotes.
const NUMERIC_DATA_TYPES: &[&str] = &[
    "tinyint",
    "smallint",
    "mediumint",
    "int",
    "integer",
    "bigint",
    "decimal",
    "numeric",
    "float",
    "double",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableMetadata {
    /// Name as requested by the caller
    pub name: String,
    /// Ordered by ordinal position
    pub fields: Vec<FieldInfo>,
    pub indexes: BTreeMap<String, IndexInfo>,
}

impl TableMetadata {
    /// Create metadata for a table with no columns or indexes yet.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            indexes: BTreeMap::new(),
        }
    }

    /// Add a column definition.
    pub fn with_field(mut self, field: FieldInfo) -> Self {
        self.fields.push(field);
        self
    }

    /// Add an index.
    pub fn with_index(mut self, index: IndexInfo) -> Self {
        self.indexes.insert(index.name.clone(), index);
        self
    }

    /// Look up a column by exact name.
    pub fn field(&self, name: &str) -> Option<&FieldInfo> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn field_names(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.name.clone()).collect()
    }

    pub fn index(&self, name: &str) -> Option<&IndexInfo> {
        self.indexes.get(name)
    }

    /// Columns of the primary key, in key order.
    pub fn primary_key(&self) -> Vec<String> {
        self.index(PRIMARY_INDEX_NAME)
            .map(|idx| idx.column_names())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldInfo {
    pub name: String,
    /// Full type (e.g., `varchar(255)`, `int(11) unsigned`, `enum('a','b')`)
    pub column_type: String,
    pub nullable: bool,
    /// PRI, UNI, MUL or empty
    pub key: String,
    /// Raw COLUMN_DEFAULT; MariaDB reports string defaults quoted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    /// e.g., `auto_increment`
    pub extra: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub charset: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub char_max_length: Option<u64>,
}

impl FieldInfo {
    /// Create a new column definition.
    pub fn new(name: impl Into<String>, column_type: impl Into<String>, nullable: bool) -> Self {
        Self {
            name: name.into(),
            column_type: column_type.into(),
            nullable,
            key: String::new(),
            default: None,
            extra: String::new(),
            charset: None,
            collation: None,
            char_max_length: None,
        }
    }

    /// Set the key role (PRI, UNI, MUL).
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    /// Set the raw default value.
    pub fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }

    /// Set the extra attributes.
    pub fn with_extra(mut self, extra: impl Into<String>) -> Self {
        self.extra = extra.into();
        self
    }

    /// Set the character set and collation.
    pub fn with_charset(mut self, charset: impl Into<String>, collation: impl Into<String>) -> Self {
        self.charset = Some(charset.into());
        self.collation = Some(collation.into());
        self
    }

    /// Set the maximum length in characters.
    pub fn with_char_max_length(mut self, length: u64) -> Self {
        self.char_max_length = Some(length);
        self
    }

    pub fn is_primary_key(&self) -> bool {
        self.key == PRIMARY_KEY_ROLE
    }

    pub fn is_auto_increment(&self) -> bool {
        self.extra.contains("auto_increment")
    }

    pub fn is_enum(&self) -> bool {
        self.column_type
            .get(..5)
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case("enum("))
    }

    /// True when the column's data type stores numbers.
    pub fn is_numeric_type(&self) -> bool {
        FieldType::parse(&self.column_type).is_some_and(|ft| {
            NUMERIC_DATA_TYPES
                .iter()
                .any(|t| ft.data_type.eq_ignore_ascii_case(t))
        })
    }

    /// Rebuild the column declaration as it would appear in `CREATE TABLE`.
    ///
    /// The output is meant to be compared with a generated declaration through
    /// [`crate::db::field_type::is_same_field_type`].
    pub fn spec(&self) -> String {
        let mut spec = self.column_type.clone();

        if let Some(charset) = self.charset.as_deref().filter(|c| !c.is_empty()) {
            spec.push_str(" CHARACTER SET ");
            spec.push_str(charset);
            spec.push_str(" COLLATE ");
            spec.push_str(self.collation.as_deref().unwrap_or_default());
        }

        if !self.nullable {
            spec.push_str(" NOT NULL");
        }

        if let Some(default) = self.default.as_deref() {
            spec.push_str(" DEFAULT ");
            if is_numeric(default) {
                if self.is_enum() {
                    // enum literals are declared quoted
                    spec.push_str(&quote_literal(default));
                } else if self.is_numeric_type() {
                    spec.push_str(default);
                } else {
                    spec.push_str(&coerce_numeric(default));
                }
            } else {
                spec.push_str(&quote_literal(strip_surrounding_quotes(default)));
            }
        }

        spec
    }
}

/// MariaDB reports `'value'` where MySQL reports `value`.
fn strip_surrounding_quotes(value: &str) -> &str {
    if value.len() >= 2 && value.starts_with('\'') && value.ends_with('\'') {
        &value[1..value.len() - 1]
    } else {
        value
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexInfo {
    pub name: String,
    /// Ordered by position in the index
    pub columns: Vec<IndexColumn>,
    pub is_unique: bool,
}

impl IndexInfo {
    /// Create a new index info.
    pub fn new(name: impl Into<String>, columns: Vec<IndexColumn>) -> Self {
        Self {
            name: name.into(),
            columns,
            is_unique: false,
        }
    }

    /// Set whether this is a unique index.
    pub fn with_unique(mut self, is_unique: bool) -> Self {
        self.is_unique = is_unique;
        self
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.column.clone()).collect()
    }

    pub fn sub_parts(&self) -> Vec<Option<u32>> {
        self.columns.iter().map(|c| c.sub_part).collect()
    }

    /// Compare against an expected column list and, optionally, prefix lengths.
    /// Order is significant for both.
    pub fn matches<S: AsRef<str>>(&self, columns: &[S], lengths: Option<&[Option<u32>]>) -> bool {
        let same_columns = self.columns.len() == columns.len()
            && self
                .columns
                .iter()
                .zip(columns)
                .all(|(actual, expected)| actual.column == expected.as_ref());
        if !same_columns {
            return false;
        }
        match lengths {
            None => true,
            Some(lengths) => self.sub_parts() == lengths,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexColumn {
    pub column: String,
    /// Indexed prefix length; `None` when the whole column is indexed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_part: Option<u32>,
}

impl IndexColumn {
    pub fn new(column: impl Into<String>, sub_part: Option<u32>) -> Self {
        Self {
            column: column.into(),
            sub_part,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_varchar_with_charset() {
        let field = FieldInfo::new("name", "varchar(255)", false)
            .with_charset("utf8mb4", "utf8mb4_unicode_ci")
            .with_default("");
        assert_eq!(
            field.spec(),
            "varchar(255) CHARACTER SET utf8mb4 COLLATE utf8mb4_unicode_ci NOT NULL DEFAULT ''"
        );
    }

    #[test]
    fn test_spec_numeric_default_unquoted() {
        let field = FieldInfo::new("count", "int(11)", false).with_default("0");
        assert_eq!(field.spec(), "int(11) NOT NULL DEFAULT 0");

        let field = FieldInfo::new("price", "decimal(10,2)", true).with_default("0.00");
        assert_eq!(field.spec(), "decimal(10,2) DEFAULT 0.00");
    }

    #[test]
    fn test_spec_enum_numeric_default_stays_quoted() {
        let field = FieldInfo::new("level", "enum('1','2','3')", false).with_default("1");
        assert_eq!(field.spec(), "enum('1','2','3') NOT NULL DEFAULT '1'");
    }

    #[test]
    fn test_spec_numeric_default_on_text_column_is_coerced() {
        let field = FieldInfo::new("code", "varchar(10)", true).with_default("007");
        assert_eq!(field.spec(), "varchar(10) DEFAULT 7");
    }

    #[test]
    fn test_spec_mariadb_quoted_string_default() {
        let field = FieldInfo::new("status", "enum('active','inactive')", false)
            .with_default("'active'");
        assert_eq!(
            field.spec(),
            "enum('active','inactive') NOT NULL DEFAULT 'active'"
        );
    }

    #[test]
    fn test_spec_null_default_has_no_clause() {
        let field = FieldInfo::new("finalclass", "varchar(255)", true);
        assert_eq!(field.spec(), "varchar(255)");
    }

    #[test]
    fn test_spec_escapes_default() {
        let field = FieldInfo::new("label", "varchar(20)", true).with_default("it's");
        assert_eq!(field.spec(), "varchar(20) DEFAULT 'it\\'s'");
    }

    #[test]
    fn test_field_flags() {
        let field = FieldInfo::new("id", "int(11)", false)
            .with_key("PRI")
            .with_extra("auto_increment");
        assert!(field.is_primary_key());
        assert!(field.is_auto_increment());
        assert!(field.is_numeric_type());
        assert!(!field.is_enum());
    }

    #[test]
    fn test_index_matches_order_and_lengths() {
        let index = IndexInfo::new(
            "idx_name_org",
            vec![
                IndexColumn::new("name", Some(95)),
                IndexColumn::new("org_id", None),
            ],
        );
        assert!(index.matches(&["name", "org_id"], None));
        assert!(!index.matches(&["org_id", "name"], None));
        assert!(!index.matches(&["name"], None));
        assert!(index.matches(&["name", "org_id"], Some(&[Some(95), None])));
        assert!(!index.matches(&["name", "org_id"], Some(&[None, None])));
    }

    #[test]
    fn test_table_primary_key() {
        let table = TableMetadata::new("ticket")
            .with_field(FieldInfo::new("id", "int(11)", false).with_key("PRI"))
            .with_index(IndexInfo::new("PRIMARY", vec![IndexColumn::new("id", None)]).with_unique(true));
        assert_eq!(table.primary_key(), vec!["id".to_string()]);
        assert_eq!(table.field_names(), vec!["id".to_string()]);
        assert!(table.field("ID").is_none());
    }
}
