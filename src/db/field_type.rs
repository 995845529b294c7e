//! Column type declarations and their comparison.
//!
//! Schema synchronization generates a declaration for every column and compares it
//! with the declaration rebuilt from the live catalog. MySQL and MariaDB report the
//! same column differently, so a plain string comparison flags drift that is not
//! there. [`is_same_field_type`] absorbs those differences.

use regex::Regex;
use std::sync::LazyLock;

/// `datatype[(options)][ other clauses]`
static FIELD_TYPE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([a-zA-Z]+)(\(([^)]+)\))?( .+)?$").expect("valid field type regex")
});

/// A quoted default clause, as MariaDB always writes it.
static QUOTED_DEFAULT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"( DEFAULT )'([^']+)'").expect("valid default regex"));

/// A number as accepted by a loosely typed comparison: optional sign, digits with
/// an optional fraction, optional exponent, surrounding whitespace ignored.
static NUMERIC_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*[+-]?(\d+(\.\d*)?|\.\d+)([eE][+-]?\d+)?\s*$").expect("valid numeric regex")
});

/// MariaDB appends this to nullable columns without an explicit default.
const MARIADB_DEFAULT_NULL: &str = " DEFAULT 'NULL'";

const ENUM_DATA_TYPE: &str = "enum";

/// A column type declaration split into its three parts.
///
/// `VARCHAR(255) CHARACTER SET utf8mb4 COLLATE utf8mb4_unicode_ci DEFAULT ''` gives
/// data type `VARCHAR`, options `255` and other
/// ` CHARACTER SET utf8mb4 COLLATE utf8mb4_unicode_ci DEFAULT ''` (leading space kept).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldType {
    pub data_type: String,
    /// Text inside the parentheses; empty when there are none
    pub options: String,
    /// Everything after the type; empty or starting with a space
    pub other: String,
}

impl FieldType {
    /// Split a declaration. Returns `None` when it does not start with a data type.
    pub fn parse(declaration: &str) -> Option<Self> {
        let caps = FIELD_TYPE_RE.captures(declaration)?;
        let group = |i| caps.get(i).map(|m| m.as_str().to_string()).unwrap_or_default();
        Some(Self {
            data_type: group(1),
            options: group(3),
            other: group(4),
        })
    }

    pub fn is_enum(&self) -> bool {
        self.data_type.eq_ignore_ascii_case(ENUM_DATA_TYPE)
    }
}

/// Decide whether a generated declaration and the one read back from the server
/// describe the same column.
///
/// * data types compare case-insensitively;
/// * options compare case-sensitively (enum values are case-significant);
/// * on the server side a trailing ` DEFAULT 'NULL'` is dropped and quoted numeric
///   defaults are unquoted, except for enums whose values stay quoted;
/// * the remaining clauses compare case-insensitively.
///
/// A declaration that cannot be parsed never matches.
pub fn is_same_field_type(generated: &str, actual: &str) -> bool {
    let (Some(generated), Some(actual)) = (FieldType::parse(generated), FieldType::parse(actual))
    else {
        return false;
    };

    if !generated.data_type.eq_ignore_ascii_case(&actual.data_type) {
        return false;
    }

    if generated.options != actual.options {
        return false;
    }

    let other = actual
        .other
        .strip_suffix(MARIADB_DEFAULT_NULL)
        .unwrap_or(&actual.other);

    let keep_quotes = generated.is_enum();
    let other = QUOTED_DEFAULT_RE.replace_all(other, |caps: &regex::Captures| {
        if is_numeric(&caps[2]) && !keep_quotes {
            format!("{}{}", &caps[1], &caps[2])
        } else {
            caps[0].to_string()
        }
    });

    generated.other.eq_ignore_ascii_case(&other)
}

/// True when `value` reads as a number (`42`, `-1.5`, `1e3`, ` 7 `).
pub fn is_numeric(value: &str) -> bool {
    NUMERIC_RE.is_match(value)
}

/// Render a numeric string in canonical form: `007` becomes `7`, `1.50` becomes
/// `1.5`. Non-numeric input is returned trimmed.
pub fn coerce_numeric(value: &str) -> String {
    let trimmed = value.trim();
    if let Ok(n) = trimmed.parse::<i64>() {
        return n.to_string();
    }
    match trimmed.parse::<f64>() {
        Ok(f) if f.is_finite() && is_numeric(trimmed) => f.to_string(),
        _ => trimmed.to_string(),
    }
}
