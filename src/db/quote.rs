//! Quoting for SQL text built by this crate.
//!
//! Only the statements the layer generates itself go through here (catalog
//! lookups, `USE`, `SET NAMES`, DDL helpers). Application SQL is passed through
//! untouched.

/// Quote a string literal, escaping the characters the MySQL client library
/// escapes: NUL, newline, carriage return, backslash, both quotes and Ctrl-Z.
pub fn quote_literal(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for c in value.chars() {
        match c {
            '\0' => out.push_str("\\0"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '"' => out.push_str("\\\""),
            '\x1a' => out.push_str("\\Z"),
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}

/// Quote an identifier with backticks, doubling embedded backticks.
pub fn quote_identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}
