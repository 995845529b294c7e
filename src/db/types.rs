//! MySQL cell decoding.
//!
//! Cells become `serde_json::Value`s so a row needs no compile-time schema.
//! Values are rendered close to how the server prints them: exact decimals stay
//! strings, booleans are `0`/`1`, temporal values use the server's text format.
//! Anything not recognised falls back to text, then to raw bytes.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde_json::Value as JsonValue;
use sqlx::mysql::{MySqlRow, MySqlTypeInfo, MySqlValueRef};
use sqlx::{Column, Decode, Row, Type, TypeInfo};

/// How a column's values are decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Integer,
    Float,
    Decimal,
    /// `TINYINT(1)`, reported by the driver as `BOOLEAN`
    Boolean,
    Temporal,
    Text,
    Binary,
    Json,
}

impl ValueKind {
    /// Kind of a driver type name such as `BIGINT UNSIGNED` or `VARBINARY`.
    pub fn of(type_name: &str) -> Self {
        let name = type_name.to_ascii_lowercase();
        let base = name.split_whitespace().next().unwrap_or_default();
        match base {
            "decimal" | "numeric" => Self::Decimal,
            "bool" | "boolean" => Self::Boolean,
            "float" | "double" | "real" => Self::Float,
            "json" => Self::Json,
            "date" | "time" | "datetime" | "timestamp" => Self::Temporal,
            _ if base.ends_with("int") || matches!(base, "integer" | "year" | "bit") => Self::Integer,
            _ if base.ends_with("blob") || base.ends_with("binary") => Self::Binary,
            _ => Self::Text,
        }
    }
}

/// DECIMAL read as its exact text.
#[derive(Debug)]
struct ExactDecimal(String);

impl Type<sqlx::MySql> for ExactDecimal {
    fn type_info() -> MySqlTypeInfo {
        <String as Type<sqlx::MySql>>::type_info()
    }

    fn compatible(ty: &MySqlTypeInfo) -> bool {
        ValueKind::of(ty.name()) == ValueKind::Decimal
    }
}

impl<'r> Decode<'r, sqlx::MySql> for ExactDecimal {
    fn decode(value: MySqlValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let text = <&str as Decode<sqlx::MySql>>::decode(value)?;
        Ok(Self(text.to_string()))
    }
}

/// UTF-8 text when the bytes are valid, base64 otherwise.
pub fn bytes_to_json(bytes: &[u8]) -> JsonValue {
    match std::str::from_utf8(bytes) {
        Ok(text) => JsonValue::String(text.to_string()),
        Err(_) => JsonValue::String(STANDARD.encode(bytes)),
    }
}

/// Column names of a row, in select order.
pub fn column_names(row: &MySqlRow) -> Vec<String> {
    row.columns().iter().map(|c| c.name().to_string()).collect()
}

/// Decode every cell of a row.
pub fn row_values(row: &MySqlRow) -> Vec<JsonValue> {
    row.columns()
        .iter()
        .map(|column| {
            let idx = column.ordinal();
            match ValueKind::of(column.type_info().name()) {
                ValueKind::Decimal => decimal_cell(row, idx),
                ValueKind::Integer | ValueKind::Boolean => integer_cell(row, idx),
                ValueKind::Float => float_cell(row, idx),
                ValueKind::Temporal => temporal_cell(row, idx),
                ValueKind::Binary => cell::<Vec<u8>>(row, idx)
                    .map(|v| v.map_or(JsonValue::Null, |b| bytes_to_json(&b)))
                    .unwrap_or_else(|| text_cell(row, idx)),
                ValueKind::Json => cell::<JsonValue>(row, idx)
                    .map(Option::unwrap_or_default)
                    .unwrap_or_else(|| text_cell(row, idx)),
                ValueKind::Text => text_cell(row, idx),
            }
        })
        .collect()
}

/// `None` when the column does not decode as `T`; `Some(None)` for SQL NULL.
fn cell<'r, T>(row: &'r MySqlRow, idx: usize) -> Option<Option<T>>
where
    T: Decode<'r, sqlx::MySql> + Type<sqlx::MySql>,
{
    row.try_get::<Option<T>, _>(idx).ok()
}

fn decimal_cell(row: &MySqlRow, idx: usize) -> JsonValue {
    match cell::<ExactDecimal>(row, idx) {
        Some(Some(d)) => JsonValue::String(d.0),
        Some(None) => JsonValue::Null,
        None => text_cell(row, idx),
    }
}

fn integer_cell(row: &MySqlRow, idx: usize) -> JsonValue {
    if let Some(v) = cell::<i64>(row, idx) {
        return v.map_or(JsonValue::Null, JsonValue::from);
    }
    if let Some(v) = cell::<u64>(row, idx) {
        return v.map_or(JsonValue::Null, JsonValue::from);
    }
    if let Some(v) = cell::<bool>(row, idx) {
        return v.map_or(JsonValue::Null, |b| JsonValue::from(u8::from(b)));
    }
    // YEAR and BIT
    text_cell(row, idx)
}

fn float_cell(row: &MySqlRow, idx: usize) -> JsonValue {
    let value = match cell::<f64>(row, idx) {
        Some(v) => v,
        None => cell::<f32>(row, idx).map(|v| v.map(f64::from)).unwrap_or_default(),
    };
    match value {
        Some(f) => serde_json::Number::from_f64(f)
            .map(JsonValue::Number)
            .unwrap_or_else(|| JsonValue::String(f.to_string())),
        None => JsonValue::Null,
    }
}

fn temporal_cell(row: &MySqlRow, idx: usize) -> JsonValue {
    if let Some(v) = cell::<NaiveDateTime>(row, idx) {
        return v.map_or(JsonValue::Null, |dt| {
            JsonValue::String(dt.format("%Y-%m-%d %H:%M:%S%.f").to_string())
        });
    }
    if let Some(v) = cell::<NaiveDate>(row, idx) {
        return v.map_or(JsonValue::Null, |d| JsonValue::String(d.to_string()));
    }
    if let Some(v) = cell::<NaiveTime>(row, idx) {
        return v.map_or(JsonValue::Null, |t| JsonValue::String(t.to_string()));
    }
    // zero dates and TIME values outside 00:00-24:00
    text_cell(row, idx)
}

fn text_cell(row: &MySqlRow, idx: usize) -> JsonValue {
    if let Some(v) = cell::<String>(row, idx) {
        return v.map_or(JsonValue::Null, JsonValue::String);
    }
    // ENUM and SET on some servers, BIT, YEAR
    row.try_get_unchecked::<Option<Vec<u8>>, _>(idx)
        .ok()
        .flatten()
        .map_or(JsonValue::Null, |b| bytes_to_json(&b))
}
