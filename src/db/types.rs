//! Row decoding for table previews.
//!
//! Preview rows are returned as JSON objects. Column types are first classified
//! into a `TypeCategory`, then an engine-specific decoder extracts the value.
//! Binary values are base64-encoded; DECIMAL/NUMERIC keep their exact text form.

use crate::models::{DatabaseType, TablePreview};
use serde_json::Value as JsonValue;
use sqlx::{Column, Row, TypeInfo};

/// Logical category for database column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Decimal,
    Boolean,
    Text,
    Binary,
    Json,
    Temporal,
}

/// Classify a database type name into a logical category.
pub fn categorize_type(type_name: &str, db: DatabaseType) -> TypeCategory {
    let lower = type_name.to_lowercase();

    if lower.contains("decimal") || lower.contains("numeric") {
        // SQLite's NUMERIC affinity is stored as a float
        if db == DatabaseType::SQLite {
            return TypeCategory::Float;
        }
        return TypeCategory::Decimal;
    }

    if lower == "bool" || lower == "boolean" {
        return TypeCategory::Boolean;
    }

    if lower.contains("int") || lower.contains("serial") {
        return TypeCategory::Integer;
    }

    if lower.contains("float") || lower.contains("double") || lower == "real" {
        return TypeCategory::Float;
    }

    if lower == "json" || lower == "jsonb" {
        return TypeCategory::Json;
    }

    if lower.contains("blob") || lower.contains("binary") || lower == "bytea" {
        return TypeCategory::Binary;
    }

    if lower.contains("timestamp")
        || lower.contains("datetime")
        || lower == "date"
        || lower.starts_with("time")
    {
        return TypeCategory::Temporal;
    }

    TypeCategory::Text
}

/// Encode binary column data for JSON output.
pub fn encode_binary(bytes: &[u8]) -> JsonValue {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    JsonValue::String(STANDARD.encode(bytes))
}

fn float_value(v: f64) -> JsonValue {
    serde_json::Number::from_f64(v)
        .map(JsonValue::Number)
        .unwrap_or_else(|| JsonValue::String(v.to_string()))
}

fn text_or_null(v: Option<String>) -> JsonValue {
    v.map(JsonValue::String).unwrap_or(JsonValue::Null)
}

/// Converts a fetched row into a JSON object keyed by column name.
pub trait RowToJson {
    fn to_json_map(&self) -> serde_json::Map<String, JsonValue>;

    fn column_names(&self) -> Vec<String>;
}

macro_rules! impl_row_to_json {
    ($row:ty, $db:expr, $decode:path) => {
        impl RowToJson for $row {
            fn to_json_map(&self) -> serde_json::Map<String, JsonValue> {
                self.columns()
                    .iter()
                    .enumerate()
                    .map(|(idx, col)| {
                        let type_name = col.type_info().name();
                        let category = categorize_type(type_name, $db);
                        (col.name().to_string(), $decode(self, idx, category))
                    })
                    .collect()
            }

            fn column_names(&self) -> Vec<String> {
                self.columns().iter().map(|c| c.name().to_string()).collect()
            }
        }
    };
}

#[cfg(feature = "mysql")]
impl_row_to_json!(sqlx::mysql::MySqlRow, DatabaseType::MySQL, mysql::decode_column);
#[cfg(feature = "postgres")]
impl_row_to_json!(sqlx::postgres::PgRow, DatabaseType::PostgreSQL, postgres::decode_column);
#[cfg(feature = "sqlite")]
impl_row_to_json!(sqlx::sqlite::SqliteRow, DatabaseType::SQLite, sqlite::decode_column);

/// Build a preview from fetched rows. `columns` is empty when no row came back.
pub fn rows_to_preview<R: RowToJson>(table: &str, rows: &[R]) -> TablePreview {
    TablePreview {
        table_name: table.to_string(),
        columns: rows.first().map(RowToJson::column_names).unwrap_or_default(),
        rows: rows.iter().map(RowToJson::to_json_map).collect(),
    }
}

/// DECIMAL/NUMERIC values kept as their exact string representation.
#[derive(Debug)]
pub struct RawDecimal(pub String);

#[cfg(feature = "mysql")]
mod mysql {
    use super::*;
    use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
    use sqlx::mysql::{MySqlRow, MySqlTypeInfo, MySqlValueRef};
    use sqlx::{Decode, Type};

    impl Type<sqlx::MySql> for RawDecimal {
        fn type_info() -> MySqlTypeInfo {
            <String as Type<sqlx::MySql>>::type_info()
        }

        fn compatible(ty: &MySqlTypeInfo) -> bool {
            let name = ty.name().to_lowercase();
            name.contains("decimal") || name.contains("numeric")
        }
    }

    impl<'r> Decode<'r, sqlx::MySql> for RawDecimal {
        fn decode(value: MySqlValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
            let s = <&str as Decode<sqlx::MySql>>::decode(value)?;
            Ok(RawDecimal(s.to_string()))
        }
    }

    pub fn decode_column(row: &MySqlRow, idx: usize, category: TypeCategory) -> JsonValue {
        match category {
            TypeCategory::Decimal => row
                .try_get::<Option<RawDecimal>, _>(idx)
                .ok()
                .flatten()
                .map(|v| JsonValue::String(v.0))
                .unwrap_or(JsonValue::Null),
            TypeCategory::Integer => decode_integer(row, idx),
            TypeCategory::Boolean => row
                .try_get::<Option<bool>, _>(idx)
                .ok()
                .flatten()
                .map(JsonValue::Bool)
                .unwrap_or(JsonValue::Null),
            TypeCategory::Float => row
                .try_get::<Option<f64>, _>(idx)
                .ok()
                .flatten()
                .or_else(|| {
                    row.try_get::<Option<f32>, _>(idx)
                        .ok()
                        .flatten()
                        .map(f64::from)
                })
                .map(float_value)
                .unwrap_or(JsonValue::Null),
            TypeCategory::Binary => row
                .try_get::<Option<Vec<u8>>, _>(idx)
                .ok()
                .flatten()
                .map(|v| encode_binary(&v))
                .unwrap_or(JsonValue::Null),
            TypeCategory::Json => row
                .try_get::<Option<JsonValue>, _>(idx)
                .ok()
                .flatten()
                .unwrap_or(JsonValue::Null),
            TypeCategory::Temporal => decode_temporal(row, idx),
            TypeCategory::Text => decode_text(row, idx),
        }
    }

    fn decode_integer(row: &MySqlRow, idx: usize) -> JsonValue {
        if let Ok(Some(v)) = row.try_get::<Option<i64>, _>(idx) {
            return JsonValue::Number(v.into());
        }
        // BIGINT UNSIGNED and friends
        if let Ok(Some(v)) = row.try_get::<Option<u64>, _>(idx) {
            return JsonValue::Number(v.into());
        }
        JsonValue::Null
    }

    fn decode_temporal(row: &MySqlRow, idx: usize) -> JsonValue {
        if let Ok(Some(v)) = row.try_get::<Option<NaiveDateTime>, _>(idx) {
            return JsonValue::String(v.to_string());
        }
        if let Ok(Some(v)) = row.try_get::<Option<NaiveDate>, _>(idx) {
            return JsonValue::String(v.to_string());
        }
        if let Ok(Some(v)) = row.try_get::<Option<NaiveTime>, _>(idx) {
            return JsonValue::String(v.to_string());
        }
        JsonValue::Null
    }

    // Text columns may come back as VARBINARY depending on the connection charset.
    fn decode_text(row: &MySqlRow, idx: usize) -> JsonValue {
        text_or_null(row.try_get::<Option<String>, _>(idx).ok().flatten().or_else(|| {
            row.try_get::<Option<Vec<u8>>, _>(idx)
                .ok()
                .flatten()
                .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        }))
    }
}

#[cfg(feature = "postgres")]
mod postgres {
    use super::*;
    use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
    use sqlx::postgres::{PgRow, PgTypeInfo, PgValueFormat, PgValueRef};
    use sqlx::{Decode, Type};

    impl Type<sqlx::Postgres> for RawDecimal {
        fn type_info() -> PgTypeInfo {
            <String as Type<sqlx::Postgres>>::type_info()
        }

        fn compatible(ty: &PgTypeInfo) -> bool {
            let name = ty.name().to_lowercase();
            name.contains("numeric") || name.contains("decimal")
        }
    }

    impl<'r> Decode<'r, sqlx::Postgres> for RawDecimal {
        fn decode(value: PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
            match value.format() {
                PgValueFormat::Text => {
                    let s = <&str as Decode<sqlx::Postgres>>::decode(value)?;
                    Ok(RawDecimal(s.to_string()))
                }
                PgValueFormat::Binary => Ok(RawDecimal(numeric_to_string(value.as_bytes()?)?)),
            }
        }
    }

    const NUMERIC_NEG: u16 = 0x4000;
    const NUMERIC_NAN: u16 = 0xC000;

    /// Render the binary NUMERIC wire format: a header of ndigits, weight,
    /// sign and dscale followed by base-10000 digit groups.
    pub(super) fn numeric_to_string(buf: &[u8]) -> Result<String, sqlx::error::BoxDynError> {
        let read_u16 = |at: usize| -> Result<u16, sqlx::error::BoxDynError> {
            buf.get(at..at + 2)
                .map(|b| u16::from_be_bytes([b[0], b[1]]))
                .ok_or_else(|| "truncated NUMERIC value".into())
        };

        let ndigits = read_u16(0)? as usize;
        let weight = read_u16(2)? as i16 as i32;
        let sign = read_u16(4)?;
        let dscale = read_u16(6)? as usize;

        if sign == NUMERIC_NAN {
            return Ok("NaN".to_string());
        }

        let digits = (0..ndigits)
            .map(|i| read_u16(8 + i * 2))
            .collect::<Result<Vec<u16>, _>>()?;
        let group = |pos: i32| -> u16 {
            usize::try_from(pos)
                .ok()
                .and_then(|p| digits.get(p).copied())
                .unwrap_or(0)
        };

        let mut out = String::new();
        if sign == NUMERIC_NEG {
            out.push('-');
        }

        if weight < 0 {
            out.push('0');
        } else {
            for pos in 0..=weight {
                let d = group(pos);
                if pos == 0 {
                    out.push_str(&d.to_string());
                } else {
                    out.push_str(&format!("{:04}", d));
                }
            }
        }

        if dscale > 0 {
            out.push('.');
            let mut fraction = String::new();
            let mut pos = weight + 1;
            while fraction.len() < dscale {
                fraction.push_str(&format!("{:04}", group(pos)));
                pos += 1;
            }
            fraction.truncate(dscale);
            out.push_str(&fraction);
        }

        Ok(out)
    }

    pub fn decode_column(row: &PgRow, idx: usize, category: TypeCategory) -> JsonValue {
        match category {
            TypeCategory::Decimal => row
                .try_get::<Option<RawDecimal>, _>(idx)
                .ok()
                .flatten()
                .map(|v| JsonValue::String(v.0))
                .unwrap_or(JsonValue::Null),
            TypeCategory::Integer => decode_integer(row, idx),
            TypeCategory::Boolean => row
                .try_get::<Option<bool>, _>(idx)
                .ok()
                .flatten()
                .map(JsonValue::Bool)
                .unwrap_or(JsonValue::Null),
            TypeCategory::Float => row
                .try_get::<Option<f64>, _>(idx)
                .ok()
                .flatten()
                .or_else(|| {
                    row.try_get::<Option<f32>, _>(idx)
                        .ok()
                        .flatten()
                        .map(f64::from)
                })
                .map(float_value)
                .unwrap_or(JsonValue::Null),
            TypeCategory::Binary => row
                .try_get::<Option<Vec<u8>>, _>(idx)
                .ok()
                .flatten()
                .map(|v| encode_binary(&v))
                .unwrap_or(JsonValue::Null),
            TypeCategory::Json => row
                .try_get::<Option<JsonValue>, _>(idx)
                .ok()
                .flatten()
                .unwrap_or(JsonValue::Null),
            TypeCategory::Temporal => decode_temporal(row, idx),
            TypeCategory::Text => text_or_null(row.try_get::<Option<String>, _>(idx).ok().flatten()),
        }
    }

    fn decode_integer(row: &PgRow, idx: usize) -> JsonValue {
        if let Ok(Some(v)) = row.try_get::<Option<i16>, _>(idx) {
            return JsonValue::Number(v.into());
        }
        if let Ok(Some(v)) = row.try_get::<Option<i32>, _>(idx) {
            return JsonValue::Number(v.into());
        }
        if let Ok(Some(v)) = row.try_get::<Option<i64>, _>(idx) {
            return JsonValue::Number(v.into());
        }
        JsonValue::Null
    }

    fn decode_temporal(row: &PgRow, idx: usize) -> JsonValue {
        if let Ok(Some(v)) = row.try_get::<Option<DateTime<Utc>>, _>(idx) {
            return JsonValue::String(v.to_rfc3339());
        }
        if let Ok(Some(v)) = row.try_get::<Option<NaiveDateTime>, _>(idx) {
            return JsonValue::String(v.to_string());
        }
        if let Ok(Some(v)) = row.try_get::<Option<NaiveDate>, _>(idx) {
            return JsonValue::String(v.to_string());
        }
        if let Ok(Some(v)) = row.try_get::<Option<NaiveTime>, _>(idx) {
            return JsonValue::String(v.to_string());
        }
        JsonValue::Null
    }
}

#[cfg(feature = "sqlite")]
mod sqlite {
    use super::*;
    use sqlx::sqlite::SqliteRow;

    pub fn decode_column(row: &SqliteRow, idx: usize, category: TypeCategory) -> JsonValue {
        match category {
            TypeCategory::Integer => row
                .try_get::<Option<i64>, _>(idx)
                .ok()
                .flatten()
                .map(|v| JsonValue::Number(v.into()))
                .unwrap_or(JsonValue::Null),
            TypeCategory::Boolean => row
                .try_get::<Option<bool>, _>(idx)
                .ok()
                .flatten()
                .map(JsonValue::Bool)
                .unwrap_or(JsonValue::Null),
            TypeCategory::Float | TypeCategory::Decimal => row
                .try_get::<Option<f64>, _>(idx)
                .ok()
                .flatten()
                .map(float_value)
                .unwrap_or(JsonValue::Null),
            TypeCategory::Binary => row
                .try_get::<Option<Vec<u8>>, _>(idx)
                .ok()
                .flatten()
                .map(|v| encode_binary(&v))
                .unwrap_or(JsonValue::Null),
            TypeCategory::Json => {
                let text = row.try_get_unchecked::<Option<String>, _>(idx).ok().flatten();
                match text {
                    Some(s) => serde_json::from_str(&s).unwrap_or(JsonValue::String(s)),
                    None => JsonValue::Null,
                }
            }
            // Dynamic typing: a TEXT column may hold any storage class
            TypeCategory::Temporal | TypeCategory::Text => {
                text_or_null(row.try_get_unchecked::<Option<String>, _>(idx).ok().flatten())
            }
        }
    }
}
