//! Row decoding into engine-neutral JSON values.
//!
//! Type conversion uses a two-phase approach:
//! 1. `TypeCategory` classifies column types into logical categories
//! 2. Engine-specific decoders handle the actual value extraction
//!
//! Values are produced positionally, preserving the engine's column order.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::mysql::{MySqlRow, MySqlTypeInfo, MySqlValueRef};
use sqlx::postgres::{PgRow, PgTypeInfo, PgValueRef};
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Decode, Row, Type, TypeInfo};

use crate::models::{ColumnMeta, EngineType};

/// Logical category for database column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Decimal,
    Boolean,
    Datetime,
    Text,
    Binary,
    Json,
    Uuid,
    Unknown,
}

/// Classify a database type name into a logical category.
pub fn categorize_type(type_name: &str, engine: EngineType) -> TypeCategory {
    let lower = type_name.to_lowercase();

    // Overlaps with "numeric" in float checks
    if lower.contains("decimal") || lower.contains("numeric") {
        // SQLite's NUMERIC affinity stores floats
        if engine == EngineType::Sqlite {
            return TypeCategory::Float;
        }
        return TypeCategory::Decimal;
    }

    if lower == "interval" {
        return TypeCategory::Unknown;
    }

    if lower.contains("int") || lower.contains("serial") {
        return TypeCategory::Integer;
    }

    if lower == "bool" || lower == "boolean" {
        return TypeCategory::Boolean;
    }

    if lower.contains("float")
        || lower.contains("double")
        || lower == "real"
        || lower == "float4"
        || lower == "float8"
    {
        return TypeCategory::Float;
    }

    if lower.starts_with("timestamp")
        || lower == "datetime"
        || lower == "date"
        || lower == "time"
        || lower == "timetz"
    {
        // SQLite keeps these as text
        if engine == EngineType::Sqlite {
            return TypeCategory::Text;
        }
        return TypeCategory::Datetime;
    }

    if lower == "json" || lower == "jsonb" {
        return TypeCategory::Json;
    }

    if lower == "uuid" {
        return TypeCategory::Uuid;
    }

    if lower.contains("blob") || lower.contains("binary") || lower == "bytea" {
        return TypeCategory::Binary;
    }

    if lower.contains("char") || lower.contains("text") || lower == "name" {
        return TypeCategory::Text;
    }

    TypeCategory::Unknown
}

/// Wrapper type for raw DECIMAL/NUMERIC values as strings.
/// Preserves the exact database representation.
#[derive(Debug)]
pub struct RawDecimal(pub String);

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
        let s = <&str as Decode<sqlx::Postgres>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

/// Binary cells are always base64 encoded.
pub fn encode_binary(bytes: &[u8]) -> JsonValue {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    JsonValue::String(STANDARD.encode(bytes))
}

fn float_value(v: f64) -> JsonValue {
    serde_json::Number::from_f64(v)
        .map(JsonValue::Number)
        .unwrap_or_else(|| JsonValue::String(v.to_string()))
}

/// Convert database rows to ordered JSON values.
pub trait RowToJson {
    fn to_json_values(&self) -> Vec<JsonValue>;
    fn column_metadata(&self) -> Vec<ColumnMeta>;
}

macro_rules! column_metadata {
    ($row:expr) => {
        $row.columns()
            .iter()
            .map(|col| ColumnMeta::new(col.name(), col.type_info().name()))
            .collect()
    };
}

/// First non-null decode among the listed Rust types, mapped to JSON.
/// Decode failures fall through to the next type.
macro_rules! first_decoded {
    ($row:expr, $idx:expr, [$($ty:ty),+ $(,)?], $map:expr) => {{
        let mut value: Option<JsonValue> = None;
        $(
            if value.is_none() {
                value = $row.try_get::<Option<$ty>, _>($idx).ok().flatten().map($map);
            }
        )+
        value
    }};
}

/// Decoding shared by the network engines. Both expose the same chrono and
/// JSON mappings; they differ in integer widths and extra categories.
macro_rules! decode_common {
    ($row:expr, $idx:expr, $category:expr, ints: [$($int:ty),+]) => {{
        let row = $row;
        let idx = $idx;
        match $category {
            TypeCategory::Decimal => match row.try_get::<Option<RawDecimal>, _>(idx) {
                Ok(v) => v.map(|d| JsonValue::String(d.0)),
                Err(e) => {
                    tracing::error!(error = %e, column = idx, "Failed to decode exact numeric");
                    None
                }
            },
            TypeCategory::Integer => {
                first_decoded!(row, idx, [$($int),+], |v| JsonValue::Number(v.into()))
            }
            TypeCategory::Boolean => first_decoded!(row, idx, [bool], JsonValue::Bool),
            TypeCategory::Float => first_decoded!(row, idx, [f64], float_value)
                .or_else(|| first_decoded!(row, idx, [f32], |v| float_value(f64::from(v)))),
            TypeCategory::Datetime => {
                first_decoded!(row, idx, [DateTime<Utc>], |v| JsonValue::String(v.to_rfc3339()))
                    .or_else(|| {
                        first_decoded!(row, idx, [NaiveDateTime, NaiveDate, NaiveTime], |v| {
                            JsonValue::String(v.to_string())
                        })
                    })
            }
            TypeCategory::Binary => first_decoded!(row, idx, [Vec<u8>], |v| encode_binary(&v)),
            TypeCategory::Json => first_decoded!(row, idx, [JsonValue], |v| v),
            _ => None,
        }
    }};
}

impl RowToJson for MySqlRow {
    fn to_json_values(&self) -> Vec<JsonValue> {
        self.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let category = categorize_type(col.type_info().name(), EngineType::MySql);
                decode_mysql(self, idx, category)
            })
            .collect()
    }

    fn column_metadata(&self) -> Vec<ColumnMeta> {
        column_metadata!(self)
    }
}

impl RowToJson for PgRow {
    fn to_json_values(&self) -> Vec<JsonValue> {
        self.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let category = categorize_type(col.type_info().name(), EngineType::Postgres);
                decode_postgres(self, idx, category)
            })
            .collect()
    }

    fn column_metadata(&self) -> Vec<ColumnMeta> {
        column_metadata!(self)
    }
}

impl RowToJson for SqliteRow {
    fn to_json_values(&self) -> Vec<JsonValue> {
        (0..self.columns().len())
            .map(|idx| decode_sqlite(self, idx))
            .collect()
    }

    fn column_metadata(&self) -> Vec<ColumnMeta> {
        column_metadata!(self)
    }
}

pub fn decode_mysql(row: &MySqlRow, idx: usize, category: TypeCategory) -> JsonValue {
    let value = match category {
        // Unsigned columns only decode as unsigned types
        TypeCategory::Integer => decode_common!(row, idx, category, ints: [
            i64, i32, i16, i8, u64, u32, u16, u8
        ]),
        TypeCategory::Text | TypeCategory::Uuid | TypeCategory::Unknown => {
            first_decoded!(row, idx, [String], JsonValue::String).or_else(|| {
                // ENUM/SET and some catalog columns arrive as bytes
                first_decoded!(row, idx, [Vec<u8>], |v| match String::from_utf8(v) {
                    Ok(s) => JsonValue::String(s),
                    Err(e) => encode_binary(e.as_bytes()),
                })
            })
        }
        _ => decode_common!(row, idx, category, ints: [i64]),
    };
    value.unwrap_or(JsonValue::Null)
}

pub fn decode_postgres(row: &PgRow, idx: usize, category: TypeCategory) -> JsonValue {
    let value = match category {
        TypeCategory::Uuid => {
            first_decoded!(row, idx, [sqlx::types::Uuid], |v| JsonValue::String(v.to_string()))
        }
        TypeCategory::Text | TypeCategory::Unknown => {
            first_decoded!(row, idx, [String], JsonValue::String)
        }
        _ => decode_common!(row, idx, category, ints: [i64, i32, i16]),
    };
    value.unwrap_or(JsonValue::Null)
}

/// SQLite is dynamically typed: the declared type is a hint only, and
/// expression columns have none. Fall back to the stored value's type.
pub fn decode_sqlite(row: &SqliteRow, idx: usize) -> JsonValue {
    use sqlx::ValueRef;

    let Ok(raw) = row.try_get_raw(idx) else {
        return JsonValue::Null;
    };
    if raw.is_null() {
        return JsonValue::Null;
    }
    let runtime_type = raw.type_info().name().to_string();
    let declared = row.column(idx).type_info().name().to_lowercase();

    let category = match categorize_type(&declared, EngineType::Sqlite) {
        TypeCategory::Unknown => categorize_type(&runtime_type, EngineType::Sqlite),
        // A declared INTEGER column may still hold text
        TypeCategory::Integer | TypeCategory::Float if runtime_type == "TEXT" => {
            TypeCategory::Text
        }
        category => category,
    };

    let value = match category {
        // REAL stored in an INTEGER column falls through to f64
        TypeCategory::Integer => first_decoded!(row, idx, [i64], |v| JsonValue::Number(v.into()))
            .or_else(|| first_decoded!(row, idx, [f64], float_value)),
        TypeCategory::Boolean => first_decoded!(row, idx, [bool], JsonValue::Bool),
        TypeCategory::Float | TypeCategory::Decimal => {
            first_decoded!(row, idx, [f64], float_value)
        }
        TypeCategory::Binary => first_decoded!(row, idx, [Vec<u8>], |v| encode_binary(&v)),
        _ => row
            .try_get_unchecked::<Option<String>, _>(idx)
            .ok()
            .flatten()
            .map(|v| {
                if declared.contains("json") {
                    if let Ok(json) = serde_json::from_str::<JsonValue>(&v) {
                        return json;
                    }
                }
                JsonValue::String(v)
            }),
    };
    value.unwrap_or(JsonValue::Null)
}
