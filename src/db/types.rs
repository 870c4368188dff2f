//! Vendor type translation and value decoding.
//!
//! # Architecture
//!
//! Type handling is split in two phases:
//! 1. [`TypeNameMapper`] translates a vendor column type name into a
//!    [`ValueKind`], then into the field type of the synthesized record
//! 2. Database-specific decoders read a result column into a [`Value`] of
//!    that kind
//!
//! The mapping tables are plain data, one slice per vendor, so extending a
//! vendor is a one-line change.

use crate::error::{DbError, DbResult};
use crate::models::{CanonicalType, DatabaseType, Value, ValueKind};
use sqlx::mysql::{MySqlRow, MySqlTypeInfo, MySqlValueRef};
use sqlx::postgres::PgRow;
use sqlx::sqlite::SqliteRow;
use sqlx::{ColumnIndex, Decode, Row, Type, TypeInfo};
use std::collections::HashMap;

// =============================================================================
// Type Name Tables
// =============================================================================

type TypeTable = &'static [(&'static str, ValueKind)];

mod tables {
    use super::ValueKind::{self, *};

    pub const SQL_SERVER: &[(&str, ValueKind)] = &[
        ("bigint", Int64),
        ("binary", Binary),
        ("bit", Boolean),
        ("char", String),
        ("date", DateTime),
        ("datetime", DateTime),
        ("datetime2", DateTime),
        ("datetimeoffset", DateTimeOffset),
        ("decimal", Decimal),
        ("float", Double),
        ("image", Binary),
        ("int", Int32),
        ("money", Decimal),
        ("nchar", String),
        ("ntext", String),
        ("numeric", Decimal),
        ("nvarchar", String),
        ("real", Single),
        ("rowversion", Binary),
        ("smalldatetime", DateTime),
        ("smallint", Int16),
        ("smallmoney", Decimal),
        ("sql_variant", Variant),
        ("text", String),
        ("time", Time),
        ("timestamp", Binary),
        ("tinyint", Byte),
        ("uniqueidentifier", Guid),
        ("varbinary", Binary),
        ("varchar", String),
        ("xml", Xml),
    ];

    pub const MYSQL: &[(&str, ValueKind)] = &[
        ("bigint", Int64),
        ("binary", Binary),
        ("bit", Boolean),
        ("blob", Binary),
        ("bool", Boolean),
        ("boolean", Boolean),
        ("char", String),
        ("date", Date),
        ("datetime", DateTime),
        ("decimal", Decimal),
        ("double", Double),
        ("enum", String),
        ("float", Single),
        ("int", Int64),
        ("integer", Int64),
        ("json", Json),
        ("longblob", Binary),
        ("longtext", String),
        ("mediumblob", Binary),
        ("mediumint", Int32),
        ("mediumtext", String),
        ("numeric", Decimal),
        ("real", Double),
        ("set", String),
        ("smallint", Int32),
        ("text", String),
        ("time", Time),
        ("timestamp", DateTime),
        ("tinyblob", Binary),
        ("tinyint", Int16),
        ("tinytext", String),
        ("varbinary", Binary),
        ("varchar", String),
    ];

    pub const POSTGRES: &[(&str, ValueKind)] = &[
        ("bool", Boolean),
        ("bpchar", String),
        ("bytea", Binary),
        ("citext", String),
        ("date", Date),
        ("float4", Single),
        ("float8", Double),
        ("int2", Int16),
        ("int4", Int32),
        ("int8", Int64),
        ("json", Json),
        ("jsonb", Json),
        ("money", Decimal),
        ("name", String),
        ("numeric", Decimal),
        ("text", String),
        ("time", Time),
        ("timestamp", DateTime),
        ("timestamptz", DateTimeOffset),
        ("uuid", Guid),
        ("varchar", String),
    ];

    /// SQLite declared types, matched on the name before any `(n)` suffix.
    pub const SQLITE: &[(&str, ValueKind)] = &[
        ("bigint", Int64),
        ("blob", Binary),
        ("bool", Boolean),
        ("boolean", Boolean),
        ("char", String),
        ("character", String),
        ("clob", String),
        ("date", Date),
        ("datetime", DateTime),
        // SQLite has no exact decimal storage
        ("decimal", Double),
        ("double", Double),
        ("double precision", Double),
        ("float", Double),
        ("int", Int64),
        ("integer", Int64),
        ("json", Json),
        ("mediumint", Int64),
        ("nchar", String),
        ("numeric", Double),
        ("nvarchar", String),
        ("real", Double),
        ("smallint", Int64),
        ("text", String),
        ("time", Time),
        ("timestamp", DateTime),
        ("tinyint", Int64),
        ("varchar", String),
    ];
}

/// Translates vendor column type names into canonical value types.
#[derive(Debug, Clone)]
pub struct TypeNameMapper {
    tables: HashMap<DatabaseType, TypeTable>,
}

impl TypeNameMapper {
    /// Create a mapper with no vendor registered.
    pub fn empty() -> Self {
        Self {
            tables: HashMap::new(),
        }
    }

    /// Create a mapper with every built-in vendor table registered.
    pub fn new() -> Self {
        let mut mapper = Self::empty();
        mapper.register(DatabaseType::SqlServer, tables::SQL_SERVER);
        mapper.register(DatabaseType::MySQL, tables::MYSQL);
        mapper.register(DatabaseType::PostgreSQL, tables::POSTGRES);
        mapper.register(DatabaseType::SQLite, tables::SQLITE);
        mapper
    }

    /// Register (or replace) the type table for a vendor.
    pub fn register(&mut self, db_type: DatabaseType, table: TypeTable) {
        self.tables.insert(db_type, table);
    }

    /// Translate a raw vendor type name into its value kind.
    pub fn get_type(&self, db_type: DatabaseType, raw_type: &str) -> DbResult<ValueKind> {
        let normalized = raw_type.trim().to_lowercase();
        if normalized.is_empty() {
            return Err(DbError::invalid_argument(format!(
                "'{}' is not a valid type name.",
                raw_type
            )));
        }

        let table = self.tables.get(&db_type).ok_or_else(|| {
            DbError::configuration(format!(
                "No type name mapper defined for database type '{}'.",
                db_type
            ))
        })?;

        table
            .iter()
            .find(|(name, _)| *name == normalized)
            .map(|(_, kind)| *kind)
            .ok_or_else(|| DbError::unrecognized_type(raw_type.trim(), db_type.display_name()))
    }

    /// Resolve the field type for a column.
    ///
    /// Text columns holding exactly one character become `Char`. Value kinds
    /// are wrapped as optional when the column is nullable.
    pub fn resolve(
        &self,
        db_type: DatabaseType,
        raw_type: &str,
        declared_length: i64,
        nullable: bool,
    ) -> DbResult<CanonicalType> {
        let mut kind = self.get_type(db_type, raw_type)?;

        if kind == ValueKind::String {
            let width = byte_width(db_type, raw_type);
            if declared_length > 0 && declared_length / width == 1 {
                kind = ValueKind::Char;
            }
        }

        Ok(CanonicalType {
            kind,
            optional: nullable && !kind.is_reference(),
        })
    }
}

impl Default for TypeNameMapper {
    fn default() -> Self {
        Self::new()
    }
}

/// Bytes per character for vendors that report text lengths in bytes.
pub fn byte_width(db_type: DatabaseType, raw_type: &str) -> i64 {
    match (db_type, raw_type.trim().to_lowercase().as_str()) {
        (DatabaseType::SqlServer, "nchar" | "nvarchar" | "ntext") => 2,
        _ => 1,
    }
}

// =============================================================================
// Decimal Type Support
// =============================================================================

/// Wrapper type for raw MySQL DECIMAL values as strings.
/// This preserves the exact database representation.
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

// =============================================================================
// Row Decoding
// =============================================================================

/// Trait for decoding result columns into record values.
pub trait RowToValues {
    /// Decode column `idx` as a value of `kind`. NULL decodes to [`Value::Null`].
    fn decode_value(&self, idx: usize, kind: ValueKind) -> DbResult<Value>;
}

impl RowToValues for MySqlRow {
    fn decode_value(&self, idx: usize, kind: ValueKind) -> DbResult<Value> {
        mysql::decode_column(self, idx, kind)
    }
}

impl RowToValues for PgRow {
    fn decode_value(&self, idx: usize, kind: ValueKind) -> DbResult<Value> {
        postgres::decode_column(self, idx, kind)
    }
}

impl RowToValues for SqliteRow {
    fn decode_value(&self, idx: usize, kind: ValueKind) -> DbResult<Value> {
        sqlite::decode_column(self, idx, kind)
    }
}

/// Read a nullable column, propagating type mismatches.
fn get<'r, R, T>(row: &'r R, idx: usize) -> DbResult<Option<T>>
where
    R: Row,
    usize: ColumnIndex<R>,
    T: Decode<'r, R::Database> + Type<R::Database>,
{
    row.try_get::<Option<T>, _>(idx).map_err(DbError::from)
}

/// Narrow a decoded integer to the field's integer kind.
fn narrow_integer(value: Option<i64>, kind: ValueKind) -> DbResult<Value> {
    let Some(v) = value else {
        return Ok(Value::Null);
    };
    let narrowed = match kind {
        ValueKind::Byte => u8::try_from(v).ok().map(Value::Byte),
        ValueKind::Int16 => i16::try_from(v).ok().map(Value::Int16),
        ValueKind::Int32 => i32::try_from(v).ok().map(Value::Int32),
        ValueKind::Int64 => Some(Value::Int64(v)),
        _ => None,
    };
    narrowed.ok_or_else(|| DbError::internal(format!("Value {} does not fit a {} field", v, kind)))
}

fn float_value(value: Option<f64>, kind: ValueKind) -> Value {
    match (value, kind) {
        (None, _) => Value::Null,
        (Some(v), ValueKind::Single) => Value::Single(v as f32),
        (Some(v), _) => Value::Double(v),
    }
}

/// Single-character column value. An empty string reads as a blank, longer
/// text is rejected rather than truncated.
fn char_value(value: Option<String>) -> DbResult<Value> {
    let Some(text) = value else {
        return Ok(Value::Null);
    };
    let mut chars = text.chars();
    match (chars.next(), chars.next()) {
        (None, _) => Ok(Value::Char(' ')),
        (Some(c), None) => Ok(Value::Char(c)),
        (Some(_), Some(_)) => Err(DbError::internal(format!(
            "Value '{}' does not fit a single-character column",
            text
        ))),
    }
}

fn json_from_text(value: Option<String>) -> DbResult<Value> {
    match value {
        None => Ok(Value::Null),
        Some(text) => serde_json::from_str(&text)
            .map(Value::Json)
            .map_err(|e| DbError::internal(format!("Invalid JSON column value: {}", e))),
    }
}

fn unsupported(kind: ValueKind, db_type: DatabaseType) -> DbError {
    DbError::internal(format!(
        "{} columns cannot be decoded from {}",
        kind, db_type
    ))
}

// =============================================================================
// Database-Specific Decoders
// =============================================================================

mod mysql {
    use super::*;

    pub fn decode_column(row: &MySqlRow, idx: usize, kind: ValueKind) -> DbResult<Value> {
        match kind {
            ValueKind::Boolean => decode_boolean(row, idx),
            ValueKind::Byte | ValueKind::Int16 | ValueKind::Int32 | ValueKind::Int64 => {
                narrow_integer(decode_integer(row, idx)?, kind)
            }
            ValueKind::Single | ValueKind::Double => Ok(float_value(decode_float(row, idx)?, kind)),
            ValueKind::Decimal => Ok(get::<_, RawDecimal>(row, idx)?
                .map(|d| Value::Decimal(d.0))
                .unwrap_or(Value::Null)),
            ValueKind::Char => char_value(decode_text(row, idx)?),
            ValueKind::String | ValueKind::Xml | ValueKind::Variant => Ok(decode_text(row, idx)?
                .map(Value::String)
                .unwrap_or(Value::Null)),
            ValueKind::Binary => Ok(get::<_, Vec<u8>>(row, idx)?
                .map(Value::Binary)
                .unwrap_or(Value::Null)),
            ValueKind::Date => Ok(get(row, idx)?.map(Value::Date).unwrap_or(Value::Null)),
            ValueKind::DateTime => Ok(get(row, idx)?.map(Value::DateTime).unwrap_or(Value::Null)),
            ValueKind::Time => Ok(get(row, idx)?.map(Value::Time).unwrap_or(Value::Null)),
            // MySQL JSON type should be decoded as serde_json::Value directly
            ValueKind::Json => Ok(get::<_, serde_json::Value>(row, idx)?
                .map(Value::Json)
                .unwrap_or(Value::Null)),
            ValueKind::DateTimeOffset | ValueKind::Guid => {
                Err(unsupported(kind, DatabaseType::MySQL))
            }
        }
    }

    fn decode_integer(row: &MySqlRow, idx: usize) -> DbResult<Option<i64>> {
        if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
            return Ok(v);
        }
        match get::<_, u64>(row, idx)? {
            None => Ok(None),
            Some(v) => i64::try_from(v)
                .map(Some)
                .map_err(|_| DbError::internal(format!("Unsigned value {} overflows", v))),
        }
    }

    fn decode_boolean(row: &MySqlRow, idx: usize) -> DbResult<Value> {
        if let Ok(v) = row.try_get::<Option<bool>, _>(idx) {
            return Ok(v.map(Value::Boolean).unwrap_or(Value::Null));
        }
        Ok(decode_integer(row, idx)?
            .map(|v| Value::Boolean(v != 0))
            .unwrap_or(Value::Null))
    }

    fn decode_float(row: &MySqlRow, idx: usize) -> DbResult<Option<f64>> {
        if let Ok(v) = row.try_get::<Option<f64>, _>(idx) {
            return Ok(v);
        }
        Ok(get::<_, f32>(row, idx)?.map(f64::from))
    }

    /// Text columns with binary collations arrive as bytes.
    fn decode_text(row: &MySqlRow, idx: usize) -> DbResult<Option<String>> {
        if let Ok(v) = row.try_get::<Option<String>, _>(idx) {
            return Ok(v);
        }
        match get::<_, Vec<u8>>(row, idx)? {
            None => Ok(None),
            Some(bytes) => String::from_utf8(bytes)
                .map(Some)
                .map_err(|e| DbError::internal(format!("Column {} is not UTF-8: {}", idx, e))),
        }
    }
}

mod postgres {
    use super::*;

    pub fn decode_column(row: &PgRow, idx: usize, kind: ValueKind) -> DbResult<Value> {
        match kind {
            ValueKind::Boolean => Ok(get(row, idx)?.map(Value::Boolean).unwrap_or(Value::Null)),
            ValueKind::Byte | ValueKind::Int16 | ValueKind::Int32 | ValueKind::Int64 => {
                narrow_integer(decode_integer(row, idx)?, kind)
            }
            ValueKind::Single | ValueKind::Double => Ok(float_value(decode_float(row, idx)?, kind)),
            // NUMERIC and MONEY are selected as text to keep the exact representation
            ValueKind::Decimal => Ok(get::<_, String>(row, idx)?
                .map(Value::Decimal)
                .unwrap_or(Value::Null)),
            ValueKind::Char => char_value(get(row, idx)?),
            ValueKind::String | ValueKind::Xml | ValueKind::Variant => {
                Ok(get(row, idx)?.map(Value::String).unwrap_or(Value::Null))
            }
            ValueKind::Binary => Ok(get::<_, Vec<u8>>(row, idx)?
                .map(Value::Binary)
                .unwrap_or(Value::Null)),
            ValueKind::Date => Ok(get(row, idx)?.map(Value::Date).unwrap_or(Value::Null)),
            ValueKind::DateTime => Ok(get(row, idx)?.map(Value::DateTime).unwrap_or(Value::Null)),
            ValueKind::DateTimeOffset => Ok(get::<_, chrono::DateTime<chrono::Utc>>(row, idx)?
                .map(|v| Value::DateTimeOffset(v.into()))
                .unwrap_or(Value::Null)),
            ValueKind::Time => Ok(get(row, idx)?.map(Value::Time).unwrap_or(Value::Null)),
            ValueKind::Guid => Ok(get(row, idx)?.map(Value::Guid).unwrap_or(Value::Null)),
            ValueKind::Json => Ok(get::<_, serde_json::Value>(row, idx)?
                .map(Value::Json)
                .unwrap_or(Value::Null)),
        }
    }

    fn decode_integer(row: &PgRow, idx: usize) -> DbResult<Option<i64>> {
        if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
            return Ok(v);
        }
        if let Ok(v) = row.try_get::<Option<i32>, _>(idx) {
            return Ok(v.map(i64::from));
        }
        Ok(get::<_, i16>(row, idx)?.map(i64::from))
    }

    fn decode_float(row: &PgRow, idx: usize) -> DbResult<Option<f64>> {
        if let Ok(v) = row.try_get::<Option<f64>, _>(idx) {
            return Ok(v);
        }
        Ok(get::<_, f32>(row, idx)?.map(f64::from))
    }
}

mod sqlite {
    use super::*;

    pub fn decode_column(row: &SqliteRow, idx: usize, kind: ValueKind) -> DbResult<Value> {
        match kind {
            ValueKind::Boolean => Ok(get(row, idx)?.map(Value::Boolean).unwrap_or(Value::Null)),
            ValueKind::Byte | ValueKind::Int16 | ValueKind::Int32 | ValueKind::Int64 => {
                narrow_integer(get(row, idx)?, kind)
            }
            ValueKind::Single | ValueKind::Double => Ok(float_value(get(row, idx)?, kind)),
            ValueKind::Char => char_value(get(row, idx)?),
            ValueKind::String | ValueKind::Xml | ValueKind::Variant => {
                Ok(get(row, idx)?.map(Value::String).unwrap_or(Value::Null))
            }
            ValueKind::Binary => Ok(get::<_, Vec<u8>>(row, idx)?
                .map(Value::Binary)
                .unwrap_or(Value::Null)),
            ValueKind::Date => Ok(get(row, idx)?.map(Value::Date).unwrap_or(Value::Null)),
            ValueKind::DateTime => Ok(get(row, idx)?.map(Value::DateTime).unwrap_or(Value::Null)),
            ValueKind::Time => Ok(get(row, idx)?.map(Value::Time).unwrap_or(Value::Null)),
            ValueKind::Json => json_from_text(get(row, idx)?),
            ValueKind::Decimal | ValueKind::DateTimeOffset | ValueKind::Guid => {
                Err(unsupported(kind, DatabaseType::SQLite))
            }
        }
    }
}
