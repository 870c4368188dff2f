//! Canonical value types and the tagged values stored in synthesized records.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Serialize, Serializer};
use uuid::Uuid;

/// Vendor-independent kind of a column value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Boolean,
    Byte,
    Int16,
    Int32,
    Int64,
    Single,
    Double,
    Decimal,
    Char,
    String,
    Binary,
    Date,
    DateTime,
    DateTimeOffset,
    Time,
    Guid,
    Json,
    Xml,
    Variant,
}

impl ValueKind {
    /// Reference kinds already admit null and are never wrapped in `Optional`.
    pub fn is_reference(&self) -> bool {
        matches!(
            self,
            Self::String | Self::Binary | Self::Json | Self::Xml | Self::Variant
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Boolean => "bool",
            Self::Byte => "byte",
            Self::Int16 => "short",
            Self::Int32 => "int",
            Self::Int64 => "long",
            Self::Single => "float",
            Self::Double => "double",
            Self::Decimal => "decimal",
            Self::Char => "char",
            Self::String => "string",
            Self::Binary => "bytes",
            Self::Date => "date",
            Self::DateTime => "datetime",
            Self::DateTimeOffset => "datetimeoffset",
            Self::Time => "time",
            Self::Guid => "guid",
            Self::Json => "json",
            Self::Xml => "xml",
            Self::Variant => "object",
        }
    }
}

impl std::fmt::Display for ValueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Field type of a synthesized record: a kind, optionally wrapped as nullable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CanonicalType {
    pub kind: ValueKind,
    pub optional: bool,
}

impl CanonicalType {
    pub fn required(kind: ValueKind) -> Self {
        Self {
            kind,
            optional: false,
        }
    }

    pub fn optional(kind: ValueKind) -> Self {
        Self {
            kind,
            optional: true,
        }
    }

    /// Whether a null value can be stored in a field of this type.
    pub fn admits_null(&self) -> bool {
        self.optional || self.kind.is_reference()
    }
}

impl std::fmt::Display for CanonicalType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.optional {
            write!(f, "{}?", self.kind)
        } else {
            write!(f, "{}", self.kind)
        }
    }
}

/// A single column value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    Byte(u8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Single(f32),
    Double(f64),
    /// Exact textual representation as returned by the database.
    Decimal(String),
    Char(char),
    String(String),
    Binary(Vec<u8>),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    DateTimeOffset(DateTime<FixedOffset>),
    Time(NaiveTime),
    Guid(Uuid),
    Json(serde_json::Value),
    Xml(String),
}

impl Value {
    /// Kind of a non-null value.
    pub fn kind(&self) -> Option<ValueKind> {
        Some(match self {
            Self::Null => return None,
            Self::Boolean(_) => ValueKind::Boolean,
            Self::Byte(_) => ValueKind::Byte,
            Self::Int16(_) => ValueKind::Int16,
            Self::Int32(_) => ValueKind::Int32,
            Self::Int64(_) => ValueKind::Int64,
            Self::Single(_) => ValueKind::Single,
            Self::Double(_) => ValueKind::Double,
            Self::Decimal(_) => ValueKind::Decimal,
            Self::Char(_) => ValueKind::Char,
            Self::String(_) => ValueKind::String,
            Self::Binary(_) => ValueKind::Binary,
            Self::Date(_) => ValueKind::Date,
            Self::DateTime(_) => ValueKind::DateTime,
            Self::DateTimeOffset(_) => ValueKind::DateTimeOffset,
            Self::Time(_) => ValueKind::Time,
            Self::Guid(_) => ValueKind::Guid,
            Self::Json(_) => ValueKind::Json,
            Self::Xml(_) => ValueKind::Xml,
        })
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Whether this value may be stored in a field of the given type.
    /// Variant fields accept any value.
    pub fn fits(&self, ty: &CanonicalType) -> bool {
        match self.kind() {
            None => ty.admits_null(),
            Some(_) if ty.kind == ValueKind::Variant => true,
            Some(kind) => kind == ty.kind,
        }
    }
}

/// Text form used in identity keys. Null renders as the empty string.
///
/// Values that compare equal render identically: signed zeros print as `0`
/// and offset timestamps print in UTC.
impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => Ok(()),
            Self::Boolean(v) => write!(f, "{}", v),
            Self::Byte(v) => write!(f, "{}", v),
            Self::Int16(v) => write!(f, "{}", v),
            Self::Int32(v) => write!(f, "{}", v),
            Self::Int64(v) => write!(f, "{}", v),
            Self::Single(v) if *v == 0.0 => f.write_str("0"),
            Self::Single(v) => write!(f, "{}", v),
            Self::Double(v) if *v == 0.0 => f.write_str("0"),
            Self::Double(v) => write!(f, "{}", v),
            Self::Decimal(v) => f.write_str(v),
            Self::Char(v) => write!(f, "{}", v),
            Self::String(v) => f.write_str(v),
            Self::Binary(v) => f.write_str(&STANDARD.encode(v)),
            Self::Date(v) => write!(f, "{}", v),
            Self::DateTime(v) => write!(f, "{}", v),
            Self::DateTimeOffset(v) => f.write_str(&v.with_timezone(&Utc).to_rfc3339()),
            Self::Time(v) => write!(f, "{}", v),
            Self::Guid(v) => write!(f, "{}", v.hyphenated()),
            Self::Json(v) => write!(f, "{}", v),
            Self::Xml(v) => f.write_str(v),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Null => serializer.serialize_none(),
            Self::Boolean(v) => serializer.serialize_bool(*v),
            Self::Byte(v) => serializer.serialize_u8(*v),
            Self::Int16(v) => serializer.serialize_i16(*v),
            Self::Int32(v) => serializer.serialize_i32(*v),
            Self::Int64(v) => serializer.serialize_i64(*v),
            // Non-finite floats have no JSON number form
            Self::Single(v) if !v.is_finite() => serializer.serialize_str(&v.to_string()),
            Self::Single(v) => serializer.serialize_f32(*v),
            Self::Double(v) if !v.is_finite() => serializer.serialize_str(&v.to_string()),
            Self::Double(v) => serializer.serialize_f64(*v),
            Self::Date(v) => v.serialize(serializer),
            Self::DateTime(v) => v.serialize(serializer),
            Self::DateTimeOffset(v) => v.serialize(serializer),
            Self::Time(v) => v.serialize(serializer),
            Self::Json(v) => v.serialize(serializer),
            other => serializer.collect_str(other),
        }
    }
}
