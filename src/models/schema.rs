//! Reflected table shapes.

use crate::models::value::CanonicalType;

/// One column of a reflected table.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDescriptor {
    pub name: String,
    /// Field type after vendor type translation
    pub ty: CanonicalType,
    /// Vendor type name as reported by the catalog
    pub raw_type: String,
    /// Declared length (characters for text, -1 for unbounded)
    pub length: i64,
    pub precision: i64,
    pub scale: i64,
    pub nullable: bool,
    pub is_identity: bool,
    pub is_primary_key: bool,
}

impl ColumnDescriptor {
    /// Create a new non-nullable column descriptor.
    pub fn new(name: impl Into<String>, ty: CanonicalType) -> Self {
        Self {
            name: name.into(),
            ty,
            raw_type: String::new(),
            length: 0,
            precision: 0,
            scale: 0,
            nullable: ty.optional,
            is_identity: false,
            is_primary_key: false,
        }
    }

    pub fn with_raw_type(mut self, raw_type: impl Into<String>) -> Self {
        self.raw_type = raw_type.into();
        self
    }

    pub fn with_length(mut self, length: i64) -> Self {
        self.length = length;
        self
    }

    /// Set numeric precision and scale.
    pub fn with_precision(mut self, precision: i64, scale: i64) -> Self {
        self.precision = precision;
        self.scale = scale;
        self
    }

    pub fn with_nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    /// Mark the column as an identity / auto-increment column.
    pub fn with_identity(mut self, is_identity: bool) -> Self {
        self.is_identity = is_identity;
        self
    }

    /// Set whether this is a primary key column.
    pub fn with_primary_key(mut self, is_pk: bool) -> Self {
        self.is_primary_key = is_pk;
        self
    }
}

/// Reflected shape of one table.
#[derive(Debug, Clone, PartialEq)]
pub struct TableDescriptor {
    pub name: String,
    pub columns: Vec<ColumnDescriptor>,
}

impl TableDescriptor {
    pub fn new(name: impl Into<String>, columns: Vec<ColumnDescriptor>) -> Self {
        Self {
            name: name.into(),
            columns,
        }
    }

    /// Name of the synthesized entity type for this table.
    pub fn entity_name(&self) -> &str {
        &self.name
    }

    /// Name of the mapping descriptor for this table.
    pub fn map_name(&self) -> String {
        format!("{}Map", self.name)
    }

    /// Primary-key columns in descriptor order.
    pub fn primary_key_columns(&self) -> impl Iterator<Item = &ColumnDescriptor> {
        self.columns.iter().filter(|c| c.is_primary_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::value::ValueKind;

    #[test]
    fn test_descriptor_names() {
        let table = TableDescriptor::new("Orders", Vec::new());
        assert_eq!(table.entity_name(), "Orders");
        assert_eq!(table.map_name(), "OrdersMap");
    }

    #[test]
    fn test_primary_key_columns_keep_order() {
        let table = TableDescriptor::new(
            "OrderLines",
            vec![
                ColumnDescriptor::new("LineNo", CanonicalType::required(ValueKind::Int32))
                    .with_primary_key(true),
                ColumnDescriptor::new("Note", CanonicalType::required(ValueKind::String)),
                ColumnDescriptor::new("OrderId", CanonicalType::required(ValueKind::Int32))
                    .with_primary_key(true),
            ],
        );
        let keys: Vec<_> = table.primary_key_columns().map(|c| c.name.as_str()).collect();
        assert_eq!(keys, vec!["LineNo", "OrderId"]);
    }

    #[test]
    fn test_column_builder() {
        let col = ColumnDescriptor::new("Price", CanonicalType::optional(ValueKind::Decimal))
            .with_raw_type("decimal")
            .with_precision(10, 2);
        assert!(col.nullable);
        assert_eq!(col.precision, 10);
        assert_eq!(col.scale, 2);
        assert!(!col.is_primary_key);
    }
}
