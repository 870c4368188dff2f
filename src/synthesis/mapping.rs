//! Mapping descriptors: entity fields bound to table columns.

use crate::db::types::RowToValues;
use crate::error::{DbError, DbResult};
use crate::models::{DatabaseType, TableDescriptor, Value, ValueKind};
use crate::synthesis::entity::{Entity, EntityType};
use std::sync::Arc;

/// Binds one entity field to one column of the mapped table.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyBinding {
    pub field: String,
    pub column: String,
    pub field_index: usize,
    pub kind: ValueKind,
}

/// Primary-key binding of a mapping.
#[derive(Debug, Clone, PartialEq)]
pub enum IdentityBinding {
    Single(PropertyBinding),
    /// Sub-keys in column order.
    Composite(Vec<PropertyBinding>),
}

impl IdentityBinding {
    pub fn bindings(&self) -> &[PropertyBinding] {
        match self {
            Self::Single(binding) => std::slice::from_ref(binding),
            Self::Composite(bindings) => bindings,
        }
    }
}

/// Persistence mapping for a synthesized entity type.
#[derive(Debug)]
pub struct MappingDescriptor {
    name: String,
    table: String,
    entity: Arc<EntityType>,
    identity: IdentityBinding,
    properties: Vec<PropertyBinding>,
}

impl MappingDescriptor {
    /// Bind the entity's fields to the table's columns.
    ///
    /// One key column yields a single-key binding, several yield a composite
    /// binding. Every other column becomes a regular property.
    pub fn build(table: &TableDescriptor, entity: Arc<EntityType>) -> DbResult<Arc<Self>> {
        let mut keys = Vec::new();
        let mut properties = Vec::new();

        for column in &table.columns {
            let field_index = entity.field_index(&column.name).ok_or_else(|| {
                DbError::internal(format!(
                    "Entity '{}' has no field for column '{}'",
                    entity.name(),
                    column.name
                ))
            })?;
            let binding = PropertyBinding {
                field: entity.fields()[field_index].name.clone(),
                column: column.name.clone(),
                field_index,
                kind: entity.fields()[field_index].ty.kind,
            };
            if column.is_primary_key {
                keys.push(binding);
            } else {
                properties.push(binding);
            }
        }

        let identity = match keys.len() {
            0 => {
                return Err(DbError::schema(
                    format!("No primary key columns found for table '{}'.", table.name),
                    table.name.clone(),
                ));
            }
            1 => IdentityBinding::Single(keys.remove(0)),
            _ => IdentityBinding::Composite(keys),
        };

        Ok(Arc::new(Self {
            name: table.map_name(),
            table: table.name.clone(),
            entity,
            identity,
            properties,
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn entity(&self) -> &Arc<EntityType> {
        &self.entity
    }

    pub fn identity(&self) -> &IdentityBinding {
        &self.identity
    }

    pub fn properties(&self) -> &[PropertyBinding] {
        &self.properties
    }

    /// Selected columns: identity bindings, then regular bindings.
    pub fn columns(&self) -> impl Iterator<Item = &PropertyBinding> {
        self.identity.bindings().iter().chain(self.properties.iter())
    }

    /// Unfiltered `SELECT` over every mapped column.
    pub fn select_statement(&self, db_type: DatabaseType) -> String {
        let columns = self
            .columns()
            .map(|binding| {
                let column = quote_identifier(db_type, &binding.column);
                // Read NUMERIC as text so no digits are lost
                if db_type == DatabaseType::PostgreSQL && binding.kind == ValueKind::Decimal {
                    format!("{}::text AS {}", column, column)
                } else {
                    column
                }
            })
            .collect::<Vec<_>>()
            .join(", ");

        format!(
            "SELECT {} FROM {}",
            columns,
            quote_identifier(db_type, &self.table)
        )
    }

    /// Build an entity from a row produced by [`select_statement`](Self::select_statement).
    pub fn materialize<R: RowToValues>(&self, row: &R) -> DbResult<Entity> {
        let mut values = vec![Value::Null; self.entity.fields().len()];
        for (idx, binding) in self.columns().enumerate() {
            values[binding.field_index] = row
                .decode_value(idx, binding.kind)
                .map_err(|e| match e {
                    DbError::Internal { message } => DbError::internal(format!(
                        "Column '{}' of table '{}': {}",
                        binding.column, self.table, message
                    )),
                    other => other,
                })?;
        }
        self.entity.instantiate(values)
    }
}

/// Quote an identifier for the vendor, doubling embedded quote characters.
pub fn quote_identifier(db_type: DatabaseType, name: &str) -> String {
    match db_type {
        DatabaseType::PostgreSQL | DatabaseType::SQLite => {
            format!("\"{}\"", name.replace('"', "\"\""))
        }
        DatabaseType::MySQL => format!("`{}`", name.replace('`', "``")),
        DatabaseType::SqlServer => format!("[{}]", name.replace(']', "]]")),
    }
}
