//! Runtime entity types.
//!
//! An [`EntityType`] is built from a reflected table: one field per column plus
//! the projection of primary-key fields. An [`Entity`] is one row of that type,
//! stored as values in field order.
//!
//! Identity covers only the primary-key fields, in descriptor order:
//! - two entities are equal when they share the same type and every key
//!   field compares equal
//! - the hash is taken over the string `"Key1:{v1};Key2:{v2};"`, so it agrees
//!   with equality
//!
//! Composite keys are flattened; the grouping used by the mapping layer does
//! not change identity.

use crate::error::{DbError, DbResult};
use crate::models::{CanonicalType, TableDescriptor, Value};
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// One field of an entity type.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    pub name: String,
    pub ty: CanonicalType,
    pub is_key: bool,
}

/// Record type synthesized from a table.
#[derive(Debug)]
pub struct EntityType {
    name: String,
    fields: Vec<FieldDescriptor>,
    key_fields: Vec<usize>,
}

impl EntityType {
    /// Synthesize the entity type for a table.
    ///
    /// Fails with a schema error when the table has no primary-key column.
    pub fn build(table: &TableDescriptor) -> DbResult<Arc<Self>> {
        let fields: Vec<FieldDescriptor> = table
            .columns
            .iter()
            .map(|column| FieldDescriptor {
                name: column.name.clone(),
                ty: column.ty,
                is_key: column.is_primary_key,
            })
            .collect();

        let key_fields: Vec<usize> = fields
            .iter()
            .enumerate()
            .filter(|(_, field)| field.is_key)
            .map(|(idx, _)| idx)
            .collect();

        if key_fields.is_empty() {
            return Err(DbError::schema(
                format!("No primary key columns found for table '{}'.", table.name),
                table.name.clone(),
            ));
        }

        Ok(Arc::new(Self {
            name: table.entity_name().to_string(),
            fields,
            key_fields,
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    /// Primary-key fields in descriptor order.
    pub fn key_fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.key_fields.iter().map(|&idx| &self.fields[idx])
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Create an instance from values given in field order.
    pub fn instantiate(self: &Arc<Self>, values: Vec<Value>) -> DbResult<Entity> {
        if values.len() != self.fields.len() {
            return Err(DbError::internal(format!(
                "Entity '{}' has {} fields but {} values were given",
                self.name,
                self.fields.len(),
                values.len()
            )));
        }

        if let Some((field, value)) = self
            .fields
            .iter()
            .zip(&values)
            .find(|(field, value)| !value.fits(&field.ty))
        {
            return Err(DbError::internal(format!(
                "Field '{}.{}' of type {} cannot hold {:?}",
                self.name, field.name, field.ty, value
            )));
        }

        Ok(Entity {
            entity_type: Arc::clone(self),
            values,
        })
    }
}

/// One row of a synthesized entity type.
#[derive(Debug, Clone)]
pub struct Entity {
    entity_type: Arc<EntityType>,
    values: Vec<Value>,
}

impl Entity {
    pub fn entity_type(&self) -> &Arc<EntityType> {
        &self.entity_type
    }

    /// Get a field value by name.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.entity_type
            .field_index(field)
            .map(|idx| &self.values[idx])
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Identity string over the primary-key fields: `"Name1:{v1};Name2:{v2};"`.
    pub fn identity_key(&self) -> String {
        self.entity_type
            .key_fields
            .iter()
            .map(|&idx| format!("{}:{};", self.entity_type.fields[idx].name, self.values[idx]))
            .collect()
    }

    /// Hash of [`identity_key`](Self::identity_key) with the standard string hasher.
    pub fn identity_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.identity_key().hash(&mut hasher);
        hasher.finish()
    }
}

impl PartialEq for Entity {
    fn eq(&self, other: &Self) -> bool {
        if std::ptr::eq(self, other) {
            return true;
        }
        if !Arc::ptr_eq(&self.entity_type, &other.entity_type) {
            return false;
        }
        self.entity_type
            .key_fields
            .iter()
            .all(|&idx| self.values[idx] == other.values[idx])
    }
}

// Key values that are NaN never compare equal; every other value is reflexive.
impl Eq for Entity {}

impl Hash for Entity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.identity_hash());
    }
}

/// Serialize as a JSON object with fields in column order.
impl Serialize for Entity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (field, value) in self.entity_type.fields.iter().zip(&self.values) {
            map.serialize_entry(&field.name, value)?;
        }
        map.end()
    }
}
