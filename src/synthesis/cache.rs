//! Process-wide memoization of entity types and mapping descriptors.
//!
//! Lookups take a shared read lock. A miss takes the single build lock,
//! re-checks, and only then synthesizes, so each table name is built at most
//! once however many callers race on it.

use crate::error::DbResult;
use crate::models::TableDescriptor;
use crate::synthesis::entity::EntityType;
use crate::synthesis::mapping::MappingDescriptor;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::{debug, info};

#[derive(Debug, Default)]
pub struct SynthesisCache {
    entities: RwLock<HashMap<String, Arc<EntityType>>>,
    mappings: RwLock<HashMap<String, Arc<MappingDescriptor>>>,
    build_lock: Mutex<()>,
    builds: AtomicUsize,
}

impl SynthesisCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or build the entity type and mapping for a table.
    pub fn build_types_for_table(
        &self,
        table: &TableDescriptor,
    ) -> DbResult<(Arc<EntityType>, Arc<MappingDescriptor>)> {
        if let Some(found) = self.lookup(table) {
            return Ok(found);
        }

        let _guard = self
            .build_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(found) = self.lookup(table) {
            debug!(table = %table.name, "Types built by a concurrent caller");
            return Ok(found);
        }

        self.builds.fetch_add(1, Ordering::SeqCst);
        let entity = EntityType::build(table)?;
        let mapping = MappingDescriptor::build(table, Arc::clone(&entity))?;

        self.entities
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(table.entity_name().to_string(), Arc::clone(&entity));
        self.mappings
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(table.map_name(), Arc::clone(&mapping));

        info!(
            table = %table.name,
            fields = entity.fields().len(),
            "Synthesized entity type"
        );
        Ok((entity, mapping))
    }

    fn lookup(&self, table: &TableDescriptor) -> Option<(Arc<EntityType>, Arc<MappingDescriptor>)> {
        let entity = self
            .entities
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(table.entity_name())
            .cloned()?;
        let mapping = self
            .mappings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&table.map_name())
            .cloned()?;
        Some((entity, mapping))
    }

    /// Cached entity type by entity name.
    pub fn entity(&self, name: &str) -> Option<Arc<EntityType>> {
        self.entities
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Cached mapping descriptor by map name.
    pub fn mapping(&self, map_name: &str) -> Option<Arc<MappingDescriptor>> {
        self.mappings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(map_name)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.entities
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of synthesis attempts, including failed ones.
    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DbError;
    use crate::models::{CanonicalType, ColumnDescriptor, ValueKind};
    use std::sync::Barrier;
    use std::thread;

    fn orders() -> TableDescriptor {
        TableDescriptor::new(
            "Orders",
            vec![
                ColumnDescriptor::new("OrderId", CanonicalType::required(ValueKind::Int32))
                    .with_primary_key(true),
                ColumnDescriptor::new("CustomerName", CanonicalType::required(ValueKind::String)),
            ],
        )
    }

    #[test]
    fn test_second_call_returns_same_objects() {
        let cache = SynthesisCache::new();
        let (e1, m1) = cache.build_types_for_table(&orders()).unwrap();
        let (e2, m2) = cache.build_types_for_table(&orders()).unwrap();
        assert!(Arc::ptr_eq(&e1, &e2));
        assert!(Arc::ptr_eq(&m1, &m2));
        assert_eq!(cache.builds(), 1);
        assert!(cache.entity("Orders").is_some());
        assert!(cache.mapping("OrdersMap").is_some());
    }

    #[test]
    fn test_concurrent_first_access_builds_once() {
        const THREADS: usize = 16;
        let cache = Arc::new(SynthesisCache::new());
        let barrier = Arc::new(Barrier::new(THREADS));

        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    cache.build_types_for_table(&orders()).unwrap()
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(cache.builds(), 1);
        assert_eq!(cache.len(), 1);
        for (entity, mapping) in &results {
            assert!(Arc::ptr_eq(entity, &results[0].0));
            assert!(Arc::ptr_eq(mapping, &results[0].1));
        }
    }

    #[test]
    fn test_table_without_key_is_not_cached() {
        let cache = SynthesisCache::new();
        let table = TableDescriptor::new(
            "AuditLog",
            vec![ColumnDescriptor::new(
                "Message",
                CanonicalType::required(ValueKind::String),
            )],
        );
        let err = cache.build_types_for_table(&table).unwrap_err();
        assert!(matches!(err, DbError::Schema { .. }));
        assert!(err.to_string().contains("AuditLog"));
        assert!(cache.is_empty());
        assert!(cache.mapping("AuditLogMap").is_none());
    }

    #[test]
    fn test_distinct_tables_get_distinct_entries() {
        let cache = SynthesisCache::new();
        let customers = TableDescriptor::new(
            "Customers",
            vec![
                ColumnDescriptor::new("Id", CanonicalType::required(ValueKind::Int64))
                    .with_primary_key(true),
            ],
        );
        cache.build_types_for_table(&orders()).unwrap();
        cache.build_types_for_table(&customers).unwrap();
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.builds(), 2);
    }
}
