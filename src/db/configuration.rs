//! Session configurations and their cache.
//!
//! A [`SessionConfiguration`] belongs to one endpoint and accumulates the
//! mappings that sessions opened from it may query. [`ConfigurationCache`]
//! creates at most one configuration per endpoint and registers each mapping
//! into it at most once.

use crate::db::connection_string::ConnectionStringFactories;
use crate::error::{DbError, DbResult};
use crate::models::DatabaseEndpoint;
use crate::synthesis::MappingDescriptor;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::{debug, info};

/// Persistence configuration for one endpoint.
pub struct SessionConfiguration {
    endpoint: DatabaseEndpoint,
    connection_string: String,
    mappings: RwLock<Vec<Arc<MappingDescriptor>>>,
}

impl SessionConfiguration {
    pub fn new(endpoint: DatabaseEndpoint, connection_string: impl Into<String>) -> Self {
        Self {
            endpoint,
            connection_string: connection_string.into(),
            mappings: RwLock::new(Vec::new()),
        }
    }

    pub fn endpoint(&self) -> &DatabaseEndpoint {
        &self.endpoint
    }

    pub fn connection_string(&self) -> &str {
        &self.connection_string
    }

    /// Register a mapping. Registering the same map name twice is an error.
    pub fn add_mapping(&self, mapping: Arc<MappingDescriptor>) -> DbResult<()> {
        let mut mappings = self.mappings.write().unwrap_or_else(PoisonError::into_inner);
        if mappings.iter().any(|m| m.name() == mapping.name()) {
            return Err(DbError::configuration(format!(
                "Mapping '{}' is already registered for {}",
                mapping.name(),
                self.endpoint
            )));
        }
        mappings.push(mapping);
        Ok(())
    }

    /// Registered mapping by map name.
    pub fn mapping(&self, name: &str) -> Option<Arc<MappingDescriptor>> {
        self.mappings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|m| m.name() == name)
            .cloned()
    }

    pub fn mapping_count(&self) -> usize {
        self.mappings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl std::fmt::Debug for SessionConfiguration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionConfiguration")
            .field("endpoint", &self.endpoint)
            .field("connection_string", &"********")
            .field("mappings", &self.mapping_count())
            .finish()
    }
}

type MappingKey = (DatabaseEndpoint, String);

/// Memoizes session configurations by endpoint and by registered mapping.
#[derive(Debug)]
pub struct ConfigurationCache {
    factories: Arc<ConnectionStringFactories>,
    by_mapping: RwLock<HashMap<MappingKey, Arc<SessionConfiguration>>>,
    by_endpoint: RwLock<HashMap<DatabaseEndpoint, Arc<SessionConfiguration>>>,
    lock: Mutex<()>,
    created: AtomicUsize,
}

impl ConfigurationCache {
    pub fn new(factories: Arc<ConnectionStringFactories>) -> Self {
        Self {
            factories,
            by_mapping: RwLock::new(HashMap::new()),
            by_endpoint: RwLock::new(HashMap::new()),
            lock: Mutex::new(()),
            created: AtomicUsize::new(0),
        }
    }

    /// Get the endpoint's configuration with `mapping` registered in it.
    ///
    /// The first request for an endpoint creates its configuration. Later
    /// mappings for the same endpoint extend it.
    pub fn get_configuration_for(
        &self,
        endpoint: &DatabaseEndpoint,
        mapping: &Arc<MappingDescriptor>,
    ) -> DbResult<Arc<SessionConfiguration>> {
        let key = (endpoint.clone(), mapping.name().to_string());
        if let Some(config) = self.registered(&key) {
            return Ok(config);
        }

        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(config) = self.registered(&key) {
            return Ok(config);
        }

        let existing = self
            .by_endpoint
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(endpoint)
            .cloned();
        let config = match existing {
            Some(config) => config,
            None => {
                let connection_string = self.factories.create(endpoint)?;
                let config = Arc::new(SessionConfiguration::new(
                    endpoint.clone(),
                    connection_string,
                ));
                self.by_endpoint
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(endpoint.clone(), Arc::clone(&config));
                self.created.fetch_add(1, Ordering::SeqCst);
                info!(endpoint = %endpoint, "Created session configuration");
                config
            }
        };

        config.add_mapping(Arc::clone(mapping))?;
        debug!(endpoint = %endpoint, mapping = %mapping.name(), "Registered mapping");

        self.by_mapping
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, Arc::clone(&config));
        Ok(config)
    }

    fn registered(&self, key: &MappingKey) -> Option<Arc<SessionConfiguration>> {
        self.by_mapping
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Configuration for an endpoint, if one was created.
    pub fn configuration(&self, endpoint: &DatabaseEndpoint) -> Option<Arc<SessionConfiguration>> {
        self.by_endpoint
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(endpoint)
            .cloned()
    }

    /// Number of configurations created so far.
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}
