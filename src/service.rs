//! The reflection service.
//!
//! [`ReflectService`] wires the core together: reflect the table, synthesize
//! (or reuse) its entity type and mapping, then read every row through a
//! fresh unit of work.

use crate::config::Config;
use crate::db::{
    ConfigurationCache, ConnectionStringFactories, PooledSessionFactoryBuilder, QueryExecutor,
    TableReflector, TypeNameMapper,
};
use crate::error::DbResult;
use crate::models::DatabaseEndpoint;
use crate::synthesis::{Entity, SynthesisCache};
use std::sync::Arc;
use tracing::{debug, info};

/// Shared, process-wide entry point for table reads.
#[derive(Debug)]
pub struct ReflectService {
    mapper: Arc<TypeNameMapper>,
    factories: Arc<ConnectionStringFactories>,
    reflector: TableReflector,
    synthesis: SynthesisCache,
    configurations: Arc<ConfigurationCache>,
    executor: QueryExecutor,
}

impl ReflectService {
    /// Build the service with the built-in vendor strategies.
    pub fn from_config(config: &Config) -> Self {
        let factories = ConnectionStringFactories::with_defaults(
            config.credentials(),
            config.sqlite_dir.clone(),
        );
        Self::new(
            Arc::new(TypeNameMapper::new()),
            Arc::new(factories),
            config,
        )
    }

    pub fn new(
        mapper: Arc<TypeNameMapper>,
        factories: Arc<ConnectionStringFactories>,
        config: &Config,
    ) -> Self {
        let reflector = TableReflector::new(
            Arc::clone(&factories),
            Arc::clone(&mapper),
            config.connect_timeout_duration(),
            config.query_timeout_duration(),
        );
        let configurations = Arc::new(ConfigurationCache::new(Arc::clone(&factories)));
        let executor = QueryExecutor::new(
            Arc::clone(&configurations),
            Arc::new(PooledSessionFactoryBuilder::new(
                config.connect_timeout_duration(),
            )),
            config.query_timeout_duration(),
        );

        info!(
            query_timeout_secs = config.query_timeout,
            connect_timeout_secs = config.connect_timeout,
            "Reflection service initialized"
        );

        Self {
            mapper,
            factories,
            reflector,
            synthesis: SynthesisCache::new(),
            configurations,
            executor,
        }
    }

    /// Read every row of `table` at `endpoint`.
    pub async fn get(&self, endpoint: &DatabaseEndpoint, table: &str) -> DbResult<Vec<Entity>> {
        let descriptor = self.reflector.get_table_definition(endpoint, table).await?;
        let (_, mapping) = self.synthesis.build_types_for_table(&descriptor)?;
        debug!(endpoint = %endpoint, mapping = %mapping.name(), "Resolved mapping");
        self.executor.execute(endpoint, &mapping).await
    }

    pub fn mapper(&self) -> &TypeNameMapper {
        &self.mapper
    }

    pub fn factories(&self) -> &ConnectionStringFactories {
        &self.factories
    }

    pub fn synthesis(&self) -> &SynthesisCache {
        &self.synthesis
    }

    pub fn configurations(&self) -> &ConfigurationCache {
        &self.configurations
    }
}
