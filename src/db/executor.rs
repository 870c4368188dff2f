//! Query execution.
//!
//! Each call is one unit of work: a fresh [`SessionBuilder`] is opened, every
//! row of the mapped table is fetched into memory, and the builder is disposed
//! before the rows are returned. Failures and timeouts abort the unit of work
//! instead.

use crate::db::configuration::ConfigurationCache;
use crate::db::session::{PooledSessionFactoryBuilder, Session, SessionBuilder, SessionFactoryBuilder};
use crate::error::{DbError, DbResult};
use crate::models::DatabaseEndpoint;
use crate::synthesis::{Entity, MappingDescriptor};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, warn};

/// Runs unfiltered reads of mapped tables.
pub struct QueryExecutor<B: SessionFactoryBuilder = PooledSessionFactoryBuilder> {
    configurations: Arc<ConfigurationCache>,
    factory_builder: Arc<B>,
    timeout: Duration,
}

impl<B: SessionFactoryBuilder> QueryExecutor<B> {
    pub fn new(
        configurations: Arc<ConfigurationCache>,
        factory_builder: Arc<B>,
        timeout: Duration,
    ) -> Self {
        Self {
            configurations,
            factory_builder,
            timeout,
        }
    }

    pub fn configurations(&self) -> &Arc<ConfigurationCache> {
        &self.configurations
    }

    /// Fetch every row of the mapped table as entities.
    pub async fn execute(
        &self,
        endpoint: &DatabaseEndpoint,
        mapping: &Arc<MappingDescriptor>,
    ) -> DbResult<Vec<Entity>> {
        let start = Instant::now();
        let mut builder = SessionBuilder::new(
            Arc::clone(&self.configurations),
            Arc::clone(&self.factory_builder),
        );

        let fetched = timeout(self.timeout, async {
            let session = builder.build(endpoint, mapping).await?;
            session.query_all(mapping).await
        })
        .await;

        match fetched {
            Ok(Ok(entities)) => {
                builder.dispose().await?;
                debug!(
                    endpoint = %endpoint,
                    table = %mapping.table(),
                    rows = entities.len(),
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Query completed"
                );
                Ok(entities)
            }
            Ok(Err(e)) => {
                builder.abort().await;
                Err(e)
            }
            Err(_) => {
                warn!(
                    endpoint = %endpoint,
                    table = %mapping.table(),
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Query timed out"
                );
                builder.abort().await;
                Err(DbError::timeout(
                    format!("query of '{}'", mapping.table()),
                    self.timeout,
                ))
            }
        }
    }
}

impl<B: SessionFactoryBuilder> std::fmt::Debug for QueryExecutor<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryExecutor")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connection_string::ConnectionStringFactories;
    use crate::db::session::testing::{Counters, FakeFactoryBuilder, Script};
    use crate::models::{
        CanonicalType, ColumnDescriptor, DatabaseType, TableDescriptor, Value, ValueKind,
    };
    use crate::synthesis::SynthesisCache;

    fn mapping() -> Arc<MappingDescriptor> {
        let table = TableDescriptor::new(
            "Customers",
            vec![
                ColumnDescriptor::new("Id", CanonicalType::required(ValueKind::Int32))
                    .with_primary_key(true),
                ColumnDescriptor::new("Name", CanonicalType::optional(ValueKind::String)),
            ],
        );
        SynthesisCache::new().build_types_for_table(&table).unwrap().1
    }

    fn endpoint() -> DatabaseEndpoint {
        DatabaseEndpoint::new(DatabaseType::SQLite, "localhost", "crm.db").unwrap()
    }

    fn executor(script: Script, timeout: Duration) -> (QueryExecutor<FakeFactoryBuilder>, Counters) {
        let factories = ConnectionStringFactories::with_defaults(Default::default(), "/tmp");
        let configurations = Arc::new(ConfigurationCache::new(Arc::new(factories)));
        let fake = FakeFactoryBuilder {
            counters: Counters::default(),
            script,
        };
        let counters = fake.counters.clone();
        (QueryExecutor::new(configurations, Arc::new(fake), timeout), counters)
    }

    #[tokio::test]
    async fn test_execute_returns_materialized_rows() {
        let script = Script {
            rows: vec![
                vec![Value::Int32(1), Value::String("Ada".to_string())],
                vec![Value::Int32(2), Value::Null],
            ],
            ..Script::default()
        };
        let (executor, counters) = executor(script, Duration::from_secs(5));

        let rows = executor.execute(&endpoint(), &mapping()).await.unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("Name"), Some(&Value::String("Ada".to_string())));
        assert_eq!(rows[1].get("Name"), Some(&Value::Null));
        assert_eq!(Counters::get(&counters.commits), 1);
        assert_eq!(Counters::get(&counters.factories_closed), 1);
    }

    #[tokio::test]
    async fn test_execute_empty_table() {
        let (executor, counters) = executor(Script::default(), Duration::from_secs(5));
        let rows = executor.execute(&endpoint(), &mapping()).await.unwrap();
        assert!(rows.is_empty());
        assert_eq!(Counters::get(&counters.sessions_closed), 1);
    }

    #[tokio::test]
    async fn test_query_failure_aborts() {
        let script = Script {
            fail_query: true,
            ..Script::default()
        };
        let (executor, counters) = executor(script, Duration::from_secs(5));

        let err = executor.execute(&endpoint(), &mapping()).await.unwrap_err();

        assert!(matches!(err, DbError::Database { .. }));
        assert_eq!(Counters::get(&counters.commits), 0);
        assert_eq!(Counters::get(&counters.rollbacks), 1);
        assert_eq!(Counters::get(&counters.factories_closed), 1);
    }

    #[tokio::test]
    async fn test_commit_failure_is_returned() {
        let script = Script {
            fail_commit: true,
            rows: vec![vec![Value::Int32(1), Value::Null]],
            ..Script::default()
        };
        let (executor, counters) = executor(script, Duration::from_secs(5));

        let err = executor.execute(&endpoint(), &mapping()).await.unwrap_err();

        assert!(matches!(err, DbError::Database { .. }));
        assert_eq!(Counters::get(&counters.rollbacks), 1);
        assert_eq!(Counters::get(&counters.sessions_closed), 1);
    }

    #[tokio::test]
    async fn test_timeout_aborts() {
        let script = Script {
            query_delay: Some(Duration::from_secs(10)),
            ..Script::default()
        };
        let (executor, counters) = executor(script, Duration::from_millis(20));

        let err = executor.execute(&endpoint(), &mapping()).await.unwrap_err();

        assert!(matches!(err, DbError::Timeout { .. }));
        assert!(err.to_string().contains("exceeded 20ms"), "{}", err);
        assert_eq!(Counters::get(&counters.rollbacks), 1);
        assert_eq!(Counters::get(&counters.factories_closed), 1);
    }

    #[tokio::test]
    async fn test_repeated_execution_reuses_configuration() {
        let (executor, counters) = executor(Script::default(), Duration::from_secs(5));
        let mapping = mapping();

        executor.execute(&endpoint(), &mapping).await.unwrap();
        executor.execute(&endpoint(), &mapping).await.unwrap();

        assert_eq!(executor.configurations().created(), 1);
        assert_eq!(Counters::get(&counters.factories_built), 2);
        assert_eq!(Counters::get(&counters.factories_closed), 2);
    }
}
