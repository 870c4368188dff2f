//! Sessions and the per-request session builder.
//!
//! A unit of work uses one [`SessionBuilder`]. On first [`build`] it looks up
//! the endpoint's [`SessionConfiguration`], builds a session factory from it,
//! opens one session and begins one transaction. Every exit path then runs
//! either [`dispose`] (commit) or [`abort`] (roll back); both release the
//! transaction, the session and the factory in that order, and both are safe
//! to call more than once.
//!
//! The factory, session and transaction sit behind traits so the builder's
//! release sequence can be exercised without a live database.
//!
//! [`build`]: SessionBuilder::build
//! [`dispose`]: SessionBuilder::dispose
//! [`abort`]: SessionBuilder::abort

use crate::db::configuration::{ConfigurationCache, SessionConfiguration};
use crate::db::pool::{DbConnection, DbPool};
use crate::error::{DbError, DbResult};
use crate::models::{DatabaseEndpoint, DatabaseType};
use crate::synthesis::{Entity, MappingDescriptor};
use futures_util::TryStreamExt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Transaction isolation level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadCommitted,
}

impl IsolationLevel {
    pub fn sql_name(&self) -> &'static str {
        match self {
            Self::ReadCommitted => "READ COMMITTED",
        }
    }

    /// Statements that open a transaction at this level.
    ///
    /// SQLite transactions are always serializable, so the level is not sent.
    pub fn begin_statements(&self, db_type: DatabaseType) -> Vec<String> {
        match db_type {
            DatabaseType::PostgreSQL => {
                vec![format!("BEGIN ISOLATION LEVEL {}", self.sql_name())]
            }
            DatabaseType::MySQL => vec![
                format!("SET TRANSACTION ISOLATION LEVEL {}", self.sql_name()),
                "START TRANSACTION".to_string(),
            ],
            DatabaseType::SqlServer => vec![
                format!("SET TRANSACTION ISOLATION LEVEL {}", self.sql_name()),
                "BEGIN TRANSACTION".to_string(),
            ],
            DatabaseType::SQLite => vec!["BEGIN".to_string()],
        }
    }
}

/// State of the builder's transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Active,
    Committed,
    RolledBack,
}

impl TransactionState {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }

    /// Check if the transaction has ended (committed or rolled back).
    pub fn is_ended(&self) -> bool {
        !self.is_active()
    }
}

/// Lifecycle of a [`SessionBuilder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unopened,
    TransactionActive,
    Closed,
}

/// An open session holding at most one transaction.
pub trait Session: Send + 'static {
    fn begin(&mut self, isolation: IsolationLevel) -> impl Future<Output = DbResult<()>> + Send;

    fn commit(&mut self) -> impl Future<Output = DbResult<()>> + Send;

    fn rollback(&mut self) -> impl Future<Output = DbResult<()>> + Send;

    /// Fetch every row of the mapped table, eagerly.
    fn query_all(
        &mut self,
        mapping: &MappingDescriptor,
    ) -> impl Future<Output = DbResult<Vec<Entity>>> + Send;

    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

/// Opens sessions against one configuration.
pub trait SessionFactory: Send + Sync + 'static {
    type Session: Session;

    fn open_session(&self) -> impl Future<Output = DbResult<Self::Session>> + Send;

    fn close(&self) -> impl Future<Output = ()> + Send;
}

/// Builds a session factory from a configuration.
pub trait SessionFactoryBuilder: Send + Sync + 'static {
    type Factory: SessionFactory;

    fn build_session_factory(
        &self,
        configuration: &Arc<SessionConfiguration>,
    ) -> impl Future<Output = DbResult<Self::Factory>> + Send;
}

type SessionOf<B> = <<B as SessionFactoryBuilder>::Factory as SessionFactory>::Session;

/// Scoped owner of one factory, one session and one transaction.
pub struct SessionBuilder<B: SessionFactoryBuilder = PooledSessionFactoryBuilder> {
    configurations: Arc<ConfigurationCache>,
    factory_builder: Arc<B>,
    endpoint: Option<DatabaseEndpoint>,
    factory: Option<B::Factory>,
    session: Option<SessionOf<B>>,
    transaction: Option<TransactionState>,
    state: SessionState,
}

impl<B: SessionFactoryBuilder> SessionBuilder<B> {
    pub fn new(configurations: Arc<ConfigurationCache>, factory_builder: Arc<B>) -> Self {
        Self {
            configurations,
            factory_builder,
            endpoint: None,
            factory: None,
            session: None,
            transaction: None,
            state: SessionState::Unopened,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn transaction_state(&self) -> Option<TransactionState> {
        self.transaction
    }

    /// Get the builder's session, opening it and its transaction on first use.
    ///
    /// Later calls return the same session. The mapping is registered into the
    /// endpoint's configuration either way.
    pub async fn build(
        &mut self,
        endpoint: &DatabaseEndpoint,
        mapping: &Arc<MappingDescriptor>,
    ) -> DbResult<&mut SessionOf<B>> {
        if self.state == SessionState::Closed {
            return Err(DbError::session("Cannot build a session after disposal"));
        }
        if let Some(bound) = &self.endpoint {
            if bound != endpoint {
                return Err(DbError::session(format!(
                    "Session is bound to {} and cannot serve {}",
                    bound, endpoint
                )));
            }
        }

        let configuration = self.configurations.get_configuration_for(endpoint, mapping)?;

        if self.state == SessionState::Unopened {
            self.endpoint = Some(endpoint.clone());

            if self.factory.is_none() {
                let factory = self
                    .factory_builder
                    .build_session_factory(&configuration)
                    .await?;
                self.factory = Some(factory);
            }

            if self.session.is_none() {
                let factory = self
                    .factory
                    .as_ref()
                    .ok_or_else(|| DbError::internal("Session factory missing"))?;
                let session = factory.open_session().await?;
                self.session = Some(session);
            }

            let session = self
                .session
                .as_mut()
                .ok_or_else(|| DbError::internal("Session missing"))?;
            session.begin(IsolationLevel::ReadCommitted).await?;
            self.transaction = Some(TransactionState::Active);
            self.state = SessionState::TransactionActive;
            debug!(endpoint = %endpoint, "Session opened");
        }

        self.session
            .as_mut()
            .ok_or_else(|| DbError::internal("Session missing"))
    }

    /// Commit and release.
    ///
    /// A failed commit is rolled back, unless the transaction already ended,
    /// and the commit error is returned after everything is released.
    pub async fn dispose(&mut self) -> DbResult<()> {
        if self.state == SessionState::Closed {
            return Ok(());
        }

        let mut result = Ok(());
        if let (Some(session), Some(TransactionState::Active)) =
            (self.session.as_mut(), self.transaction)
        {
            match session.commit().await {
                Ok(()) => self.transaction = Some(TransactionState::Committed),
                Err(e) => {
                    warn!(error = %e, "Commit failed, rolling back");
                    if self.transaction.is_some_and(|t| t.is_active()) {
                        if let Err(rollback_err) = session.rollback().await {
                            warn!(error = %rollback_err, "Rollback after failed commit also failed");
                        }
                        self.transaction = Some(TransactionState::RolledBack);
                    }
                    result = Err(e);
                }
            }
        }

        self.release().await;
        result
    }

    /// Roll back and release.
    pub async fn abort(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }

        if let (Some(session), Some(TransactionState::Active)) =
            (self.session.as_mut(), self.transaction)
        {
            if let Err(e) = session.rollback().await {
                warn!(error = %e, "Rollback failed");
            }
            self.transaction = Some(TransactionState::RolledBack);
        }

        self.release().await;
    }

    /// Release the transaction, then the session, then the factory.
    async fn release(&mut self) {
        self.transaction = None;
        if let Some(mut session) = self.session.take() {
            session.close().await;
        }
        if let Some(factory) = self.factory.take() {
            factory.close().await;
        }
        self.state = SessionState::Closed;
        debug!(endpoint = ?self.endpoint.as_ref().map(ToString::to_string), "Session released");
    }
}

impl<B: SessionFactoryBuilder> std::fmt::Debug for SessionBuilder<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionBuilder")
            .field("endpoint", &self.endpoint)
            .field("state", &self.state)
            .field("transaction", &self.transaction)
            .field("has_session", &self.session.is_some())
            .field("has_factory", &self.factory.is_some())
            .finish_non_exhaustive()
    }
}

/// Finalizer path for builders dropped without `dispose` or `abort`.
///
/// Cleanup is spawned on the current runtime. Without a runtime the handles
/// are dropped, which returns the connection to a pool that is itself dropped.
impl<B: SessionFactoryBuilder> Drop for SessionBuilder<B> {
    fn drop(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        let session = self.session.take();
        let factory = self.factory.take();
        if session.is_none() && factory.is_none() {
            return;
        }

        let active = self.transaction.is_some_and(|t| t.is_active());
        let endpoint = self.endpoint.as_ref().map(ToString::to_string);
        self.state = SessionState::Closed;

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Some(mut session) = session {
                        if active {
                            if let Err(e) = session.rollback().await {
                                warn!(error = %e, "Rollback during drop failed");
                            }
                        }
                        session.close().await;
                    }
                    if let Some(factory) = factory {
                        factory.close().await;
                    }
                    warn!(
                        endpoint = ?endpoint,
                        "Session released via Drop - call dispose() or abort() explicitly"
                    );
                });
            }
            Err(_) => {
                warn!(endpoint = ?endpoint, "Session dropped outside a runtime");
            }
        }
    }
}

// =============================================================================
// Pooled Sessions
// =============================================================================

/// Builds one single-connection pool per unit of work.
#[derive(Debug, Clone)]
pub struct PooledSessionFactoryBuilder {
    connect_timeout: Duration,
}

impl PooledSessionFactoryBuilder {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl SessionFactoryBuilder for PooledSessionFactoryBuilder {
    type Factory = PooledSessionFactory;

    async fn build_session_factory(
        &self,
        configuration: &Arc<SessionConfiguration>,
    ) -> DbResult<PooledSessionFactory> {
        let pool = DbPool::connect_single(
            configuration.endpoint().db_type(),
            configuration.connection_string(),
            self.connect_timeout,
        )
        .await?;
        Ok(PooledSessionFactory {
            pool,
            configuration: Arc::clone(configuration),
        })
    }
}

#[derive(Debug)]
pub struct PooledSessionFactory {
    pool: DbPool,
    configuration: Arc<SessionConfiguration>,
}

impl SessionFactory for PooledSessionFactory {
    type Session = PooledSession;

    async fn open_session(&self) -> DbResult<PooledSession> {
        let conn = self.pool.acquire().await?;
        Ok(PooledSession {
            conn: Some(conn),
            configuration: Arc::clone(&self.configuration),
        })
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

/// Session over one pooled connection; transaction control is issued as SQL.
#[derive(Debug)]
pub struct PooledSession {
    conn: Option<DbConnection>,
    configuration: Arc<SessionConfiguration>,
}

impl PooledSession {
    fn connection(&mut self) -> DbResult<&mut DbConnection> {
        self.conn
            .as_mut()
            .ok_or_else(|| DbError::session("Session is closed"))
    }

    async fn execute(&mut self, sql: &str) -> DbResult<()> {
        let conn = self.connection()?;
        match conn {
            DbConnection::MySql(c) => {
                sqlx::Executor::execute(&mut **c, sql).await?;
            }
            DbConnection::Postgres(c) => {
                sqlx::Executor::execute(&mut **c, sql).await?;
            }
            DbConnection::SQLite(c) => {
                sqlx::Executor::execute(&mut **c, sql).await?;
            }
        }
        Ok(())
    }
}

impl Session for PooledSession {
    async fn begin(&mut self, isolation: IsolationLevel) -> DbResult<()> {
        let db_type = self.connection()?.db_type();
        for statement in isolation.begin_statements(db_type) {
            self.execute(&statement).await?;
        }
        Ok(())
    }

    async fn commit(&mut self) -> DbResult<()> {
        self.execute("COMMIT").await
    }

    async fn rollback(&mut self) -> DbResult<()> {
        self.execute("ROLLBACK").await
    }

    async fn query_all(&mut self, mapping: &MappingDescriptor) -> DbResult<Vec<Entity>> {
        if self.configuration.mapping(mapping.name()).is_none() {
            return Err(DbError::configuration(format!(
                "Mapping '{}' is not registered for {}",
                mapping.name(),
                self.configuration.endpoint()
            )));
        }

        let conn = self.connection()?;
        let sql = mapping.select_statement(conn.db_type());
        debug!(sql = %sql, "Fetching all rows");

        match conn {
            DbConnection::MySql(c) => {
                let rows: Vec<_> = sqlx::query(&sql).fetch(&mut **c).try_collect().await?;
                rows.iter().map(|row| mapping.materialize(row)).collect()
            }
            DbConnection::Postgres(c) => {
                let rows: Vec<_> = sqlx::query(&sql).fetch(&mut **c).try_collect().await?;
                rows.iter().map(|row| mapping.materialize(row)).collect()
            }
            DbConnection::SQLite(c) => {
                let rows: Vec<_> = sqlx::query(&sql).fetch(&mut **c).try_collect().await?;
                rows.iter().map(|row| mapping.materialize(row)).collect()
            }
        }
    }

    async fn close(&mut self) {
        // Dropping the checkout returns the connection to its pool
        self.conn.take();
    }
}

// =============================================================================
// Test Doubles
// =============================================================================

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::db::types::RowToValues;
    use crate::models::{Value, ValueKind};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Call counters shared by a fake builder and everything it creates.
    #[derive(Debug, Clone, Default)]
    pub struct Counters {
        pub factories_built: Arc<AtomicUsize>,
        pub sessions_opened: Arc<AtomicUsize>,
        pub begins: Arc<AtomicUsize>,
        pub commits: Arc<AtomicUsize>,
        pub rollbacks: Arc<AtomicUsize>,
        pub sessions_closed: Arc<AtomicUsize>,
        pub factories_closed: Arc<AtomicUsize>,
    }

    impl Counters {
        pub fn get(counter: &Arc<AtomicUsize>) -> usize {
            counter.load(Ordering::SeqCst)
        }

        fn bump(counter: &Arc<AtomicUsize>) {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Behaviour of the fake session.
    #[derive(Debug, Clone, Default)]
    pub struct Script {
        pub fail_commit: bool,
        pub fail_query: bool,
        pub query_delay: Option<Duration>,
        /// Rows in select-column order.
        pub rows: Vec<Vec<Value>>,
    }

    #[derive(Debug, Clone, Default)]
    pub struct FakeFactoryBuilder {
        pub counters: Counters,
        pub script: Script,
    }

    #[derive(Debug)]
    pub struct FakeFactory {
        counters: Counters,
        script: Script,
    }

    #[derive(Debug)]
    pub struct FakeSession {
        counters: Counters,
        script: Script,
    }

    struct FakeRow<'a>(&'a [Value]);

    impl RowToValues for FakeRow<'_> {
        fn decode_value(&self, idx: usize, _kind: ValueKind) -> DbResult<Value> {
            Ok(self.0[idx].clone())
        }
    }

    impl SessionFactoryBuilder for FakeFactoryBuilder {
        type Factory = FakeFactory;

        async fn build_session_factory(
            &self,
            _configuration: &Arc<SessionConfiguration>,
        ) -> DbResult<FakeFactory> {
            Counters::bump(&self.counters.factories_built);
            Ok(FakeFactory {
                counters: self.counters.clone(),
                script: self.script.clone(),
            })
        }
    }

    impl SessionFactory for FakeFactory {
        type Session = FakeSession;

        async fn open_session(&self) -> DbResult<FakeSession> {
            Counters::bump(&self.counters.sessions_opened);
            Ok(FakeSession {
                counters: self.counters.clone(),
                script: self.script.clone(),
            })
        }

        async fn close(&self) {
            Counters::bump(&self.counters.factories_closed);
        }
    }

    impl Session for FakeSession {
        async fn begin(&mut self, _isolation: IsolationLevel) -> DbResult<()> {
            Counters::bump(&self.counters.begins);
            Ok(())
        }

        async fn commit(&mut self) -> DbResult<()> {
            Counters::bump(&self.counters.commits);
            if self.script.fail_commit {
                return Err(DbError::database(
                    "could not serialize access",
                    Some("40001".to_string()),
                    "Retry the request",
                ));
            }
            Ok(())
        }

        async fn rollback(&mut self) -> DbResult<()> {
            Counters::bump(&self.counters.rollbacks);
            Ok(())
        }

        async fn query_all(&mut self, mapping: &MappingDescriptor) -> DbResult<Vec<Entity>> {
            if let Some(delay) = self.script.query_delay {
                tokio::time::sleep(delay).await;
            }
            if self.script.fail_query {
                return Err(DbError::database("relation does not exist", None, "Check the table"));
            }
            self.script
                .rows
                .iter()
                .map(|row| mapping.materialize(&FakeRow(row)))
                .collect()
        }

        async fn close(&mut self) {
            Counters::bump(&self.counters.sessions_closed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{Counters, FakeFactoryBuilder, Script};
    use super::*;
    use crate::db::connection_string::ConnectionStringFactories;
    use crate::models::{CanonicalType, ColumnDescriptor, TableDescriptor, ValueKind};
    use crate::synthesis::SynthesisCache;

    fn endpoint() -> DatabaseEndpoint {
        DatabaseEndpoint::new(DatabaseType::SQLite, "localhost", "shop.db").unwrap()
    }

    fn mapping() -> Arc<MappingDescriptor> {
        let table = TableDescriptor::new(
            "Orders",
            vec![
                ColumnDescriptor::new("OrderId", CanonicalType::required(ValueKind::Int32))
                    .with_primary_key(true),
            ],
        );
        SynthesisCache::new().build_types_for_table(&table).unwrap().1
    }

    fn builder(script: Script) -> (SessionBuilder<FakeFactoryBuilder>, Counters) {
        let factories = ConnectionStringFactories::with_defaults(Default::default(), "/tmp");
        let configurations = Arc::new(ConfigurationCache::new(Arc::new(factories)));
        let fake = FakeFactoryBuilder {
            counters: Counters::default(),
            script,
        };
        let counters = fake.counters.clone();
        (SessionBuilder::new(configurations, Arc::new(fake)), counters)
    }

    #[test]
    fn test_begin_statements() {
        let level = IsolationLevel::ReadCommitted;
        assert_eq!(
            level.begin_statements(DatabaseType::PostgreSQL),
            vec!["BEGIN ISOLATION LEVEL READ COMMITTED"]
        );
        assert_eq!(
            level.begin_statements(DatabaseType::MySQL),
            vec![
                "SET TRANSACTION ISOLATION LEVEL READ COMMITTED",
                "START TRANSACTION"
            ]
        );
        assert_eq!(level.begin_statements(DatabaseType::SQLite), vec!["BEGIN"]);
    }

    #[test]
    fn test_transaction_state() {
        assert!(TransactionState::Active.is_active());
        assert!(TransactionState::Committed.is_ended());
        assert!(TransactionState::RolledBack.is_ended());
    }

    #[tokio::test]
    async fn test_build_opens_once() {
        let (mut builder, counters) = builder(Script::default());
        let mapping = mapping();

        builder.build(&endpoint(), &mapping).await.unwrap();
        builder.build(&endpoint(), &mapping).await.unwrap();

        assert_eq!(builder.state(), SessionState::TransactionActive);
        assert_eq!(Counters::get(&counters.factories_built), 1);
        assert_eq!(Counters::get(&counters.sessions_opened), 1);
        assert_eq!(Counters::get(&counters.begins), 1);
        builder.dispose().await.unwrap();
    }

    #[tokio::test]
    async fn test_dispose_commits_and_releases_in_order() {
        let (mut builder, counters) = builder(Script::default());
        builder.build(&endpoint(), &mapping()).await.unwrap();

        builder.dispose().await.unwrap();

        assert_eq!(builder.state(), SessionState::Closed);
        assert_eq!(Counters::get(&counters.commits), 1);
        assert_eq!(Counters::get(&counters.rollbacks), 0);
        assert_eq!(Counters::get(&counters.sessions_closed), 1);
        assert_eq!(Counters::get(&counters.factories_closed), 1);
    }

    #[tokio::test]
    async fn test_commit_failure_rolls_back_and_reraises() {
        let (mut builder, counters) = builder(Script {
            fail_commit: true,
            ..Script::default()
        });
        builder.build(&endpoint(), &mapping()).await.unwrap();

        let err = builder.dispose().await.unwrap_err();

        assert!(matches!(
            err,
            DbError::Database { ref sql_state, .. } if sql_state.as_deref() == Some("40001")
        ));
        assert_eq!(Counters::get(&counters.rollbacks), 1);
        assert_eq!(Counters::get(&counters.sessions_closed), 1);
        assert_eq!(Counters::get(&counters.factories_closed), 1);

        // Second dispose is a no-op
        builder.dispose().await.unwrap();
        assert_eq!(Counters::get(&counters.rollbacks), 1);
        assert_eq!(Counters::get(&counters.sessions_closed), 1);
        assert_eq!(Counters::get(&counters.factories_closed), 1);
    }

    #[tokio::test]
    async fn test_abort_rolls_back() {
        let (mut builder, counters) = builder(Script::default());
        builder.build(&endpoint(), &mapping()).await.unwrap();

        builder.abort().await;
        builder.abort().await;
        builder.dispose().await.unwrap();

        assert_eq!(Counters::get(&counters.commits), 0);
        assert_eq!(Counters::get(&counters.rollbacks), 1);
        assert_eq!(Counters::get(&counters.sessions_closed), 1);
        assert_eq!(Counters::get(&counters.factories_closed), 1);
    }

    #[tokio::test]
    async fn test_dispose_without_build_is_noop() {
        let (mut builder, counters) = builder(Script::default());
        builder.dispose().await.unwrap();
        assert_eq!(builder.state(), SessionState::Closed);
        assert_eq!(Counters::get(&counters.sessions_closed), 0);
        assert_eq!(Counters::get(&counters.factories_closed), 0);
    }

    #[tokio::test]
    async fn test_build_after_dispose_fails() {
        let (mut builder, _) = builder(Script::default());
        builder.dispose().await.unwrap();
        let err = builder.build(&endpoint(), &mapping()).await.unwrap_err();
        assert!(matches!(err, DbError::Session { .. }));
    }

    #[tokio::test]
    async fn test_build_rejects_other_endpoint() {
        let (mut builder, _) = builder(Script::default());
        let mapping = mapping();
        builder.build(&endpoint(), &mapping).await.unwrap();

        let other = DatabaseEndpoint::new(DatabaseType::SQLite, "localhost", "other.db").unwrap();
        let err = builder.build(&other, &mapping).await.unwrap_err();
        assert!(matches!(err, DbError::Session { .. }));
        builder.abort().await;
    }

    #[tokio::test]
    async fn test_drop_releases_via_runtime() {
        let (mut builder, counters) = builder(Script::default());
        builder.build(&endpoint(), &mapping()).await.unwrap();

        drop(builder);
        for _ in 0..100 {
            if Counters::get(&counters.factories_closed) == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }

        assert_eq!(Counters::get(&counters.rollbacks), 1);
        assert_eq!(Counters::get(&counters.sessions_closed), 1);
        assert_eq!(Counters::get(&counters.factories_closed), 1);
    }
}
