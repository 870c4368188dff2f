//! Database access layer.
//!
//! - Connection strings and driver handles
//! - Table reflection through the vendor catalogs
//! - Vendor type-name mapping and row decoding
//! - Session configurations, sessions and query execution

pub mod configuration;
pub mod connection_string;
pub mod executor;
#[macro_use]
pub mod macros;
pub mod pool;
pub mod schema;
pub mod session;
pub mod types;

pub use configuration::{ConfigurationCache, SessionConfiguration};
pub use connection_string::{
    ConnectionStringFactories, ConnectionStringFactory, Credentials, ServerUrlFactory,
    SqliteFileFactory,
};
pub use executor::QueryExecutor;
pub use pool::{DbConnection, DbPool, DirectConnection};
pub use schema::TableReflector;
pub use session::{
    IsolationLevel, PooledSessionFactoryBuilder, Session, SessionBuilder, SessionFactory,
    SessionFactoryBuilder, SessionState, TransactionState,
};
pub use types::TypeNameMapper;
