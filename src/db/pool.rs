//! Driver handles.
//!
//! Database-specific pools and connections (MySqlPool, PgPool, SqlitePool) are
//! wrapped in enums so the rest of the crate can hold one value regardless of
//! vendor while still getting full per-driver type support.

use crate::error::{DbError, DbResult};
use crate::models::DatabaseType;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection, MySqlPoolOptions};
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgConnectOptions, PgConnection, PgPoolOptions};
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqlitePoolOptions};
use sqlx::{Connection, MySql, MySqlPool, PgPool, Postgres, Sqlite, SqlitePool};
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

/// Database-specific connection pool (avoids AnyPool limitations).
#[derive(Debug, Clone)]
pub enum DbPool {
    MySql(MySqlPool),
    Postgres(PgPool),
    SQLite(SqlitePool),
}

impl DbPool {
    /// Open a pool holding at most one connection.
    ///
    /// The first connection is established eagerly so that connection failures
    /// surface here instead of at the first query.
    pub async fn connect_single(
        db_type: DatabaseType,
        connection_string: &str,
        connect_timeout: Duration,
    ) -> DbResult<Self> {
        let pool = match db_type {
            DatabaseType::MySQL => DbPool::MySql(
                MySqlPoolOptions::new()
                    .max_connections(1)
                    .acquire_timeout(connect_timeout)
                    .connect_with(mysql_options(connection_string)?)
                    .await
                    .map_err(|e| connect_error(db_type, e))?,
            ),
            DatabaseType::PostgreSQL => DbPool::Postgres(
                PgPoolOptions::new()
                    .max_connections(1)
                    .acquire_timeout(connect_timeout)
                    .connect_with(postgres_options(connection_string)?)
                    .await
                    .map_err(|e| connect_error(db_type, e))?,
            ),
            DatabaseType::SQLite => DbPool::SQLite(
                SqlitePoolOptions::new()
                    .max_connections(1)
                    .acquire_timeout(connect_timeout)
                    .connect_with(sqlite_options(connection_string)?)
                    .await
                    .map_err(|e| connect_error(db_type, e))?,
            ),
            DatabaseType::SqlServer => return Err(no_driver(db_type)),
        };
        debug!(db_type = %db_type, "Opened single-connection pool");
        Ok(pool)
    }

    /// Check out the pool's connection.
    pub async fn acquire(&self) -> DbResult<DbConnection> {
        Ok(impl_db_dispatch!(DbPool, self, {
            MySql(p) => DbConnection::MySql(
                p.acquire().await.map_err(|e| acquire_error(e, p.options().get_acquire_timeout()))?,
            ),
            Postgres(p) => DbConnection::Postgres(
                p.acquire().await.map_err(|e| acquire_error(e, p.options().get_acquire_timeout()))?,
            ),
            SQLite(p) => DbConnection::SQLite(
                p.acquire().await.map_err(|e| acquire_error(e, p.options().get_acquire_timeout()))?,
            ),
        }))
    }

    /// Close the connection pool.
    pub async fn close(&self) {
        impl_db_dispatch!(DbPool, self, {
            MySql(p) => p.close().await,
            Postgres(p) => p.close().await,
            SQLite(p) => p.close().await,
        })
    }

    /// Get the database type for this pool.
    pub fn db_type(&self) -> DatabaseType {
        impl_db_dispatch!(DbPool, self, {
            MySql(_) => DatabaseType::MySQL,
            Postgres(_) => DatabaseType::PostgreSQL,
            SQLite(_) => DatabaseType::SQLite,
        })
    }
}

/// A connection checked out of a [`DbPool`].
#[derive(Debug)]
pub enum DbConnection {
    MySql(PoolConnection<MySql>),
    Postgres(PoolConnection<Postgres>),
    SQLite(PoolConnection<Sqlite>),
}

impl DbConnection {
    pub fn db_type(&self) -> DatabaseType {
        impl_db_dispatch!(DbConnection, self, {
            MySql(_) => DatabaseType::MySQL,
            Postgres(_) => DatabaseType::PostgreSQL,
            SQLite(_) => DatabaseType::SQLite,
        })
    }
}

/// A dedicated connection outside any pool, used for catalog reads.
#[derive(Debug)]
pub enum DirectConnection {
    MySql(MySqlConnection),
    Postgres(PgConnection),
    SQLite(SqliteConnection),
}

impl DirectConnection {
    /// Open a single connection, failing after `connect_timeout`.
    pub async fn open(
        db_type: DatabaseType,
        connection_string: &str,
        connect_timeout: Duration,
    ) -> DbResult<Self> {
        let connect = async {
            let conn = match db_type {
                DatabaseType::MySQL => DirectConnection::MySql(
                    MySqlConnection::connect_with(&mysql_options(connection_string)?).await?,
                ),
                DatabaseType::PostgreSQL => DirectConnection::Postgres(
                    PgConnection::connect_with(&postgres_options(connection_string)?).await?,
                ),
                DatabaseType::SQLite => DirectConnection::SQLite(
                    SqliteConnection::connect_with(&sqlite_options(connection_string)?).await?,
                ),
                DatabaseType::SqlServer => return Ok(None),
            };
            Ok::<_, sqlx::Error>(Some(conn))
        };

        match tokio::time::timeout(connect_timeout, connect).await {
            Ok(Ok(Some(conn))) => Ok(conn),
            Ok(Ok(None)) => Err(no_driver(db_type)),
            Ok(Err(e)) => Err(connect_error(db_type, e)),
            Err(_) => Err(DbError::timeout("connect", connect_timeout)),
        }
    }

    /// Close the connection, logging rather than failing on error.
    pub async fn close(self) {
        let result = impl_db_dispatch!(DirectConnection, self, {
            MySql(c) => c.close().await,
            Postgres(c) => c.close().await,
            SQLite(c) => c.close().await,
        });
        if let Err(e) = result {
            debug!(error = %e, "Error while closing connection");
        }
    }
}

fn mysql_options(connection_string: &str) -> Result<MySqlConnectOptions, sqlx::Error> {
    Ok(MySqlConnectOptions::from_str(connection_string)?.charset("utf8mb4"))
}

fn postgres_options(connection_string: &str) -> Result<PgConnectOptions, sqlx::Error> {
    PgConnectOptions::from_str(connection_string)
}

/// SQLite databases are only ever read.
fn sqlite_options(connection_string: &str) -> Result<SqliteConnectOptions, sqlx::Error> {
    Ok(SqliteConnectOptions::from_str(connection_string)?
        .read_only(true)
        .create_if_missing(false))
}

fn no_driver(db_type: DatabaseType) -> DbError {
    DbError::configuration(format!(
        "No session factory defined for database type '{}'.",
        db_type
    ))
}

/// Map a failed checkout, reporting the pool's own acquire limit on timeout.
fn acquire_error(error: sqlx::Error, acquire_timeout: Duration) -> DbError {
    match error {
        sqlx::Error::PoolTimedOut => DbError::timeout("connection pool acquire", acquire_timeout),
        other => other.into(),
    }
}

fn connect_error(db_type: DatabaseType, error: sqlx::Error) -> DbError {
    DbError::connection(
        format!("Failed to connect: {}", error),
        connection_suggestion(db_type, &error),
    )
}

/// Generate a helpful suggestion for connection errors.
pub fn connection_suggestion(db_type: DatabaseType, error: &sqlx::Error) -> String {
    let error_str = error.to_string().to_lowercase();

    if error_str.contains("connection refused") {
        return format!(
            "Check that the {} server is running and accessible",
            db_type
        );
    }

    if error_str.contains("authentication") || error_str.contains("password") {
        return "Verify the configured database user and password".to_string();
    }

    if error_str.contains("does not exist")
        || error_str.contains("unknown database")
        || error_str.contains("unable to open database file")
    {
        return "Check that the database name exists".to_string();
    }

    if error_str.contains("tls") || error_str.contains("ssl") {
        return "Check TLS/SSL configuration or try disabling it".to_string();
    }

    match db_type {
        DatabaseType::PostgreSQL | DatabaseType::MySQL | DatabaseType::SqlServer => format!(
            "Check that the server name is reachable (host or host:port, default port {})",
            db_type.default_port().unwrap_or_default()
        ),
        DatabaseType::SQLite => {
            "Check that the database file exists in the configured SQLite directory".to_string()
        }
    }
}
