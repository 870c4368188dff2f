//! Database endpoint models.
//!
//! A [`DatabaseEndpoint`] names one connectable database: the vendor, the server
//! and the database. It is the unit of connection identity and a cache key.

use crate::error::{DbError, DbResult};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Supported database types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    PostgreSQL,
    /// Includes MariaDB
    MySQL,
    SQLite,
    /// Type names are understood, but no driver is available.
    SqlServer,
}

impl DatabaseType {
    /// Get the display name for this database type.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::PostgreSQL => "PostgreSQL",
            Self::MySQL => "MySQL",
            Self::SQLite => "SQLite",
            Self::SqlServer => "SQL Server",
        }
    }

    /// Get the default port for this database type.
    pub fn default_port(&self) -> Option<u16> {
        match self {
            Self::PostgreSQL => Some(5432),
            Self::MySQL => Some(3306),
            Self::SQLite => None,
            Self::SqlServer => Some(1433),
        }
    }
}

impl std::fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

impl FromStr for DatabaseType {
    type Err = DbError;

    /// Parse the vendor segment of a request path.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Ok(Self::PostgreSQL),
            "mysql" | "mariadb" => Ok(Self::MySQL),
            "sqlite" => Ok(Self::SQLite),
            "sqlserver" | "mssql" => Ok(Self::SqlServer),
            _ => Err(DbError::invalid_argument(format!(
                "'{}' is not a recognized database type.",
                s
            ))),
        }
    }
}

/// Vendor, server and database of one connectable database.
///
/// Equality and hashing cover all three fields. Fields are private so an
/// endpoint can only exist in validated form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct DatabaseEndpoint {
    db_type: DatabaseType,
    server: String,
    database: String,
}

impl DatabaseEndpoint {
    /// Create an endpoint, rejecting blank server or database names.
    pub fn new(
        db_type: DatabaseType,
        server: impl Into<String>,
        database: impl Into<String>,
    ) -> DbResult<Self> {
        let server = server.into();
        let database = database.into();

        if server.trim().is_empty() {
            return Err(DbError::invalid_argument(
                "Cannot connect with an invalid server name.",
            ));
        }
        if database.trim().is_empty() {
            return Err(DbError::invalid_argument(
                "Cannot connect with an invalid database name.",
            ));
        }

        Ok(Self {
            db_type,
            server,
            database,
        })
    }

    /// Create an endpoint for a named instance (`server\instance`).
    pub fn with_instance(
        db_type: DatabaseType,
        server: &str,
        instance: &str,
        database: impl Into<String>,
    ) -> DbResult<Self> {
        if instance.trim().is_empty() {
            return Err(DbError::invalid_argument(
                "Cannot connect with an invalid instance name.",
            ));
        }
        Self::new(db_type, format!("{}\\{}", server, instance), database)
    }

    pub fn db_type(&self) -> DatabaseType {
        self.db_type
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    /// Split the server into host and optional named instance.
    pub fn instance(&self) -> Option<&str> {
        self.server.split_once('\\').map(|(_, instance)| instance)
    }
}

impl std::fmt::Display for DatabaseEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Type:{};ServerName:{};DatabaseName:{};",
            self.db_type, self.server, self.database
        )
    }
}
