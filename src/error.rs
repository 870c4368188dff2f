//! Error types for the reflection server.
//!
//! All failures surface through [`DbError`], built with `thiserror`. Variants
//! carry enough context for the HTTP boundary to choose a status code and, where
//! it helps, a suggestion for the caller.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    /// A required input was blank or malformed.
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    #[error(
        "Error when querying database '{database}' on server '{server}'. Either the table '{table}' does not exist, or it has no columns."
    )]
    TableNotFound {
        table: String,
        database: String,
        server: String,
    },

    #[error("Type '{type_name}' is not a recognized {vendor} type.")]
    UnrecognizedType { type_name: String, vendor: String },

    #[error("Schema error: {message} (object: {object})")]
    Schema { message: String, object: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("Database error: {message}")]
    Database {
        message: String,
        /// e.g., "42P01" for undefined table
        sql_state: Option<String>,
        suggestion: String,
    },

    #[error("Session error: {message}")]
    Session { message: String },

    #[error("Timeout: {operation} exceeded {limit:?}")]
    Timeout { operation: String, limit: Duration },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DbError {
    /// Create an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Create a table lookup error.
    pub fn table_not_found(
        table: impl Into<String>,
        database: impl Into<String>,
        server: impl Into<String>,
    ) -> Self {
        Self::TableNotFound {
            table: table.into(),
            database: database.into(),
            server: server.into(),
        }
    }

    /// Create an unrecognized type error.
    pub fn unrecognized_type(type_name: impl Into<String>, vendor: impl Into<String>) -> Self {
        Self::UnrecognizedType {
            type_name: type_name.into(),
            vendor: vendor.into(),
        }
    }

    /// Create a schema error.
    pub fn schema(message: impl Into<String>, object: impl Into<String>) -> Self {
        Self::Schema {
            message: message.into(),
            object: object.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a database error with optional SQL state.
    pub fn database(
        message: impl Into<String>,
        sql_state: Option<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::Database {
            message: message.into(),
            sql_state,
            suggestion: suggestion.into(),
        }
    }

    pub fn session(message: impl Into<String>) -> Self {
        Self::Session {
            message: message.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, limit: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            limit,
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::Database { suggestion, .. } => Some(suggestion),
            Self::UnrecognizedType { .. } => {
                Some("Extend the type name mapping for this vendor to cover the column type")
            }
            Self::Schema { .. } => Some("Only tables with a primary key can be reflected"),
            _ => None,
        }
    }

    /// HTTP status the request boundary answers with for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidArgument { .. } => StatusCode::BAD_REQUEST,
            Self::TableNotFound { .. } => StatusCode::NOT_FOUND,
            Self::UnrecognizedType { .. } | Self::Schema { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            Self::Configuration { .. } => StatusCode::NOT_IMPLEMENTED,
            Self::Connection { .. } => StatusCode::BAD_GATEWAY,
            Self::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::Database { .. } | Self::Session { .. } | Self::Internal { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

/// Convert sqlx errors to DbError.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => DbError::connection(
                msg.to_string(),
                "Check the connection string format and credentials",
            ),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                DbError::database(
                    db_err.message(),
                    code,
                    "Check that the referenced objects exist and are readable",
                )
            }
            sqlx::Error::RowNotFound => DbError::database(
                "No rows returned",
                None,
                "Verify the table still exists",
            ),
            // The limit is only known to the pool; `DbPool::acquire` reports it
            sqlx::Error::PoolTimedOut => DbError::connection(
                "Timed out waiting for a pooled connection",
                "Increase --connect-timeout or check database server load",
            ),
            sqlx::Error::PoolClosed => {
                DbError::connection("Connection pool is closed", "Retry the request")
            }
            sqlx::Error::Io(io_err) => DbError::connection(
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => DbError::connection(
                format!("TLS error: {}", tls_err),
                "Verify TLS configuration and certificates",
            ),
            sqlx::Error::Protocol(msg) => DbError::connection(
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            sqlx::Error::TypeNotFound { type_name } => DbError::schema(
                format!("Type not found: {}", type_name),
                type_name.to_string(),
            ),
            sqlx::Error::ColumnNotFound(col) => {
                DbError::schema(format!("Column not found: {}", col), col.to_string())
            }
            sqlx::Error::ColumnIndexOutOfBounds { index, len } => DbError::internal(format!(
                "Column index {} out of bounds (len: {})",
                index, len
            )),
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::internal(format!("Failed to decode column {}: {}", index, source))
            }
            sqlx::Error::Decode(source) => DbError::internal(format!("Decode error: {}", source)),
            sqlx::Error::WorkerCrashed => DbError::internal("Database worker crashed"),
            _ => DbError::internal(format!("Unknown database error: {}", err)),
        }
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;

/// Render the error as a JSON body with the matching status code.
impl IntoResponse for DbError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let mut body = serde_json::json!({ "error": self.to_string() });
        if let Some(suggestion) = self.suggestion() {
            body["suggestion"] = serde_json::Value::String(suggestion.to_string());
        }
        if let Self::Database {
            sql_state: Some(code),
            ..
        } = &self
        {
            body["sql_state"] = serde_json::Value::String(code.clone());
        }
        (status, Json(body)).into_response()
    }
}
