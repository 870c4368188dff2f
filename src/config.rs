//! Configuration handling for the reflection server.
//!
//! All settings come from CLI arguments with environment-variable fallbacks.

use crate::db::Credentials;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_HTTP_HOST: &str = "127.0.0.1";
pub const DEFAULT_HTTP_PORT: u16 = 8080;
pub const DEFAULT_QUERY_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_SERVER: &str = "localhost";
pub const DEFAULT_SQLITE_DIR: &str = ".";
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Configuration for the reflection server.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "db-reflect-server",
    about = "HTTP server that reflects database tables and returns their rows as JSON",
    version,
    author
)]
pub struct Config {
    /// HTTP host to bind to
    #[arg(long, default_value = DEFAULT_HTTP_HOST, env = "REFLECT_HTTP_HOST")]
    pub http_host: String,

    /// HTTP port to bind to
    #[arg(long, default_value_t = DEFAULT_HTTP_PORT, env = "REFLECT_HTTP_PORT")]
    pub http_port: u16,

    /// Timeout in seconds for catalog queries and table reads
    #[arg(
        long,
        default_value_t = DEFAULT_QUERY_TIMEOUT_SECS,
        env = "REFLECT_QUERY_TIMEOUT"
    )]
    pub query_timeout: u64,

    /// Connection timeout in seconds
    #[arg(
        long,
        default_value_t = DEFAULT_CONNECT_TIMEOUT_SECS,
        env = "REFLECT_CONNECT_TIMEOUT"
    )]
    pub connect_timeout: u64,

    /// User for PostgreSQL and MySQL endpoints
    #[arg(long, env = "REFLECT_DB_USER")]
    pub db_user: Option<String>,

    /// Password for PostgreSQL and MySQL endpoints
    #[arg(long, env = "REFLECT_DB_PASSWORD", hide_env_values = true)]
    pub db_password: Option<String>,

    /// Directory holding SQLite database files
    #[arg(long, default_value = DEFAULT_SQLITE_DIR, env = "REFLECT_SQLITE_DIR")]
    pub sqlite_dir: PathBuf,

    /// Server used by routes that omit one
    #[arg(long, default_value = DEFAULT_SERVER, env = "REFLECT_DEFAULT_SERVER")]
    pub default_server: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = DEFAULT_LOG_LEVEL, env = "REFLECT_LOG_LEVEL")]
    pub log_level: String,

    /// Enable JSON logging format
    #[arg(long, env = "REFLECT_JSON_LOGS")]
    pub json_logs: bool,
}

impl Config {
    /// Create a default configuration (useful for testing).
    pub fn default_config() -> Self {
        Self {
            http_host: DEFAULT_HTTP_HOST.to_string(),
            http_port: DEFAULT_HTTP_PORT,
            query_timeout: DEFAULT_QUERY_TIMEOUT_SECS,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT_SECS,
            db_user: None,
            db_password: None,
            sqlite_dir: PathBuf::from(DEFAULT_SQLITE_DIR),
            default_server: DEFAULT_SERVER.to_string(),
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            json_logs: false,
        }
    }

    /// Check settings that clap cannot express.
    pub fn validate(&self) -> Result<(), String> {
        if self.query_timeout == 0 {
            return Err("query_timeout must be greater than 0".to_string());
        }
        if self.connect_timeout == 0 {
            return Err("connect_timeout must be greater than 0".to_string());
        }
        if self.default_server.trim().is_empty() {
            return Err("default_server must not be blank".to_string());
        }
        if self.db_password.is_some() && self.db_user.is_none() {
            return Err("db_password requires db_user".to_string());
        }
        Ok(())
    }

    /// Get the HTTP bind address.
    pub fn http_bind_addr(&self) -> String {
        format!("{}:{}", self.http_host, self.http_port)
    }

    /// Get the query timeout as a Duration.
    pub fn query_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.query_timeout)
    }

    /// Get the connection timeout as a Duration.
    pub fn connect_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }

    /// Credentials applied to server-based vendors.
    pub fn credentials(&self) -> Credentials {
        Credentials {
            user: self.db_user.clone(),
            password: self.db_password.clone(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::default_config()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.http_host, DEFAULT_HTTP_HOST);
        assert_eq!(config.http_port, DEFAULT_HTTP_PORT);
        assert_eq!(config.default_server, "localhost");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_http_bind_addr() {
        let config = Config {
            http_host: "0.0.0.0".to_string(),
            http_port: 3000,
            ..Config::default()
        };
        assert_eq!(config.http_bind_addr(), "0.0.0.0:3000");
    }

    #[test]
    fn test_timeout_durations() {
        let config = Config {
            query_timeout: 60,
            connect_timeout: 15,
            ..Config::default()
        };
        assert_eq!(config.query_timeout_duration(), Duration::from_secs(60));
        assert_eq!(config.connect_timeout_duration(), Duration::from_secs(15));
    }

    #[test]
    fn test_parse_from_args() {
        let config = Config::try_parse_from([
            "db-reflect-server",
            "--http-port",
            "9090",
            "--db-user",
            "reader",
            "--sqlite-dir",
            "/var/lib/data",
            "--json-logs",
        ])
        .unwrap();
        assert_eq!(config.http_port, 9090);
        assert_eq!(config.db_user.as_deref(), Some("reader"));
        assert_eq!(config.sqlite_dir, PathBuf::from("/var/lib/data"));
        assert!(config.json_logs);
    }

    #[test]
    fn test_validate_rejects_zero_timeouts() {
        let config = Config {
            query_timeout: 0,
            ..Config::default()
        };
        assert!(config.validate().unwrap_err().contains("query_timeout"));

        let config = Config {
            connect_timeout: 0,
            ..Config::default()
        };
        assert!(config.validate().unwrap_err().contains("connect_timeout"));
    }

    #[test]
    fn test_validate_rejects_password_without_user() {
        let config = Config {
            db_password: Some("secret".to_string()),
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_credentials_debug_masks_password() {
        let config = Config {
            db_user: Some("reader".to_string()),
            db_password: Some("secret".to_string()),
            ..Config::default()
        };
        let debug = format!("{:?}", config.credentials());
        assert!(debug.contains("reader"));
        assert!(!debug.contains("secret"));
    }
}
