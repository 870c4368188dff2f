//! DB Reflect Server Library
//!
//! Reflects live SQL tables into runtime entity types and reads their rows
//! through short-lived, transactional sessions (SQLite, PostgreSQL, MySQL).

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod service;
pub mod synthesis;
pub mod transport;

pub use config::Config;
pub use error::{DbError, DbResult};
pub use service::ReflectService;
