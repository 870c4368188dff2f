//! Data models for the reflection server.
//!
//! This module re-exports all model types used throughout the application.

pub mod endpoint;
pub mod schema;
pub mod value;

// Re-export commonly used types
pub use endpoint::{DatabaseEndpoint, DatabaseType};
pub use schema::{ColumnDescriptor, TableDescriptor};
pub use value::{CanonicalType, Value, ValueKind};
