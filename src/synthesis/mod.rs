//! Entity synthesis.
//!
//! Turns reflected table descriptors into runtime record types and the
//! mappings that bind them back to their tables.

pub mod cache;
pub mod entity;
pub mod mapping;

pub use cache::SynthesisCache;
pub use entity::{Entity, EntityType, FieldDescriptor};
pub use mapping::{IdentityBinding, MappingDescriptor, PropertyBinding};
