// ============================================================================
// memodoc Library
// ============================================================================

//! Schema-driven documents with role-based field security, hierarchical
//! change tracking and translation of changes into store update operators.
//!
//! ```
//! use memodoc::{EntityDefinition, PropertyDefinition, SchemaRegistry};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # fn main() -> memodoc::Result<()> {
//! let mut registry = SchemaRegistry::new();
//! registry.register(EntityDefinition::document("Car").property(PropertyDefinition::string("make")))?;
//! let registry = Arc::new(registry);
//!
//! let cars = registry.entity_type("Car")?;
//! let car = cars.instantiate(json!({"make": "Saab"}))?;
//! car.set("make", "Volvo")?;
//!
//! let ops = cars.query_from_update_set(&cars.delta(&car)?, None)?;
//! assert_eq!(ops.to_json(), json!({"$set": {"make": "Volvo"}}));
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod diff;
pub mod model;
pub mod schema;
pub mod security;
pub mod service;
pub mod store;
pub mod validation;

// Re-export main types for convenience
pub use config::EngineConfig;
pub use core::{DocError, DocRef, FieldValue, LocaleString, PrimitiveType, Result};
pub use diff::UpdateOperators;
pub use model::{ArrayChange, Change, ChangeSet, EntityType, Instance, PullEntry};
pub use schema::{Action, EntityDefinition, EntityKind, PropertyDefinition, SchemaRegistry};
pub use security::{Access, FieldMask, RoleSet, SecurityContext};
pub use service::{DocumentService, LifecycleHooks, UpdateOptions};
pub use store::{FindOptions, MemoryStore, StoreDriver};
pub use validation::{ValidationMethod, ValidationReport};
