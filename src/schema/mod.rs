pub mod entity;
pub mod property;
pub mod registry;
pub mod rules;

pub use entity::{EntityDefinition, EntityKind};
pub use property::{
    ComplexType, CustomValidator, PropertyDefinition, REQUIRED_RULE, ValidatorSpec, ValueKind,
};
pub use registry::{RESERVED_WORDS, ROLE_OWNER, ROLE_SYSTEM, SchemaRegistry};
pub use rules::{Action, SecurityRules};
