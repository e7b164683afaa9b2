pub mod change;
pub mod entity_type;
pub mod instance;

pub use change::{ArrayChange, Change, ChangeSet, PullEntry};
pub use entity_type::EntityType;
pub use instance::Instance;
