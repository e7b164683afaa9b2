pub mod engine;
pub mod memory;
pub mod operators;

pub use engine::{FindOptions, StoreDriver};
pub use memory::{Collection, MemoryStore};
pub use operators::{apply_update, matches, project, values_at};
