//! Read side (`delta`), write side (`patch`) and store lowering
//! (`query_from_update_set`) of change sets.

pub mod delta;
pub mod patch;
pub mod query;

pub use patch::patch;
pub use query::{UpdateOperators, query_from_update_set};
