pub mod document_service;
pub mod hooks;

pub use document_service::{DocumentService, UpdateOptions};
pub use hooks::{LifecycleHooks, NoHooks};
