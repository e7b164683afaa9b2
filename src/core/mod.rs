pub mod error;
pub mod types;
pub mod value;

pub use error::{DocError, Result};
pub use types::{DocRef, LocaleString, PrimitiveType, mini_guid, new_document_id};
pub use value::{FieldValue, IdentityRule};
