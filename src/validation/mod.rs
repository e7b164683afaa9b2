pub mod report;
pub mod validators;

pub use report::{PropertyResult, ValidationMethod, ValidationReport, validate, validate_property};
pub use validators::{RESERVED_ROLES, ValidatorFn, ValidatorRegistry, get_or_compile_regex};
