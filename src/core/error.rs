use crate::validation::ValidationReport;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DocError {
    #[error("Not authorized: {0}")]
    NotAuthorized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation failed for: {}", .0.failed_properties().join(", "))]
    Validation(ValidationReport),

    #[error("Missing parameters: {}", .0.join(", "))]
    MissingParameters(Vec<String>),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Entity '{0}' is not registered")]
    UnknownEntity(String),

    #[error("Invalid update set: {0}")]
    InvalidUpdateSet(String),

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Lock error: {0}")]
    LockError(String),
}

impl DocError {
    pub fn not_authorized() -> Self {
        Self::NotAuthorized("You are not authorized to perform this action.".into())
    }

    /// Status code a caller can surface when rendering the error.
    pub fn code(&self) -> u16 {
        match self {
            Self::NotAuthorized(_) => 401,
            Self::NotFound(_) => 404,
            Self::Validation(_)
            | Self::MissingParameters(_)
            | Self::InvalidUpdateSet(_)
            | Self::TypeMismatch(_) => 400,
            _ => 500,
        }
    }
}

pub type Result<T> = std::result::Result<T, DocError>;

impl From<serde_json::Error> for DocError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for DocError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(DocError::not_authorized().code(), 401);
        assert_eq!(DocError::NotFound("x".into()).code(), 404);
        assert_eq!(DocError::MissingParameters(vec!["id".into()]).code(), 400);
        assert_eq!(DocError::Store("down".into()).code(), 500);
    }

    #[test]
    fn test_missing_parameters_message() {
        let err = DocError::MissingParameters(vec!["id".into(), "query".into()]);
        assert_eq!(err.to_string(), "Missing parameters: id, query");
    }
}
