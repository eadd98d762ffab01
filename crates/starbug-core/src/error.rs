// Allow unused assignments for diagnostic fields - they're used by the macros
#![allow(unused_assignments)]

use miette::Diagnostic;
use thiserror::Error;

/// Core error type for Starbug operations
#[derive(Error, Debug, Diagnostic)]
pub enum StarbugError {
    /// Object has no usable identity
    #[error("Object is missing required field: {field}")]
    #[diagnostic(
        code(starbug::missing_field),
        help("Objects stored in a cache must carry metadata.name")
    )]
    MissingField {
        #[allow(unused)]
        field: String,
    },

    /// Reconciliation key could not be parsed
    #[error("Invalid object key: {key}")]
    #[diagnostic(
        code(starbug::invalid_key),
        help("Keys have the form 'namespace/name' or 'name' for cluster-scoped objects")
    )]
    InvalidKey {
        #[allow(unused)]
        key: String,
    },

    /// Label selector could not be compiled
    #[error("Invalid label selector: {reason}")]
    #[diagnostic(
        code(starbug::invalid_selector),
        help("Supported operators are In, NotIn, Exists and DoesNotExist")
    )]
    InvalidSelector {
        #[allow(unused)]
        reason: String,
    },

    /// Serialization error
    #[error("Serialization error: {message}")]
    #[diagnostic(
        code(starbug::serialization_error),
        help("Ensure the object format is valid JSON")
    )]
    SerializationError {
        #[allow(unused)]
        message: String,
        #[source]
        #[allow(unused)]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

/// Result type alias for Starbug operations
pub type Result<T> = std::result::Result<T, StarbugError>;

impl StarbugError {
    /// Create a MissingField error
    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
        }
    }

    /// Create an InvalidKey error
    pub fn invalid_key(key: impl Into<String>) -> Self {
        Self::InvalidKey { key: key.into() }
    }

    /// Create an InvalidSelector error
    pub fn invalid_selector(reason: impl Into<String>) -> Self {
        Self::InvalidSelector {
            reason: reason.into(),
        }
    }

    /// Create a SerializationError
    pub fn serialization_error(
        message: impl Into<String>,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::SerializationError {
            message: message.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = StarbugError::invalid_key("a/b/c");
        assert!(matches!(err, StarbugError::InvalidKey { .. }));
        assert_eq!(err.to_string(), "Invalid object key: a/b/c");

        let err = StarbugError::invalid_selector("unknown operator Gt");
        assert!(matches!(err, StarbugError::InvalidSelector { .. }));
    }
}
