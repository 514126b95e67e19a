//! Generator error types
//!
//! [`ValidationError`] is always caused by caller input and names the
//! offending option. [`GeneratorError`] wraps it together with failures of
//! the underlying key or certificate machinery.

use thiserror::Error;

use crate::CredentialType;

/// Invalid credential configuration
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Credential type string is not one of the supported types
    #[error("invalid credential_type {0:?}")]
    UnknownCredentialType(String),

    /// Option is not part of the credential type's schema
    #[error("unknown option {option:?} for credential type {credential_type}")]
    UnknownOption {
        /// Offending option name
        option: String,
        /// Credential type whose schema was applied
        credential_type: CredentialType,
    },

    /// Option value could not be parsed or is out of range
    #[error("invalid value for option {option:?}: {reason}")]
    InvalidOption {
        /// Offending option name
        option: String,
        /// Why the value was rejected
        reason: String,
    },

    /// An option requires another option that was not supplied
    #[error("option {option:?} requires {requires:?}")]
    MissingDependency {
        /// Option that was supplied
        option: String,
        /// Option that must accompany it
        requires: String,
    },
}

impl ValidationError {
    pub(crate) fn invalid(option: &str, reason: impl Into<String>) -> Self {
        Self::InvalidOption {
            option: option.to_string(),
            reason: reason.into(),
        }
    }

    /// Name of the option the error refers to, if any
    pub fn option(&self) -> Option<&str> {
        match self {
            Self::UnknownCredentialType(_) => None,
            Self::UnknownOption { option, .. }
            | Self::InvalidOption { option, .. }
            | Self::MissingDependency { option, .. } => Some(option),
        }
    }
}

/// Errors produced while building a generator or generating material
#[derive(Debug, Error)]
pub enum GeneratorError {
    /// Configuration rejected
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Asymmetric key generation or encoding failed
    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    /// Certificate assembly or signing failed
    #[error("certificate generation failed: {0}")]
    Certificate(String),
}

impl From<rcgen::Error> for GeneratorError {
    fn from(err: rcgen::Error) -> Self {
        Self::Certificate(err.to_string())
    }
}

/// Result type for generator operations
pub type GeneratorResult<T> = Result<T, GeneratorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_option_names_option() {
        let err = ValidationError::UnknownOption {
            option: "colour".to_string(),
            credential_type: CredentialType::Password,
        };
        assert_eq!(err.option(), Some("colour"));
        assert!(err.to_string().contains("colour"));
        assert!(err.to_string().contains("password"));
    }

    #[test]
    fn test_validation_converts_into_generator_error() {
        let err: GeneratorError = ValidationError::invalid("length", "must be a number").into();
        assert!(matches!(err, GeneratorError::Validation(_)));
        assert!(err.to_string().contains("length"));
    }
}
