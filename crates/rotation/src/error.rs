//! Rotation error taxonomy
//!
//! Client errors (validation, name conflicts, missing roles) are returned
//! synchronously by the administrative API and never retried. Driver and
//! storage errors are retried by the scheduler.

use std::time::Duration;

use thiserror::Error;
use vigil_credential::{GeneratorError, ValidationError};
use vigil_storage::StorageError;

use crate::driver::DriverError;

/// Errors produced by the rotation engine and the role manager
#[derive(Debug, Error)]
pub enum RotationError {
    /// Malformed or missing field, unknown option, period below minimum, immutable field changed
    #[error("{reason}")]
    Validation {
        /// Human-readable reason, returned to the caller as is
        reason: String,
    },

    /// Name already used by a role of the other kind
    #[error("Role and Static Role names must be unique: {name:?}")]
    NameConflict {
        /// Conflicting role name
        name: String,
    },

    /// Role does not exist
    #[error("role not found: {name}")]
    NotFound {
        /// Missing role name
        name: String,
    },

    /// External database driver rejected or failed to apply the credential
    #[error("driver failed for role {role}: {source}")]
    Driver {
        /// Role being rotated
        role: String,
        /// Driver failure
        #[source]
        source: DriverError,
    },

    /// External apply exceeded the driver deadline
    #[error("driver call for role {role} timed out after {timeout:?}")]
    Timeout {
        /// Role being rotated
        role: String,
        /// Deadline that was exceeded
        timeout: Duration,
    },

    /// WAL present but unusable, or stored role record corrupt
    #[error("recovery failed for role {role}: {reason}")]
    Recovery {
        /// Affected role
        role: String,
        /// What made the role unrecoverable
        reason: String,
    },

    /// Durable storage failure
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Credential generation failed
    #[error("credential generation failed: {0}")]
    Generator(#[from] GeneratorError),

    /// Invalid engine configuration
    #[error("invalid rotation config: {reason}")]
    Config {
        /// What is wrong with the configuration
        reason: String,
    },

    /// Role was removed but some of its WAL records could not be cleaned up
    #[error("role {role} deleted, but WAL cleanup failed: {}", failures.join("; "))]
    Cleanup {
        /// Deleted role
        role: String,
        /// One message per failed WAL record
        failures: Vec<String>,
    },
}

impl RotationError {
    /// Validation error with a reason
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            reason: reason.into(),
        }
    }

    /// Configuration error with a reason
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    /// Whether the scheduler retries this failure
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Driver { .. } | Self::Timeout { .. } | Self::Storage(_)
        )
    }

    /// Whether the failure was caused by the caller's input
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Validation { .. } | Self::NameConflict { .. } | Self::NotFound { .. }
        )
    }
}

impl From<ValidationError> for RotationError {
    fn from(err: ValidationError) -> Self {
        Self::Validation {
            reason: format!("credential_config validation failed: {err}"),
        }
    }
}

/// Result type for rotation operations
pub type RotationResult<T> = Result<T, RotationError>;

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(RotationError::validation("username is a required field to create a static account"), false, true)]
    #[case(RotationError::NameConflict { name: "a".into() }, false, true)]
    #[case(RotationError::NotFound { name: "a".into() }, false, true)]
    #[case(RotationError::Driver { role: "a".into(), source: DriverError::new("refused") }, true, false)]
    #[case(RotationError::Timeout { role: "a".into(), timeout: Duration::from_secs(1) }, true, false)]
    #[case(RotationError::Storage(StorageError::backend("down")), true, false)]
    #[case(RotationError::Recovery { role: "a".into(), reason: "corrupt".into() }, false, false)]
    fn test_classification(
        #[case] err: RotationError,
        #[case] retryable: bool,
        #[case] client: bool,
    ) {
        assert_eq!(err.is_retryable(), retryable);
        assert_eq!(err.is_client_error(), client);
    }

    #[test]
    fn test_validation_error_message_is_prefixed() {
        let err: RotationError = ValidationError::UnknownCredentialType("hmac".into()).into();
        assert_eq!(
            err.to_string(),
            "credential_config validation failed: invalid credential_type \"hmac\""
        );
    }

    #[test]
    fn test_cleanup_lists_failures() {
        let err = RotationError::Cleanup {
            role: "db-user1".into(),
            failures: vec!["wal/1: down".into(), "wal/2: down".into()],
        };
        assert!(err.to_string().ends_with("wal/1: down; wal/2: down"));
    }
}
