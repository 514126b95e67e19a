//! External database driver capability
//!
//! The only side-effecting call against the managed database. Applying the
//! same material twice must be harmless: recovery re-issues the call with
//! the material stored in the WAL.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use vigil_credential::{ConfigMap, CredentialMaterial, CredentialType};

/// Failure reported by a database driver
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct DriverError {
    message: String,
}

impl DriverError {
    /// Driver failure with a message
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Failure message
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Apply new material to a static account
#[derive(Clone, PartialEq, Eq)]
pub struct SetCredentialRequest {
    /// Database connection
    pub db_name: String,
    /// Role being rotated
    pub role_name: String,
    /// Account to update
    pub username: String,
    /// Material to apply
    pub credential: CredentialMaterial,
    /// Rotation statement templates
    pub statements: Vec<String>,
    /// Credential type of the role
    pub credential_type: CredentialType,
    /// Normalized generator configuration of the role
    pub credential_config: ConfigMap,
}

impl fmt::Debug for SetCredentialRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SetCredentialRequest")
            .field("db_name", &self.db_name)
            .field("role_name", &self.role_name)
            .field("username", &self.username)
            .field("credential", &self.credential)
            .field("statements", &self.statements.len())
            .finish()
    }
}

/// Remove a static account when its role is deleted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevokeRequest {
    /// Database connection
    pub db_name: String,
    /// Deleted role
    pub role_name: String,
    /// Account to remove
    pub username: String,
}

/// Database driver used by the rotation engine
#[async_trait]
pub trait DatabaseDriver: Send + Sync {
    /// Apply `request.credential` to the account; returns when the database committed it
    async fn set_static_credential(
        &self,
        request: &SetCredentialRequest,
    ) -> Result<DateTime<Utc>, DriverError>;

    /// Remove the external account
    ///
    /// Drivers without account removal keep the default no-op.
    async fn revoke_static_account(&self, request: &RevokeRequest) -> Result<(), DriverError> {
        tracing::debug!(
            role = %request.role_name,
            username = %request.username,
            "Driver does not remove static accounts"
        );
        Ok(())
    }
}
