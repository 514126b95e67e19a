//! Credential type discriminant

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ValidationError;

/// Kind of credential a static account is rotated with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialType {
    /// Random password
    #[default]
    Password,
    /// RSA private key (public half is handed to the database)
    RsaPrivateKey,
    /// Client certificate with its private key
    ClientCertificate,
}

impl CredentialType {
    /// All supported credential types
    pub const ALL: [CredentialType; 3] = [
        CredentialType::Password,
        CredentialType::RsaPrivateKey,
        CredentialType::ClientCertificate,
    ];

    /// Stable string form used in configuration and storage
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialType::Password => "password",
            CredentialType::RsaPrivateKey => "rsa_private_key",
            CredentialType::ClientCertificate => "client_certificate",
        }
    }
}

impl fmt::Display for CredentialType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CredentialType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| ValidationError::UnknownCredentialType(s.to_string()))
    }
}
