//! Credential generators
//!
//! The set of credential types is closed, so dispatch is a plain enum
//! selected once when a role is configured. The normalized configuration
//! returned by [`CredentialGenerator::config_map`] is what gets persisted
//! with the role; rebuilding a generator from it yields the same generator.

mod certificate;
mod password;
mod rsa;

pub use certificate::{CertificateKeyType, ClientCertificateGenerator};
pub use password::PasswordGenerator;
pub use rsa::RsaKeyGenerator;

use crate::{ConfigMap, CredentialMaterial, CredentialType, GeneratorResult};

/// Context passed to a generator for one generation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerateRequest {
    /// Role the material is generated for
    pub role_name: String,
    /// Database account the material will be applied to
    pub username: String,
}

impl GenerateRequest {
    /// Create a request for the given role and account
    pub fn new(role_name: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            role_name: role_name.into(),
            username: username.into(),
        }
    }
}

/// Generator bound to a validated configuration
#[derive(Debug, Clone)]
pub enum CredentialGenerator {
    /// Password generator
    Password(PasswordGenerator),
    /// RSA key generator
    RsaPrivateKey(RsaKeyGenerator),
    /// Client certificate generator
    ClientCertificate(ClientCertificateGenerator),
}

impl CredentialGenerator {
    /// Validate `options` against the schema of `credential_type` and bind a generator
    ///
    /// Fails with a [`ValidationError`](crate::ValidationError) naming the
    /// offending option on unknown or malformed input.
    pub fn new(credential_type: CredentialType, options: &ConfigMap) -> GeneratorResult<Self> {
        Ok(match credential_type {
            CredentialType::Password => Self::Password(PasswordGenerator::from_options(options)?),
            CredentialType::RsaPrivateKey => {
                Self::RsaPrivateKey(RsaKeyGenerator::from_options(options)?)
            }
            CredentialType::ClientCertificate => {
                Self::ClientCertificate(ClientCertificateGenerator::from_options(options)?)
            }
        })
    }

    /// Credential type this generator produces
    pub fn credential_type(&self) -> CredentialType {
        match self {
            Self::Password(_) => CredentialType::Password,
            Self::RsaPrivateKey(_) => CredentialType::RsaPrivateKey,
            Self::ClientCertificate(_) => CredentialType::ClientCertificate,
        }
    }

    /// Produce new credential material
    pub fn generate(&self, request: &GenerateRequest) -> GeneratorResult<CredentialMaterial> {
        let material = match self {
            Self::Password(generator) => generator.generate()?,
            Self::RsaPrivateKey(generator) => generator.generate()?,
            Self::ClientCertificate(generator) => generator.generate(request)?,
        };
        tracing::debug!(
            credential_type = %self.credential_type(),
            role = %request.role_name,
            "Generated credential material"
        );
        Ok(material)
    }

    /// Normalized, storage-safe configuration with defaults filled in
    pub fn config_map(&self) -> ConfigMap {
        match self {
            Self::Password(generator) => generator.config_map(),
            Self::RsaPrivateKey(generator) => generator.config_map(),
            Self::ClientCertificate(generator) => generator.config_map(),
        }
    }
}
