//! Vigil Credential - credential material generators
//!
//! Produces fresh credential material for statically managed database
//! accounts. Every supported credential type has one generator that:
//!
//! - validates a raw option mapping against the type's schema,
//! - normalizes it into a storage-safe [`ConfigMap`] (defaults filled in),
//! - generates new material from a cryptographically secure source.
//!
//! # Credential types
//!
//! | Type | Material | Options |
//! |---|---|---|
//! | `password` | [`SecretString`] | `length`, `lowercase`, `uppercase`, `digits`, `symbols`, `symbol_set` |
//! | `rsa_private_key` | PKCS#8 PEM private key + SPKI PEM public key | `key_bits`, `format` |
//! | `client_certificate` | PEM private key + PEM certificate | `common_name_template`, `key_type`, `key_bits`, `ttl`, `ca_cert`, `ca_private_key` |
//!
//! # Example
//!
//! ```rust,no_run
//! use vigil_credential::{ConfigMap, CredentialGenerator, CredentialType, GenerateRequest};
//!
//! # fn example() -> Result<(), vigil_credential::GeneratorError> {
//! let mut options = ConfigMap::new();
//! options.insert("length".into(), "32".into());
//!
//! let generator = CredentialGenerator::new(CredentialType::Password, &options)?;
//! let material = generator.generate(&GenerateRequest::new("db-user1", "svc_a"))?;
//! assert_eq!(material.credential_type(), CredentialType::Password);
//! # Ok(())
//! # }
//! ```
#![forbid(unsafe_code)]

mod error;
/// Credential generators, one per [`CredentialType`]
pub mod generator;
mod kind;
mod material;
mod options;

pub use error::{GeneratorError, GeneratorResult, ValidationError};
pub use generator::{
    ClientCertificateGenerator, CredentialGenerator, GenerateRequest, PasswordGenerator,
    RsaKeyGenerator,
};
pub use kind::CredentialType;
pub use material::{CredentialMaterial, SecretBytes, SecretString};
pub use options::ConfigMap;
