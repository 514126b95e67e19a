//! RSA private key generator

use rand_core::OsRng;
use rsa::RsaPrivateKey;
use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};
use serde_json::Value;

use crate::options::OptionReader;
use crate::{
    ConfigMap, CredentialMaterial, CredentialType, GeneratorError, SecretBytes, ValidationError,
};

const SUPPORTED_KEY_BITS: [u32; 3] = [2048, 3072, 4096];
const DEFAULT_KEY_BITS: u32 = 2048;
const FORMAT_PKCS8: &str = "pkcs8";

const OPTIONS: &[&str] = &["key_bits", "format"];

/// RSA private key generator
///
/// The private key is emitted as PKCS#8 PEM; the public key as SPKI PEM,
/// which is what gets configured on the database account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RsaKeyGenerator {
    key_bits: u32,
}

impl Default for RsaKeyGenerator {
    fn default() -> Self {
        Self {
            key_bits: DEFAULT_KEY_BITS,
        }
    }
}

impl RsaKeyGenerator {
    pub(crate) fn from_options(options: &ConfigMap) -> Result<Self, ValidationError> {
        let reader = OptionReader::new(CredentialType::RsaPrivateKey, options, OPTIONS)?;

        let key_bits = reader.u32("key_bits")?.unwrap_or(DEFAULT_KEY_BITS);
        if !SUPPORTED_KEY_BITS.contains(&key_bits) {
            return Err(ValidationError::invalid(
                "key_bits",
                format!("must be one of {SUPPORTED_KEY_BITS:?}"),
            ));
        }

        match reader.string("format")? {
            Some(format) if !format.eq_ignore_ascii_case(FORMAT_PKCS8) => {
                return Err(ValidationError::invalid(
                    "format",
                    format!("unsupported key format {format:?}, expected \"{FORMAT_PKCS8}\""),
                ));
            }
            _ => {}
        }

        Ok(Self { key_bits })
    }

    /// Modulus size in bits
    pub fn key_bits(&self) -> u32 {
        self.key_bits
    }

    pub(crate) fn generate(&self) -> Result<CredentialMaterial, GeneratorError> {
        let private_key = RsaPrivateKey::new(&mut OsRng, self.key_bits as usize)
            .map_err(|e| GeneratorError::KeyGeneration(e.to_string()))?;

        let private_pem = private_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| GeneratorError::KeyGeneration(e.to_string()))?;
        let public_pem = private_key
            .to_public_key()
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| GeneratorError::KeyGeneration(e.to_string()))?;

        Ok(CredentialMaterial::RsaPrivateKey {
            private_key: SecretBytes::new(private_pem.as_bytes().to_vec()),
            public_key: public_pem,
        })
    }

    pub(crate) fn config_map(&self) -> ConfigMap {
        let mut map = ConfigMap::new();
        map.insert("key_bits".into(), Value::from(self.key_bits));
        map.insert("format".into(), Value::from(FORMAT_PKCS8));
        map
    }
}
