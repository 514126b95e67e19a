//! Client certificate generator backed by rcgen

use std::fmt;
use std::time::Duration;

use rand::Rng;
use rcgen::{
    CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, KeyPair,
    KeyUsagePurpose, PKCS_ECDSA_P256_SHA256, PKCS_ECDSA_P384_SHA384, PKCS_ED25519, SerialNumber,
    SignatureAlgorithm,
};
use serde_json::Value;
use time::OffsetDateTime;

use super::GenerateRequest;
use crate::options::{OptionReader, format_duration};
use crate::{
    ConfigMap, CredentialMaterial, CredentialType, GeneratorError, SecretBytes, ValidationError,
};

const USERNAME_PLACEHOLDER: &str = "{{username}}";
const ROLE_NAME_PLACEHOLDER: &str = "{{role_name}}";
const DEFAULT_COMMON_NAME_TEMPLATE: &str = USERNAME_PLACEHOLDER;
const DEFAULT_TTL: Duration = Duration::from_secs(720 * 60 * 60);
const MAX_TTL: Duration = Duration::from_secs(10 * 365 * 24 * 60 * 60);
const BACKDATE: Duration = Duration::from_secs(30);

const OPTIONS: &[&str] = &[
    "common_name_template",
    "key_type",
    "key_bits",
    "ttl",
    "ca_cert",
    "ca_private_key",
];

/// Key algorithm used for the leaf certificate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertificateKeyType {
    /// ECDSA over P-256 or P-384
    Ec {
        /// Curve size, 256 or 384
        bits: u32,
    },
    /// Ed25519
    Ed25519,
}

impl CertificateKeyType {
    fn algorithm(self) -> &'static SignatureAlgorithm {
        match self {
            Self::Ec { bits: 384 } => &PKCS_ECDSA_P384_SHA384,
            Self::Ec { .. } => &PKCS_ECDSA_P256_SHA256,
            Self::Ed25519 => &PKCS_ED25519,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Ec { .. } => "ec",
            Self::Ed25519 => "ed25519",
        }
    }
}

impl fmt::Display for CertificateKeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ec { bits } => write!(f, "ec-p{bits}"),
            Self::Ed25519 => f.write_str("ed25519"),
        }
    }
}

/// Issuing CA, kept as PEM and re-parsed per generation
#[derive(Clone, PartialEq, Eq)]
struct Issuer {
    cert_pem: String,
    key_pem: String,
}

/// Client certificate generator
///
/// Issues a short-lived client-auth certificate whose common name is
/// rendered from a template. Without a configured CA the certificate is
/// self-signed.
#[derive(Clone, PartialEq, Eq)]
pub struct ClientCertificateGenerator {
    common_name_template: String,
    key_type: CertificateKeyType,
    ttl: Duration,
    issuer: Option<Issuer>,
}

impl fmt::Debug for ClientCertificateGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCertificateGenerator")
            .field("common_name_template", &self.common_name_template)
            .field("key_type", &self.key_type)
            .field("ttl", &self.ttl)
            .field("ca_configured", &self.issuer.is_some())
            .finish()
    }
}

impl Default for ClientCertificateGenerator {
    fn default() -> Self {
        Self {
            common_name_template: DEFAULT_COMMON_NAME_TEMPLATE.to_string(),
            key_type: CertificateKeyType::Ec { bits: 256 },
            ttl: DEFAULT_TTL,
            issuer: None,
        }
    }
}

impl ClientCertificateGenerator {
    pub(crate) fn from_options(options: &ConfigMap) -> Result<Self, ValidationError> {
        let reader = OptionReader::new(CredentialType::ClientCertificate, options, OPTIONS)?;

        let common_name_template = reader
            .string("common_name_template")?
            .unwrap_or_else(|| DEFAULT_COMMON_NAME_TEMPLATE.to_string());
        if render_common_name(&common_name_template, "r", "u").contains("{{") {
            return Err(ValidationError::invalid(
                "common_name_template",
                "only {{username}} and {{role_name}} placeholders are supported",
            ));
        }

        let key_bits = reader.u32("key_bits")?;
        let key_type = match reader.string("key_type")?.as_deref() {
            None | Some("ec") => match key_bits.unwrap_or(256) {
                bits @ (256 | 384) => CertificateKeyType::Ec { bits },
                _ => {
                    return Err(ValidationError::invalid(
                        "key_bits",
                        "must be 256 or 384 for ec keys",
                    ));
                }
            },
            Some("ed25519") => match key_bits {
                None | Some(0) => CertificateKeyType::Ed25519,
                Some(_) => {
                    return Err(ValidationError::invalid(
                        "key_bits",
                        "is not configurable for ed25519 keys",
                    ));
                }
            },
            Some(other) => {
                return Err(ValidationError::invalid(
                    "key_type",
                    format!("unsupported key type {other:?}, expected \"ec\" or \"ed25519\""),
                ));
            }
        };

        let ttl = reader.duration("ttl")?.unwrap_or(DEFAULT_TTL);
        if ttl.is_zero() || ttl > MAX_TTL {
            return Err(ValidationError::invalid(
                "ttl",
                format!("must be greater than zero and at most {}", format_duration(MAX_TTL)),
            ));
        }

        let issuer = match (reader.string("ca_cert")?, reader.string("ca_private_key")?) {
            (None, None) => None,
            (Some(_), None) => {
                return Err(ValidationError::MissingDependency {
                    option: "ca_cert".into(),
                    requires: "ca_private_key".into(),
                });
            }
            (None, Some(_)) => {
                return Err(ValidationError::MissingDependency {
                    option: "ca_private_key".into(),
                    requires: "ca_cert".into(),
                });
            }
            (Some(cert_pem), Some(key_pem)) => {
                CertificateParams::from_ca_cert_pem(&cert_pem)
                    .map_err(|e| ValidationError::invalid("ca_cert", e.to_string()))?;
                KeyPair::from_pem(&key_pem)
                    .map_err(|e| ValidationError::invalid("ca_private_key", e.to_string()))?;
                Some(Issuer { cert_pem, key_pem })
            }
        };

        Ok(Self {
            common_name_template,
            key_type,
            ttl,
            issuer,
        })
    }

    /// Leaf key algorithm
    pub fn key_type(&self) -> CertificateKeyType {
        self.key_type
    }

    /// Validity period of issued certificates
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub(crate) fn generate(
        &self,
        request: &GenerateRequest,
    ) -> Result<CredentialMaterial, GeneratorError> {
        let key_pair = KeyPair::generate_for(self.key_type.algorithm())?;

        let mut params = CertificateParams::new(Vec::<String>::new())?;
        let mut dn = DistinguishedName::new();
        dn.push(
            DnType::CommonName,
            render_common_name(
                &self.common_name_template,
                &request.role_name,
                &request.username,
            ),
        );
        params.distinguished_name = dn;
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ClientAuth];
        params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
        params.serial_number = Some(random_serial());

        let now = OffsetDateTime::now_utc();
        let ttl = time::Duration::try_from(self.ttl)
            .map_err(|e| GeneratorError::Certificate(e.to_string()))?;
        params.not_before = now - time::Duration::try_from(BACKDATE).unwrap_or_default();
        params.not_after = now
            .checked_add(ttl)
            .ok_or_else(|| GeneratorError::Certificate("ttl overflows certificate validity".into()))?;

        let certificate = match &self.issuer {
            None => params.self_signed(&key_pair)?,
            Some(issuer) => {
                let ca_key = KeyPair::from_pem(&issuer.key_pem)?;
                let ca_cert =
                    CertificateParams::from_ca_cert_pem(&issuer.cert_pem)?.self_signed(&ca_key)?;
                params.signed_by(&key_pair, &ca_cert, &ca_key)?
            }
        };

        Ok(CredentialMaterial::ClientCertificate {
            private_key: SecretBytes::new(key_pair.serialize_pem().into_bytes()),
            certificate: certificate.pem(),
        })
    }

    pub(crate) fn config_map(&self) -> ConfigMap {
        let mut map = ConfigMap::new();
        map.insert(
            "common_name_template".into(),
            Value::from(self.common_name_template.clone()),
        );
        map.insert("key_type".into(), Value::from(self.key_type.name()));
        if let CertificateKeyType::Ec { bits } = self.key_type {
            map.insert("key_bits".into(), Value::from(bits));
        }
        map.insert("ttl".into(), Value::from(format_duration(self.ttl)));
        if let Some(issuer) = &self.issuer {
            map.insert("ca_cert".into(), Value::from(issuer.cert_pem.clone()));
            map.insert("ca_private_key".into(), Value::from(issuer.key_pem.clone()));
        }
        map
    }
}

fn render_common_name(template: &str, role_name: &str, username: &str) -> String {
    template
        .replace(USERNAME_PLACEHOLDER, username)
        .replace(ROLE_NAME_PLACEHOLDER, role_name)
}

fn random_serial() -> SerialNumber {
    let mut bytes: [u8; 16] = rand::rng().random();
    // positive and without a leading zero octet
    bytes[0] = (bytes[0] & 0x7f) | 0x40;
    SerialNumber::from(bytes.to_vec())
}
