//! Password generator with character-class policy

use rand::Rng;
use rand::seq::SliceRandom;
use serde_json::Value;

use crate::options::OptionReader;
use crate::{ConfigMap, CredentialMaterial, CredentialType, SecretString, ValidationError};

const LOWERCASE: &str = "abcdefghijklmnopqrstuvwxyz";
const UPPERCASE: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const DIGITS: &str = "0123456789";
const DEFAULT_SYMBOL_SET: &str = "-_.~!";

const MIN_LENGTH: u32 = 8;
const MAX_LENGTH: u32 = 256;
const DEFAULT_LENGTH: u32 = 20;

const OPTIONS: &[&str] = &[
    "length",
    "lowercase",
    "uppercase",
    "digits",
    "symbols",
    "symbol_set",
];

/// Random password generator
///
/// Every enabled character class appears at least once in each password.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordGenerator {
    length: u32,
    lowercase: bool,
    uppercase: bool,
    digits: bool,
    symbols: bool,
    symbol_set: String,
}

impl Default for PasswordGenerator {
    fn default() -> Self {
        Self {
            length: DEFAULT_LENGTH,
            lowercase: true,
            uppercase: true,
            digits: true,
            symbols: false,
            symbol_set: DEFAULT_SYMBOL_SET.to_string(),
        }
    }
}

impl PasswordGenerator {
    pub(crate) fn from_options(options: &ConfigMap) -> Result<Self, ValidationError> {
        let reader = OptionReader::new(CredentialType::Password, options, OPTIONS)?;
        let defaults = Self::default();

        let length = reader.u32("length")?.unwrap_or(defaults.length);
        if !(MIN_LENGTH..=MAX_LENGTH).contains(&length) {
            return Err(ValidationError::invalid(
                "length",
                format!("must be between {MIN_LENGTH} and {MAX_LENGTH}"),
            ));
        }

        let symbol_set = reader.string("symbol_set")?.unwrap_or(defaults.symbol_set);
        if symbol_set
            .chars()
            .any(|c| !c.is_ascii_graphic() || c.is_ascii_alphanumeric())
        {
            return Err(ValidationError::invalid(
                "symbol_set",
                "must contain printable ASCII symbols only",
            ));
        }

        let generator = Self {
            length,
            lowercase: reader.bool("lowercase")?.unwrap_or(defaults.lowercase),
            uppercase: reader.bool("uppercase")?.unwrap_or(defaults.uppercase),
            digits: reader.bool("digits")?.unwrap_or(defaults.digits),
            symbols: reader.bool("symbols")?.unwrap_or(defaults.symbols),
            symbol_set,
        };

        let classes = generator.classes();
        if classes.is_empty() {
            return Err(ValidationError::invalid(
                "lowercase",
                "at least one character class must be enabled",
            ));
        }
        if classes.len() > generator.length as usize {
            return Err(ValidationError::invalid(
                "length",
                "too short to include every enabled character class",
            ));
        }
        Ok(generator)
    }

    /// Password length in characters
    pub fn length(&self) -> u32 {
        self.length
    }

    fn classes(&self) -> Vec<&str> {
        let mut classes = Vec::with_capacity(4);
        if self.lowercase {
            classes.push(LOWERCASE);
        }
        if self.uppercase {
            classes.push(UPPERCASE);
        }
        if self.digits {
            classes.push(DIGITS);
        }
        if self.symbols && !self.symbol_set.is_empty() {
            classes.push(self.symbol_set.as_str());
        }
        classes
    }

    pub(crate) fn generate(&self) -> Result<CredentialMaterial, ValidationError> {
        let classes = self.classes();
        let alphabet: Vec<u8> = classes.iter().flat_map(|c| c.bytes()).collect();
        let mut rng = rand::rng();

        let mut chars: Vec<u8> = classes
            .iter()
            .map(|class| {
                let bytes = class.as_bytes();
                bytes[rng.random_range(0..bytes.len())]
            })
            .collect();
        while chars.len() < self.length as usize {
            chars.push(alphabet[rng.random_range(0..alphabet.len())]);
        }
        chars.shuffle(&mut rng);

        // Alphabet is ASCII only, so this cannot fail.
        let password = String::from_utf8(chars)
            .map_err(|_| ValidationError::invalid("symbol_set", "must be ASCII"))?;
        Ok(CredentialMaterial::Password {
            password: SecretString::new(password),
        })
    }

    pub(crate) fn config_map(&self) -> ConfigMap {
        let mut map = ConfigMap::new();
        map.insert("length".into(), Value::from(self.length));
        map.insert("lowercase".into(), Value::from(self.lowercase));
        map.insert("uppercase".into(), Value::from(self.uppercase));
        map.insert("digits".into(), Value::from(self.digits));
        map.insert("symbols".into(), Value::from(self.symbols));
        map.insert("symbol_set".into(), Value::from(self.symbol_set.clone()));
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use serde_json::json;

    fn options(pairs: &[(&str, Value)]) -> ConfigMap {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    fn password(generator: &PasswordGenerator) -> String {
        let material = generator.generate().unwrap();
        material
            .password()
            .unwrap()
            .expose_secret(str::to_string)
    }

    #[test]
    fn test_defaults() {
        let generator = PasswordGenerator::from_options(&ConfigMap::new()).unwrap();
        assert_eq!(generator, PasswordGenerator::default());
        assert_eq!(password(&generator).len(), 20);
    }

    #[test]
    fn test_two_generations_differ() {
        let generator = PasswordGenerator::default();
        assert_ne!(password(&generator), password(&generator));
    }

    #[test]
    fn test_every_enabled_class_present() {
        let generator = PasswordGenerator::from_options(&options(&[
            ("length", json!("8")),
            ("symbols", json!("true")),
        ]))
        .unwrap();

        for _ in 0..50 {
            let pw = password(&generator);
            assert_eq!(pw.len(), 8);
            assert!(pw.chars().any(|c| c.is_ascii_lowercase()));
            assert!(pw.chars().any(|c| c.is_ascii_uppercase()));
            assert!(pw.chars().any(|c| c.is_ascii_digit()));
            assert!(pw.chars().any(|c| DEFAULT_SYMBOL_SET.contains(c)));
        }
    }

    #[test]
    fn test_disabled_classes_absent() {
        let generator = PasswordGenerator::from_options(&options(&[
            ("uppercase", json!(false)),
            ("digits", json!("false")),
        ]))
        .unwrap();
        let pw = password(&generator);
        assert!(pw.chars().all(|c| c.is_ascii_lowercase()));
    }

    #[rstest]
    #[case("7")]
    #[case("257")]
    #[case("twenty")]
    fn test_invalid_length(#[case] length: &str) {
        let err = PasswordGenerator::from_options(&options(&[("length", json!(length))])).unwrap_err();
        assert_eq!(err.option(), Some("length"));
    }

    #[test]
    fn test_no_class_enabled() {
        let err = PasswordGenerator::from_options(&options(&[
            ("lowercase", json!(false)),
            ("uppercase", json!(false)),
            ("digits", json!(false)),
        ]))
        .unwrap_err();
        assert!(matches!(err, ValidationError::InvalidOption { .. }));
    }

    #[test]
    fn test_symbol_set_rejects_alphanumerics() {
        let err = PasswordGenerator::from_options(&options(&[("symbol_set", json!("ab!"))]))
            .unwrap_err();
        assert_eq!(err.option(), Some("symbol_set"));
    }

    #[test]
    fn test_config_map_is_normalized() {
        let generator =
            PasswordGenerator::from_options(&options(&[("length", json!("32"))])).unwrap();
        let map = generator.config_map();
        assert_eq!(map["length"], json!(32));
        assert_eq!(map["symbols"], json!(false));
        assert_eq!(PasswordGenerator::from_options(&map).unwrap(), generator);
    }
}
