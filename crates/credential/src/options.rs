//! Raw option parsing shared by all generators
//!
//! Options arrive either as strings from the API layer (`"2048"`, `"true"`)
//! or as native JSON values when a normalized config is read back from
//! storage. Both shapes are accepted.

use std::collections::BTreeMap;
use std::time::Duration;

use humantime_serde::re::humantime;
use serde_json::Value;

use crate::{CredentialType, ValidationError};

/// Credential configuration: option name to value
pub type ConfigMap = BTreeMap<String, Value>;

/// Reads typed options out of a [`ConfigMap`] after rejecting unknown names
pub(crate) struct OptionReader<'a> {
    options: &'a ConfigMap,
}

impl<'a> OptionReader<'a> {
    pub(crate) fn new(
        credential_type: CredentialType,
        options: &'a ConfigMap,
        allowed: &[&str],
    ) -> Result<Self, ValidationError> {
        if let Some(unknown) = options.keys().find(|key| !allowed.contains(&key.as_str())) {
            return Err(ValidationError::UnknownOption {
                option: unknown.clone(),
                credential_type,
            });
        }
        Ok(Self { options })
    }

    fn raw(&self, name: &str) -> Option<&'a Value> {
        match self.options.get(name) {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) if s.trim().is_empty() => None,
            Some(value) => Some(value),
        }
    }

    pub(crate) fn string(&self, name: &str) -> Result<Option<String>, ValidationError> {
        match self.raw(name) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(Value::Number(n)) => Ok(Some(n.to_string())),
            Some(Value::Bool(b)) => Ok(Some(b.to_string())),
            Some(_) => Err(ValidationError::invalid(name, "expected a string")),
        }
    }

    pub(crate) fn u32(&self, name: &str) -> Result<Option<u32>, ValidationError> {
        let parsed = match self.raw(name) {
            None => return Ok(None),
            Some(Value::Number(n)) => n.as_u64(),
            Some(Value::String(s)) => s.trim().parse::<u64>().ok(),
            Some(_) => None,
        };
        parsed
            .and_then(|n| u32::try_from(n).ok())
            .map(Some)
            .ok_or_else(|| ValidationError::invalid(name, "expected a non-negative integer"))
    }

    pub(crate) fn bool(&self, name: &str) -> Result<Option<bool>, ValidationError> {
        match self.raw(name) {
            None => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(*b)),
            Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => Ok(Some(true)),
                "false" | "0" | "no" => Ok(Some(false)),
                _ => Err(ValidationError::invalid(name, "expected a boolean")),
            },
            Some(_) => Err(ValidationError::invalid(name, "expected a boolean")),
        }
    }

    /// Duration given either as integer seconds or a humantime string (`"24h"`)
    pub(crate) fn duration(&self, name: &str) -> Result<Option<Duration>, ValidationError> {
        match self.raw(name) {
            None => Ok(None),
            Some(Value::Number(n)) => n
                .as_u64()
                .map(|secs| Some(Duration::from_secs(secs)))
                .ok_or_else(|| ValidationError::invalid(name, "expected a non-negative duration")),
            Some(Value::String(s)) => {
                let s = s.trim();
                if let Ok(secs) = s.parse::<u64>() {
                    return Ok(Some(Duration::from_secs(secs)));
                }
                humantime::parse_duration(s)
                    .map(Some)
                    .map_err(|e| ValidationError::invalid(name, e.to_string()))
            }
            Some(_) => Err(ValidationError::invalid(name, "expected a duration")),
        }
    }
}

pub(crate) fn format_duration(duration: Duration) -> String {
    humantime::format_duration(duration).to_string()
}
