//! Rotation engine configuration
//!
//! Loaded from TOML or from `VIGIL_ROTATION_*` environment variables and
//! validated before the service starts.
//!
//! ```toml
//! tick_interval = "5s"
//! driver_timeout = "30s"
//! max_concurrent_rotations = 16
//! lock_stripes = 256
//!
//! [retry_backoff]
//! initial_backoff = "10s"
//! multiplier = 2.0
//! max_backoff = "5m"
//! max_attempts = 8
//! ```

use std::time::Duration;

use humantime_serde::re::humantime;
use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;
use crate::{RotationError, RotationResult};

/// Prefix of the environment variables read by [`RotationConfig::from_env`]
pub const ENV_PREFIX: &str = "VIGIL_ROTATION_";

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RotationConfig {
    /// Scheduler tick; also the minimum allowed rotation period
    #[serde(with = "humantime_serde")]
    pub tick_interval: Duration,

    /// Rescheduling policy for failed rotations
    pub retry_backoff: RetryPolicy,

    /// Deadline for a single external driver call
    #[serde(with = "humantime_serde")]
    pub driver_timeout: Duration,

    /// Rotations executed concurrently across different roles
    pub max_concurrent_rotations: usize,

    /// Size of the per-role lock table, a power of two
    pub lock_stripes: usize,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(5),
            retry_backoff: RetryPolicy::default(),
            driver_timeout: Duration::from_secs(30),
            max_concurrent_rotations: 16,
            lock_stripes: 256,
        }
    }
}

impl RotationConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(input: &str) -> RotationResult<Self> {
        let config: Self =
            toml::from_str(input).map_err(|e| RotationError::config(e.message().to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by `VIGIL_ROTATION_*` environment variables
    pub fn from_env() -> RotationResult<Self> {
        Self::from_vars(std::env::vars())
    }

    /// Defaults overridden by `VIGIL_ROTATION_*` entries of `vars`
    ///
    /// Recognized names (after the prefix): `TICK_INTERVAL`,
    /// `DRIVER_TIMEOUT`, `MAX_CONCURRENT_ROTATIONS`, `LOCK_STRIPES`,
    /// `RETRY_INITIAL_BACKOFF`, `RETRY_MULTIPLIER`, `RETRY_MAX_BACKOFF`,
    /// `RETRY_MAX_ATTEMPTS`. Unknown names under the prefix are rejected.
    pub fn from_vars<I, K, V>(vars: I) -> RotationResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut config = Self::default();
        for (key, value) in vars {
            let Some(name) = key.as_ref().strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let value = value.as_ref().trim();
            tracing::trace!(key = key.as_ref(), value, "Loading rotation config from env");

            match name {
                "TICK_INTERVAL" => config.tick_interval = parse_duration(name, value)?,
                "DRIVER_TIMEOUT" => config.driver_timeout = parse_duration(name, value)?,
                "MAX_CONCURRENT_ROTATIONS" => {
                    config.max_concurrent_rotations = parse_number(name, value)?;
                }
                "LOCK_STRIPES" => config.lock_stripes = parse_number(name, value)?,
                "RETRY_INITIAL_BACKOFF" => {
                    config.retry_backoff.initial_backoff = parse_duration(name, value)?;
                }
                "RETRY_MULTIPLIER" => config.retry_backoff.multiplier = parse_number(name, value)?,
                "RETRY_MAX_BACKOFF" => {
                    config.retry_backoff.max_backoff = parse_duration(name, value)?;
                }
                "RETRY_MAX_ATTEMPTS" => {
                    config.retry_backoff.max_attempts = parse_number(name, value)?;
                }
                other => {
                    return Err(RotationError::config(format!(
                        "unknown variable {ENV_PREFIX}{other}"
                    )));
                }
            }
        }
        config.validate()?;
        Ok(config)
    }

    /// Check invariants between fields
    pub fn validate(&self) -> RotationResult<()> {
        if self.tick_interval.is_zero() {
            return Err(RotationError::config("tick_interval must be greater than zero"));
        }
        if self.driver_timeout.is_zero() {
            return Err(RotationError::config("driver_timeout must be greater than zero"));
        }
        if self.max_concurrent_rotations == 0 {
            return Err(RotationError::config("max_concurrent_rotations must be at least 1"));
        }
        if !self.lock_stripes.is_power_of_two() {
            return Err(RotationError::config(format!(
                "lock_stripes must be a power of two, got {}",
                self.lock_stripes
            )));
        }

        let retry = &self.retry_backoff;
        if retry.initial_backoff.is_zero() {
            return Err(RotationError::config("retry_backoff.initial_backoff must be greater than zero"));
        }
        if retry.max_backoff < retry.initial_backoff {
            return Err(RotationError::config(
                "retry_backoff.max_backoff must not be below initial_backoff",
            ));
        }
        if !retry.multiplier.is_finite() || retry.multiplier < 1.0 {
            return Err(RotationError::config("retry_backoff.multiplier must be at least 1.0"));
        }
        if retry.max_attempts == 0 {
            return Err(RotationError::config("retry_backoff.max_attempts must be at least 1"));
        }
        Ok(())
    }
}

fn parse_duration(name: &str, value: &str) -> RotationResult<Duration> {
    if let Ok(secs) = value.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(value)
        .map_err(|e| RotationError::config(format!("{ENV_PREFIX}{name}: {e}")))
}

fn parse_number<T>(name: &str, value: &str) -> RotationResult<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| RotationError::config(format!("{ENV_PREFIX}{name}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[test]
    fn test_defaults_are_valid() {
        let config = RotationConfig::default();
        config.validate().unwrap();
        assert_eq!(config.tick_interval, Duration::from_secs(5));
        assert_eq!(config.retry_backoff.max_backoff, Duration::from_secs(300));
    }

    #[test]
    fn test_from_toml_str() {
        let config = RotationConfig::from_toml_str(
            r#"
            tick_interval = "10s"
            lock_stripes = 64

            [retry_backoff]
            initial_backoff = "1s"
            max_attempts = 3
            "#,
        )
        .unwrap();

        assert_eq!(config.tick_interval, Duration::from_secs(10));
        assert_eq!(config.lock_stripes, 64);
        assert_eq!(config.retry_backoff.initial_backoff, Duration::from_secs(1));
        assert_eq!(config.retry_backoff.max_attempts, 3);
        // untouched fields keep defaults
        assert_eq!(config.driver_timeout, Duration::from_secs(30));
        assert_eq!(config.retry_backoff.multiplier, 2.0);
    }

    #[test]
    fn test_toml_unknown_field_rejected() {
        let err = RotationConfig::from_toml_str("tick = \"5s\"").unwrap_err();
        assert!(matches!(err, RotationError::Config { .. }));
    }

    #[test]
    fn test_from_vars() {
        let config = RotationConfig::from_vars([
            ("VIGIL_ROTATION_TICK_INTERVAL", "2s"),
            ("VIGIL_ROTATION_RETRY_MAX_ATTEMPTS", "4"),
            ("VIGIL_ROTATION_DRIVER_TIMEOUT", "45"),
            ("PATH", "/usr/bin"),
        ])
        .unwrap();

        assert_eq!(config.tick_interval, Duration::from_secs(2));
        assert_eq!(config.retry_backoff.max_attempts, 4);
        assert_eq!(config.driver_timeout, Duration::from_secs(45));
    }

    #[rstest]
    #[case("VIGIL_ROTATION_TICKS", "5s")]
    #[case("VIGIL_ROTATION_TICK_INTERVAL", "soon")]
    #[case("VIGIL_ROTATION_LOCK_STRIPES", "100")]
    #[case("VIGIL_ROTATION_MAX_CONCURRENT_ROTATIONS", "0")]
    #[case("VIGIL_ROTATION_RETRY_MULTIPLIER", "0.5")]
    fn test_from_vars_rejects(#[case] key: &str, #[case] value: &str) {
        let err = RotationConfig::from_vars([(key, value)]).unwrap_err();
        assert!(matches!(err, RotationError::Config { .. }), "{err}");
    }

    #[test]
    fn test_max_backoff_below_initial_rejected() {
        let mut config = RotationConfig::default();
        config.retry_backoff.max_backoff = Duration::from_secs(1);
        assert!(config.validate().is_err());
    }
}
