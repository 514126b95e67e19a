//! Logger configuration and presets

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{LogError, LogResult};

/// Output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    /// Multi-line, human-oriented
    Pretty,
    /// Single line per event
    #[default]
    Compact,
    /// One JSON object per event
    Json,
}

impl FromStr for Format {
    type Err = LogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            other => Err(LogError::Config(format!("unknown log format {other:?}"))),
        }
    }
}

/// Where formatted events go
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Writer {
    /// Standard output
    #[default]
    Stdout,
    /// Standard error
    Stderr,
    /// libtest's captured output
    Test,
}

/// What each event line shows
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Timestamp
    pub time: bool,
    /// Event target (module path)
    pub target: bool,
    /// Source file and line
    pub source: bool,
    /// Thread ids
    pub thread_ids: bool,
    /// ANSI colors
    pub colors: bool,
    /// JSON only: event fields at the top level instead of under `fields`
    pub flatten: bool,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            time: true,
            target: true,
            source: false,
            thread_ids: false,
            colors: true,
            flatten: false,
        }
    }
}

/// Service-wide fields attached to every event through a root span
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Fields {
    /// Service name
    pub service: Option<String>,
    /// Deployment environment
    pub env: Option<String>,
    /// Service version
    pub version: Option<String>,
    /// Instance id
    pub instance: Option<String>,
}

impl Fields {
    /// No field is set
    pub fn is_empty(&self) -> bool {
        self.service.is_none()
            && self.env.is_none()
            && self.version.is_none()
            && self.instance.is_none()
    }
}

/// Logger configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// `EnvFilter` directives, e.g. `info,vigil_rotation=debug`
    pub level: String,
    /// Output format
    pub format: Format,
    /// Output destination
    pub writer: Writer,
    /// Line contents
    pub display: DisplayConfig,
    /// Service-wide fields
    pub fields: Fields,
    /// Allow changing the filter at runtime through a [`ReloadHandle`](crate::ReloadHandle)
    pub reloadable: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: Format::default(),
            writer: Writer::default(),
            display: DisplayConfig::default(),
            fields: Fields::default(),
            reloadable: false,
        }
    }
}

fn parse_bool(name: &str, value: &str) -> LogResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(LogError::Config(format!("{name}: expected a boolean, got {value:?}"))),
    }
}

impl Config {
    /// Defaults overridden by the process environment
    pub fn from_env() -> LogResult<Self> {
        Self::from_vars(std::env::vars())
    }

    /// Defaults overridden by environment-style variables
    ///
    /// `VIGIL_LOG` (falling back to `RUST_LOG`) sets the filter;
    /// `VIGIL_LOG_FORMAT`, `VIGIL_LOG_COLORS`, `VIGIL_LOG_TIME` and
    /// `VIGIL_LOG_SOURCE` the output; `VIGIL_SERVICE`, `VIGIL_ENV`,
    /// `VIGIL_VERSION` and `VIGIL_INSTANCE` the global fields.
    pub fn from_vars<I, K, V>(vars: I) -> LogResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut config = Self::default();
        let mut rust_log = None;
        let mut vigil_log = None;

        for (key, value) in vars {
            let (key, value) = (key.as_ref(), value.as_ref());
            match key {
                "VIGIL_LOG" => vigil_log = Some(value.to_string()),
                "RUST_LOG" => rust_log = Some(value.to_string()),
                "VIGIL_LOG_FORMAT" => config.format = value.parse()?,
                "VIGIL_LOG_COLORS" => config.display.colors = parse_bool(key, value)?,
                "VIGIL_LOG_TIME" => config.display.time = parse_bool(key, value)?,
                "VIGIL_LOG_SOURCE" => config.display.source = parse_bool(key, value)?,
                "VIGIL_SERVICE" => config.fields.service = Some(value.to_string()),
                "VIGIL_ENV" => config.fields.env = Some(value.to_string()),
                "VIGIL_VERSION" => config.fields.version = Some(value.to_string()),
                "VIGIL_INSTANCE" => config.fields.instance = Some(value.to_string()),
                _ => {}
            }
        }
        if let Some(level) = vigil_log.or(rust_log) {
            config.level = level;
        }
        Ok(config)
    }

    /// Development configuration (pretty, debug level)
    #[must_use]
    pub fn development() -> Self {
        Self {
            level: "debug".to_string(),
            format: Format::Pretty,
            display: DisplayConfig {
                colors: true,
                source: true,
                ..DisplayConfig::default()
            },
            ..Self::default()
        }
    }

    /// Production configuration (JSON, info level)
    #[must_use]
    pub fn production() -> Self {
        Self {
            level: "info".to_string(),
            format: Format::Json,
            display: DisplayConfig {
                colors: false,
                source: false,
                flatten: true,
                ..DisplayConfig::default()
            },
            ..Self::default()
        }
    }

    /// Test configuration: compact lines into libtest's captured output
    #[must_use]
    pub fn test() -> Self {
        Self {
            level: "debug".to_string(),
            format: Format::Compact,
            writer: Writer::Test,
            display: DisplayConfig {
                colors: false,
                time: false,
                ..DisplayConfig::default()
            },
            ..Self::default()
        }
    }
}
