//! Logger setup errors

use thiserror::Error;

/// Errors raised while configuring the logger
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LogError {
    /// Filter directive could not be parsed
    #[error("invalid log filter {0}")]
    Filter(String),

    /// Configuration value rejected, or a reload failed
    #[error("log configuration error: {0}")]
    Config(String),
}

/// Result type for logger setup
pub type LogResult<T> = Result<T, LogError>;
