//! # vigil-log
//!
//! Structured logging setup shared by Vigil services and their tests.
//!
//! One global `tracing` subscriber is assembled from a [`Config`]:
//! an `EnvFilter` (optionally reloadable at runtime), a formatting layer
//! (pretty, compact or JSON) and a root span carrying service-wide fields.
//!
//! ```no_run
//! use vigil_log::{Config, Format};
//!
//! // VIGIL_LOG / RUST_LOG, VIGIL_LOG_FORMAT, ...
//! let _guard = vigil_log::auto_init()?;
//!
//! // or explicitly
//! let config = Config {
//!     level: "info,vigil_rotation=debug".into(),
//!     format: Format::Json,
//!     reloadable: true,
//!     ..Config::production()
//! };
//! let guard = vigil_log::init_with(config)?;
//! if let Some(handle) = guard.reload_handle() {
//!     handle.reload("warn")?;
//! }
//! # Ok::<(), vigil_log::LogError>(())
//! ```

#![forbid(unsafe_code)]

mod builder;
mod config;
mod error;

pub use builder::{LoggerBuilder, LoggerGuard, ReloadHandle};
pub use config::{Config, DisplayConfig, Fields, Format, Writer};
pub use error::{LogError, LogResult};

/// Install a logger configured from the environment
///
/// # Errors
///
/// Returns an error if a variable holds an unusable value.
pub fn auto_init() -> LogResult<LoggerGuard> {
    init_with(Config::from_env()?)
}

/// Install a logger with the given configuration
///
/// # Errors
///
/// Returns [`LogError::Filter`] if the level directives do not parse.
pub fn init_with(config: Config) -> LogResult<LoggerGuard> {
    LoggerBuilder::from_config(config).build()
}

/// Route logs into libtest's captured output
///
/// Safe to call from every test; only the first call installs anything.
/// `VIGIL_LOG`/`RUST_LOG` override the default `debug` filter.
pub fn init_test() {
    let mut config = Config::test();
    if let Ok(level) = std::env::var("VIGIL_LOG").or_else(|_| std::env::var("RUST_LOG")) {
        config.level = level;
    }
    // an unparsable override falls back to the preset
    if init_with(config).is_err() {
        let _ = init_with(Config::test());
    }
}
