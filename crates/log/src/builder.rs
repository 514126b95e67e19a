//! Subscriber assembly and the guard that keeps it alive

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::Subscriber;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::fmt::TestWriter;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry, reload};

use crate::config::{Config, DisplayConfig, Format, Writer};
use crate::{LogError, LogResult};

type BoxedLayer<S> = Box<dyn Layer<S> + Send + Sync + 'static>;

/// Parse filter directives
pub(crate) fn parse_filter(directives: &str) -> LogResult<EnvFilter> {
    EnvFilter::try_new(directives).map_err(|e| LogError::Filter(format!("{directives}: {e}")))
}

/// Handle for changing the filter of a running logger
#[derive(Clone)]
pub struct ReloadHandle {
    filter: reload::Handle<EnvFilter, Registry>,
    current: Arc<RwLock<String>>,
}

impl ReloadHandle {
    /// Replace the active filter
    ///
    /// # Errors
    ///
    /// Returns [`LogError::Filter`] for bad directives, [`LogError::Config`]
    /// if the subscriber is gone.
    pub fn reload(&self, directives: &str) -> LogResult<()> {
        let filter = parse_filter(directives)?;
        self.filter
            .reload(filter)
            .map_err(|e| LogError::Config(format!("failed to reload filter: {e}")))?;
        *self.current.write() = directives.to_string();
        Ok(())
    }

    /// Directives currently in effect
    #[must_use]
    pub fn current_filter(&self) -> String {
        self.current.read().clone()
    }
}

impl std::fmt::Debug for ReloadHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReloadHandle")
            .field("current", &*self.current.read())
            .finish_non_exhaustive()
    }
}

fn filter_layer(
    filter: EnvFilter,
    directives: &str,
    reloadable: bool,
) -> (BoxedLayer<Registry>, Option<ReloadHandle>) {
    if reloadable {
        let (layer, handle) = reload::Layer::new(filter);
        let handle = ReloadHandle {
            filter: handle,
            current: Arc::new(RwLock::new(directives.to_string())),
        };
        (Box::new(layer), Some(handle))
    } else {
        (Box::new(filter), None)
    }
}

fn make_writer(writer: Writer) -> BoxMakeWriter {
    match writer {
        Writer::Stdout => BoxMakeWriter::new(std::io::stdout),
        Writer::Stderr => BoxMakeWriter::new(std::io::stderr),
        Writer::Test => BoxMakeWriter::new(TestWriter::new()),
    }
}

/// Apply display toggles and box, dropping the timer when asked
macro_rules! boxed_fmt_layer {
    ($layer:expr, $display:expr) => {{
        let display: &DisplayConfig = $display;
        let layer = $layer
            .with_target(display.target)
            .with_file(display.source)
            .with_line_number(display.source)
            .with_thread_ids(display.thread_ids)
            .with_ansi(display.colors);
        if display.time {
            Box::new(layer) as BoxedLayer<S>
        } else {
            Box::new(layer.without_time()) as BoxedLayer<S>
        }
    }};
}

fn fmt_layer<S>(format: Format, display: &DisplayConfig, writer: BoxMakeWriter) -> BoxedLayer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a> + Send + Sync + 'static,
{
    let base = tracing_subscriber::fmt::layer().with_writer(writer);
    match format {
        Format::Pretty => boxed_fmt_layer!(base.pretty(), display),
        Format::Compact => boxed_fmt_layer!(base.compact(), display),
        Format::Json => boxed_fmt_layer!(
            base.json()
                .flatten_event(display.flatten)
                .with_current_span(true),
            display
        ),
    }
}

/// Builds and installs the global subscriber
#[derive(Debug)]
pub struct LoggerBuilder {
    config: Config,
}

impl LoggerBuilder {
    /// Create builder from config
    #[must_use]
    pub const fn from_config(config: Config) -> Self {
        Self { config }
    }

    /// Install the subscriber
    ///
    /// When a global subscriber is already installed the existing one is
    /// kept and an inactive guard is returned.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::Filter`] if the level directives do not parse.
    pub fn build(self) -> LogResult<LoggerGuard> {
        let Config {
            level,
            format,
            writer,
            display,
            fields,
            reloadable,
        } = self.config;

        let filter = parse_filter(&level)?;
        let (filter, reload_handle) = filter_layer(filter, &level, reloadable);
        let subscriber = Registry::default()
            .with(filter)
            .with(fmt_layer(format, &display, make_writer(writer)));

        if subscriber.try_init().is_err() {
            return Ok(LoggerGuard::inactive());
        }

        let root_span = (!fields.is_empty()).then(|| {
            tracing::info_span!(
                "app",
                service = fields.service.as_deref().unwrap_or(""),
                env = fields.env.as_deref().unwrap_or(""),
                version = fields.version.as_deref().unwrap_or(""),
                instance = fields.instance.as_deref().unwrap_or(""),
            )
            .entered()
        });

        tracing::debug!(level = %level, ?format, "logger initialized");
        Ok(LoggerGuard {
            inner: Some(Inner {
                reload_handle,
                _root_span: root_span,
            }),
        })
    }
}

struct Inner {
    reload_handle: Option<ReloadHandle>,
    _root_span: Option<tracing::span::EnteredSpan>,
}

/// Keeps the root span entered and owns the reload handle
///
/// The global subscriber itself stays installed for the life of the process.
pub struct LoggerGuard {
    inner: Option<Inner>,
}

impl LoggerGuard {
    const fn inactive() -> Self {
        Self { inner: None }
    }

    /// Whether this call installed the global subscriber
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.inner.is_some()
    }

    /// Runtime filter control, present when the config was reloadable
    #[must_use]
    pub fn reload_handle(&self) -> Option<&ReloadHandle> {
        self.inner.as_ref().and_then(|inner| inner.reload_handle.as_ref())
    }
}

impl std::fmt::Debug for LoggerGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoggerGuard")
            .field("active", &self.is_active())
            .field("reload_handle", &self.reload_handle())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_filter_accepts_directives() {
        assert!(parse_filter("info,vigil_rotation=debug").is_ok());
    }

    #[test]
    fn test_parse_filter_reports_directives() {
        let err = parse_filter("vigil_rotation=loud").unwrap_err();
        match err {
            LogError::Filter(message) => assert!(message.starts_with("vigil_rotation=loud: ")),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_filter_layer_handle_only_when_reloadable() {
        let (_, handle) = filter_layer(parse_filter("info").unwrap(), "info", false);
        assert!(handle.is_none());

        let (_, handle) = filter_layer(parse_filter("info").unwrap(), "info", true);
        assert_eq!(handle.unwrap().current_filter(), "info");
    }
}
