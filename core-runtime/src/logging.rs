//! # Logging
//!
//! Installs the global `tracing` subscriber for the player:
//! - one `fmt` layer in the chosen [`LogFormat`]
//! - an `EnvFilter` that follows [`LoggingConfig::level`] for our crates and
//!   keeps HTTP plumbing at warn
//! - optional mirroring of events into a host [`LoggerSink`]
//!
//! ```ignore
//! use core_runtime::logging::{init_logging, LogFormat, LoggingConfig};
//!
//! init_logging(LoggingConfig::default().with_format(LogFormat::Compact))?;
//! tracing::info!(file_index = 2, "Switched file");
//! ```

use crate::error::{Error, Result};

use bridge_traits::time::{LogEntry, LogLevel, LoggerSink};

use std::fmt;
use std::sync::Arc;

use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::{
    filter::EnvFilter,
    fmt::format::FmtSpan,
    layer::{Context, SubscriberExt},
    registry::LookupSpan,
    util::SubscriberInitExt,
    Layer,
};

/// Crates whose events follow the configured level by default.
const WORKSPACE_CRATES: &[&str] = &[
    "core_runtime",
    "core_playback",
    "bridge_traits",
    "bridge_desktop",
    "tome_workspace",
];

/// Dependencies that are only interesting when something goes wrong.
const QUIET_CRATES: &[&str] = &["h2", "hyper", "hyper_util", "reqwest", "rustls"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    /// One JSON object per line
    Json,
    Compact,
}

impl Default for LogFormat {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            Self::Pretty
        } else {
            Self::Json
        }
    }
}

#[derive(Clone)]
pub struct LoggingConfig {
    pub format: LogFormat,
    /// Level for workspace crates; ignored when `filter` is set.
    pub level: LogLevel,
    /// Full `EnvFilter` directive string, e.g. "core_playback=trace".
    pub filter: Option<String>,
    pub logger_sink: Option<Arc<dyn LoggerSink>>,
    /// Log span enter/exit (pretty) or attach span context (JSON).
    pub enable_spans: bool,
    pub display_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            level: LogLevel::Info,
            filter: None,
            logger_sink: None,
            enable_spans: false,
            display_target: true,
        }
    }
}

impl fmt::Debug for LoggingConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoggingConfig")
            .field("format", &self.format)
            .field("level", &self.level)
            .field("filter", &self.filter)
            .field("has_logger_sink", &self.logger_sink.is_some())
            .finish_non_exhaustive()
    }
}

impl LoggingConfig {
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn with_logger_sink(mut self, sink: Arc<dyn LoggerSink>) -> Self {
        self.logger_sink = Some(sink);
        self
    }

    pub fn with_spans(mut self, enable: bool) -> Self {
        self.enable_spans = enable;
        self
    }

    pub fn with_target(mut self, display: bool) -> Self {
        self.display_target = display;
        self
    }

    fn env_filter(&self) -> Result<EnvFilter> {
        let directives = match &self.filter {
            Some(custom) => custom.clone(),
            None => default_directives(self.level),
        };
        EnvFilter::try_new(directives)
            .map_err(|e| Error::Config(format!("Invalid log filter: {}", e)))
    }
}

/// Install the global subscriber. Call once at startup.
///
/// # Errors
///
/// [`Error::Config`] when the filter does not parse or a global subscriber
/// is already set.
pub fn init_logging(config: LoggingConfig) -> Result<()> {
    let filter = config.env_filter()?;
    let spans = config.enable_spans;
    let target = config.display_target;

    let output = match config.format {
        LogFormat::Pretty => tracing_subscriber::fmt::layer()
            .pretty()
            .with_target(target)
            .with_span_events(if spans { FmtSpan::ACTIVE } else { FmtSpan::NONE })
            .boxed(),
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(spans)
            .with_span_list(spans)
            .with_target(target)
            .boxed(),
        LogFormat::Compact => tracing_subscriber::fmt::layer()
            .compact()
            .with_target(target)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(output)
        .with(config.logger_sink.map(LoggerSinkLayer::new))
        .with(filter)
        .try_init()
        .map_err(|e| Error::Config(format!("Failed to initialize logging: {}", e)))
}

fn default_directives(level: LogLevel) -> String {
    let level = level.as_str().to_lowercase();
    WORKSPACE_CRATES
        .iter()
        .map(|krate| format!("{}={}", krate, level))
        .chain(QUIET_CRATES.iter().map(|krate| format!("{}=warn", krate)))
        .collect::<Vec<_>>()
        .join(",")
}

/// Mirrors events at or above the sink's `min_level` into a [`LoggerSink`].
struct LoggerSinkLayer {
    sink: Arc<dyn LoggerSink>,
}

impl LoggerSinkLayer {
    fn new(sink: Arc<dyn LoggerSink>) -> Self {
        Self { sink }
    }

    fn deliver(&self, entry: LogEntry) {
        let sink = Arc::clone(&self.sink);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = sink.log(entry).await {
                        eprintln!("logger sink failed: {}", e);
                    }
                });
            }
            // Outside a runtime (startup, tests) deliver inline.
            Err(_) => {
                if let Err(e) = futures::executor::block_on(sink.log(entry)) {
                    eprintln!("logger sink failed: {}", e);
                }
            }
        }
    }
}

impl<S> Layer<S> for LoggerSinkLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let metadata = event.metadata();
        let level = sink_level(metadata.level());
        if level < self.sink.min_level() {
            return;
        }

        let mut entry = LogEntry::new(level, metadata.target(), String::new());
        event.record(&mut EntryFields(&mut entry));
        if entry.message.is_empty() {
            entry.message = metadata.name().to_string();
        }
        entry.span_id = ctx.lookup_current().map(|span| span.name().to_string());

        self.deliver(entry);
    }
}

/// Records an event's `message` and fields straight into a [`LogEntry`].
struct EntryFields<'a>(&'a mut LogEntry);

impl EntryFields<'_> {
    fn put(&mut self, field: &Field, value: String) {
        match field.name() {
            "message" => self.0.message = value,
            name => {
                self.0.fields.insert(name.to_string(), value);
            }
        }
    }
}

impl Visit for EntryFields<'_> {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.put(field, value.to_string());
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.put(field, value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.put(field, format!("{:?}", value));
    }
}

fn sink_level(level: &tracing::Level) -> LogLevel {
    match *level {
        tracing::Level::TRACE => LogLevel::Trace,
        tracing::Level::DEBUG => LogLevel::Debug,
        tracing::Level::INFO => LogLevel::Info,
        tracing::Level::WARN => LogLevel::Warn,
        tracing::Level::ERROR => LogLevel::Error,
    }
}

/// File name of a cache path, so logs do not carry the user's home directory.
pub fn strip_path(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}
