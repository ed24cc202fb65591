//! # Core Configuration Module
//!
//! Wires host bridges and tunables into the playback core.
//!
//! ## Overview
//!
//! A [`CoreConfig`] is assembled with [`CoreConfigBuilder`] and validated
//! fail-fast: a missing bridge is reported as
//! [`Error::CapabilityMissing`] with an actionable message before any player
//! is constructed.
//!
//! ## Required Dependencies
//!
//! - `ContentSource` - playable-book lookup and payload downloads
//! - `AudioEngine` - decode/render engine
//! - cache directory
//!
//! ## Optional Dependencies
//!
//! - `ProgressSink` - remote listening-progress sync
//! - `LoggerSink` - host logging pipeline
//! - `Clock` - defaults to [`SystemClock`]
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::CoreConfig;
//! use std::sync::Arc;
//!
//! let config = CoreConfig::builder()
//!     .content_source(Arc::new(MyServerClient::new()))
//!     .audio_engine(Arc::new(MyMpvEngine::spawn()?))
//!     .cache_dir("/home/me/.cache/tome")
//!     .cache_size_mb(2048)
//!     .enable_progress_sync(true)
//!     .progress_sink(Arc::new(MyServerClient::new()))
//!     .build()?;
//! ```
//!
//! ## Error Handling
//!
//! ```should_panic
//! use core_runtime::config::CoreConfig;
//!
//! // Missing ContentSource and AudioEngine
//! let config = CoreConfig::builder()
//!     .cache_dir("/tmp/tome")
//!     .build()
//!     .expect("Should fail - missing required bridges");
//! ```

use crate::error::{Error, Result};
use bridge_traits::{AudioEngine, Clock, ContentSource, LoggerSink, ProgressSink, SystemClock};
use std::path::PathBuf;
use std::sync::Arc;

/// Default on-disk cache budget (4 GB).
pub const DEFAULT_CACHE_SIZE_MB: usize = 4096;

/// Default age after which cached audio is no longer trusted.
pub const DEFAULT_CACHE_EXPIRY_DAYS: u32 = 30;

const MAX_CACHE_SIZE_MB: usize = 100_000;

/// Core configuration for the playback engine.
///
/// Use [`CoreConfigBuilder`] to construct instances.
#[derive(Clone)]
pub struct CoreConfig {
    /// Directory holding downloaded audio files
    pub cache_dir: PathBuf,

    /// Maximum cache size in megabytes
    pub cache_size_mb: usize,

    /// Cached files older than this are downloaded again
    pub cache_expiry_days: u32,

    pub content_source: Arc<dyn ContentSource>,

    pub audio_engine: Arc<dyn AudioEngine>,

    /// Remote progress persistence (required when progress sync is enabled)
    pub progress_sink: Option<Arc<dyn ProgressSink>>,

    pub logger_sink: Option<Arc<dyn LoggerSink>>,

    pub clock: Arc<dyn Clock>,

    pub features: FeatureFlags,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreConfig")
            .field("cache_dir", &self.cache_dir)
            .field("cache_size_mb", &self.cache_size_mb)
            .field("cache_expiry_days", &self.cache_expiry_days)
            .field("content_source", &"ContentSource { ... }")
            .field("audio_engine", &"AudioEngine { ... }")
            .field(
                "progress_sink",
                &self.progress_sink.as_ref().map(|_| "ProgressSink { ... }"),
            )
            .field(
                "logger_sink",
                &self.logger_sink.as_ref().map(|_| "LoggerSink { ... }"),
            )
            .field("features", &self.features)
            .finish()
    }
}

/// Feature flags control optional functionality.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureFlags {
    /// Periodically push listening progress to the `ProgressSink`
    pub enable_progress_sync: bool,

    /// Queue background downloads of the files around the current one
    pub prefetch_neighbors: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            enable_progress_sync: false,
            prefetch_neighbors: true,
        }
    }
}

impl CoreConfig {
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Cache budget in bytes.
    pub fn cache_size_bytes(&self) -> u64 {
        self.cache_size_mb as u64 * 1024 * 1024
    }

    /// Validates the configuration and returns an error if invalid.
    ///
    /// This checks:
    /// - Cache directory is not empty
    /// - Cache size is within `1..=100_000` MB
    /// - Expiry window is at least one day
    /// - Feature flags are consistent with available bridges
    pub fn validate(&self) -> Result<()> {
        if self.cache_dir.as_os_str().is_empty() {
            return Err(Error::Config("Cache directory cannot be empty".to_string()));
        }

        if self.cache_size_mb == 0 {
            return Err(Error::Config(
                "Cache size must be greater than 0 MB".to_string(),
            ));
        }

        if self.cache_size_mb > MAX_CACHE_SIZE_MB {
            return Err(Error::Config(
                "Cache size exceeds maximum of 100GB (100,000 MB)".to_string(),
            ));
        }

        if self.cache_expiry_days == 0 {
            return Err(Error::Config(
                "Cache expiry must be at least 1 day".to_string(),
            ));
        }

        if self.features.enable_progress_sync && self.progress_sink.is_none() {
            return Err(Error::Config(
                "Progress sync enabled but no ProgressSink provided. \
                 Disable the feature or inject a ProgressSink implementation."
                    .to_string(),
            ));
        }

        Ok(())
    }
}

/// Builder for constructing [`CoreConfig`] instances.
#[derive(Default)]
pub struct CoreConfigBuilder {
    cache_dir: Option<PathBuf>,
    cache_size_mb: Option<usize>,
    cache_expiry_days: Option<u32>,
    content_source: Option<Arc<dyn ContentSource>>,
    audio_engine: Option<Arc<dyn AudioEngine>>,
    progress_sink: Option<Arc<dyn ProgressSink>>,
    logger_sink: Option<Arc<dyn LoggerSink>>,
    clock: Option<Arc<dyn Clock>>,
    features: FeatureFlags,
}

impl CoreConfigBuilder {
    /// Sets the cache directory (required). Created on first download.
    pub fn cache_dir<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.cache_dir = Some(path.into());
        self
    }

    /// Sets the cache budget in megabytes. Default: 4096.
    pub fn cache_size_mb(mut self, size_mb: usize) -> Self {
        self.cache_size_mb = Some(size_mb);
        self
    }

    /// Sets the cache expiry window in days. Default: 30.
    pub fn cache_expiry_days(mut self, days: u32) -> Self {
        self.cache_expiry_days = Some(days);
        self
    }

    pub fn content_source(mut self, source: Arc<dyn ContentSource>) -> Self {
        self.content_source = Some(source);
        self
    }

    pub fn audio_engine(mut self, engine: Arc<dyn AudioEngine>) -> Self {
        self.audio_engine = Some(engine);
        self
    }

    pub fn progress_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.progress_sink = Some(sink);
        self
    }

    pub fn logger_sink(mut self, sink: Arc<dyn LoggerSink>) -> Self {
        self.logger_sink = Some(sink);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn enable_progress_sync(mut self, enabled: bool) -> Self {
        self.features.enable_progress_sync = enabled;
        self
    }

    pub fn prefetch_neighbors(mut self, enabled: bool) -> Self {
        self.features.prefetch_neighbors = enabled;
        self
    }

    pub fn features(mut self, features: FeatureFlags) -> Self {
        self.features = features;
        self
    }

    /// Builds and validates the configuration.
    ///
    /// # Errors
    ///
    /// - [`Error::CapabilityMissing`] when `ContentSource` or `AudioEngine`
    ///   was not injected
    /// - [`Error::Config`] for a missing cache directory or invalid values
    pub fn build(self) -> Result<CoreConfig> {
        let content_source = self.content_source.ok_or_else(|| {
            Error::capability_missing(
                "ContentSource",
                "ContentSource implementation is required to look up books and download audio. \
                 Desktop: enable the 'desktop-shims' feature and inject bridge_desktop::AbsHttpClient.",
            )
        })?;

        let audio_engine = self.audio_engine.ok_or_else(|| {
            Error::capability_missing(
                "AudioEngine",
                "AudioEngine implementation is required for playback. \
                 Inject an adapter over the host's media player (mpv, GStreamer, AVPlayer).",
            )
        })?;

        let cache_dir = self.cache_dir.ok_or_else(|| {
            Error::Config("Cache directory is required. Use .cache_dir() to set it.".to_string())
        })?;

        let config = CoreConfig {
            cache_dir,
            cache_size_mb: self.cache_size_mb.unwrap_or(DEFAULT_CACHE_SIZE_MB),
            cache_expiry_days: self.cache_expiry_days.unwrap_or(DEFAULT_CACHE_EXPIRY_DAYS),
            content_source,
            audio_engine,
            progress_sink: self.progress_sink,
            logger_sink: self.logger_sink,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            features: self.features,
        };

        config.validate()?;

        Ok(config)
    }
}
