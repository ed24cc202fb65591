//! Audio engine bridge trait and supporting types.
//!
//! Decoding and rendering are delegated to a host-provided engine (mpv,
//! GStreamer, a platform media player). The core drives it through
//! [`AudioEngine`] one local file at a time and listens for its end-of-file
//! and idle notifications through [`AudioEngine::subscribe`].

use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use tokio::sync::broadcast;

use crate::error::Result;

/// Asynchronous notifications raised by the engine.
///
/// Engines are known to drop or duplicate these; consumers must treat them as
/// hints and tolerate both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineSignal {
    /// The loaded file played to its end.
    EndOfFile,
    /// The engine has nothing loaded or became idle.
    Idle,
}

/// Host decode/render engine.
///
/// `load` replaces whatever is currently loaded and starts playback of the new
/// file unless the engine is paused. Readiness is observed by polling
/// [`is_idle`](AudioEngine::is_idle); the engine is ready once it reports
/// `false`.
#[async_trait]
pub trait AudioEngine: Send + Sync {
    /// Load a local file into the engine.
    async fn load(&self, path: &Path) -> Result<()>;

    /// Pause or resume rendering.
    async fn set_paused(&self, paused: bool) -> Result<()>;

    /// Halt playback and unload the current file.
    async fn stop(&self) -> Result<()>;

    /// Seek to an absolute position within the loaded file.
    async fn seek(&self, position: Duration) -> Result<()>;

    /// Current position within the loaded file, `None` when the engine does not
    /// report one (nothing loaded, still probing, or already at EOF).
    async fn position(&self) -> Result<Option<Duration>>;

    /// Whether the engine is idle (nothing loaded or not yet started).
    async fn is_idle(&self) -> Result<bool>;

    /// Playback speed multiplier.
    async fn set_speed(&self, speed: f64) -> Result<()>;

    /// Output volume, `0..=100`.
    async fn set_volume(&self, volume: u8) -> Result<()>;

    /// Subscribe to engine notifications.
    fn subscribe(&self) -> broadcast::Receiver<EngineSignal>;
}
