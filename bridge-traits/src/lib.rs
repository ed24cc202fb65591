//! # Host Bridge Traits
//!
//! Contracts between the playback core and its external collaborators.
//!
//! ## Overview
//!
//! The core owns the playback state machine, the download queue and the disk
//! cache. Everything else is supplied by the host through the traits below, so
//! that the same core can run against a real media server and audio engine or
//! against in-memory fakes in tests.
//!
//! ## Traits
//!
//! ### Content
//! - [`ContentSource`](content::ContentSource) - Playable book lookup and payload streaming
//! - [`ProgressSink`](progress::ProgressSink) - Remote listening-progress persistence
//!
//! ### Playback
//! - [`AudioEngine`](engine::AudioEngine) - Decode/render engine driven one file at a time
//!
//! ### Utilities
//! - [`Clock`](time::Clock) - Wall clock for timestamps
//! - [`LoggerSink`](time::LoggerSink) - Forward structured logs to host logging
//!
//! ## Error Handling
//!
//! All bridge traits use [`BridgeError`](error::BridgeError). Implementations
//! should convert platform errors into it and keep messages actionable
//! (include URLs, statuses, paths).
//!
//! ## Thread Safety
//!
//! Every trait requires `Send + Sync`; the core shares implementations across
//! Tokio tasks behind `Arc`.

pub mod content;
pub mod engine;
pub mod error;
pub mod progress;
pub mod time;

pub use error::BridgeError;

// Re-export commonly used types
pub use content::{
    ContentSource, DownloadStream, PlayableBook, RemoteAudioTrack, RemoteChapter,
    RemoteTrackMetadata,
};
pub use engine::{AudioEngine, EngineSignal};
pub use progress::{ProgressSink, ProgressUpdate};
pub use time::{Clock, ConsoleLogger, LogEntry, LogLevel, LoggerSink, SystemClock};
