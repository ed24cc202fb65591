//! # Desktop Bridge Implementations
//!
//! Default implementations of the content and progress bridges for desktop
//! hosts talking to an Audiobookshelf server.
//!
//! ## Overview
//!
//! - [`AbsHttpClient`] implements `ContentSource` (playback sessions and audio
//!   downloads) and `ProgressSink` (local session sync) using `reqwest`
//! - [`default_audio_cache_dir`] picks the platform cache location
//!
//! The audio engine is not provided here; hosts adapt their media player
//! (mpv, GStreamer) to `AudioEngine` themselves.
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{default_audio_cache_dir, AbsHttpClient};
//! use core_runtime::config::CoreConfig;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = Arc::new(AbsHttpClient::new("https://abs.example.com")?);
//!     client.login("reader", "password").await?;
//!
//!     let config = CoreConfig::builder()
//!         .cache_dir(default_audio_cache_dir())
//!         .content_source(client.clone())
//!         .progress_sink(client)
//!         .audio_engine(engine)
//!         .enable_progress_sync(true)
//!         .build()?;
//!     Ok(())
//! }
//! ```

mod content;
mod http;
mod paths;
mod progress;

pub use http::AbsHttpClient;
pub use paths::default_audio_cache_dir;
