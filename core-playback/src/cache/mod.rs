//! # Download Cache
//!
//! Keeps the audio files of the current book on local disk so the engine can
//! play them gaplessly.
//!
//! ## Overview
//!
//! - [`DownloadManager`] answers "is file N of this book local yet?" and
//!   queues downloads on a single FIFO worker when it is not
//! - [`DiskCache`] owns the cache directory: lookup with age expiry, atomic
//!   finalize, oldest-first space reclamation
//! - [`stable_fingerprint`] derives the on-disk name of each file
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_playback::cache::{CacheConfig, DownloadManager, DownloadMode};
//!
//! let manager = DownloadManager::new(CacheConfig::new(cache_dir), source, events)?;
//!
//! // Wait for the file the listener is about to hear
//! let ready = manager.request(&book, 0, DownloadMode::Blocking).await?;
//!
//! // Prefetch the next one
//! manager.request(&book, 1, DownloadMode::Background).await?;
//! ```

pub mod config;
pub mod fingerprint;
pub mod manager;
pub mod stats;
pub mod store;

pub use config::{CacheConfig, FingerprintScheme};
pub use fingerprint::{book_fingerprint, stable_fingerprint};
pub use manager::{DownloadManager, DownloadMode, DownloadTask, FileAvailability};
pub use stats::{CacheStats, DownloadProgress};
pub use store::{DiskCache, ReclaimReport};
