//! # Audiobook Playback Core
//!
//! Plays a book that is split across several remote audio files as one
//! continuous timeline.
//!
//! ## Overview
//!
//! This crate handles:
//! - Mapping between the global timeline and (file, local offset) / chapter
//! - Downloading files on a single FIFO worker into a bounded disk cache
//! - Driving the host's audio engine through load, play, pause, stop and seek
//! - Following the engine position and recovering from missed end-of-file
//!   signals
//! - Periodic listening-progress sync
//!
//! Everything the player observes is published as
//! [`PlayerEvent`](core_runtime::events::PlayerEvent)s on the shared
//! [`EventBus`](core_runtime::events::EventBus).

pub mod cache;
pub mod error;
pub mod index;
pub mod model;
pub mod player;
pub mod progress;

pub use error::{ErrorKind, PlaybackError, Result};
pub use index::TimelineIndex;
pub use model::{AudioFile, Book, Chapter, PlaybackState};
pub use player::{PlaybackSnapshot, Player, PlayerConfig, TrackEndOutcome, TrackEndTrigger};
pub use progress::{ProgressConfig, ProgressReporter};
