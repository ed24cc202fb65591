//! # Event Bus System
//!
//! Typed player notifications delivered over `tokio::sync::broadcast`.
//!
//! ## Overview
//!
//! The playback core never calls back into the UI. Every observable change
//! (position ticks, chapter and file switches, download progress, state
//! transitions, failures) is published as a [`PlayerEvent`] on an
//! [`EventBus`], and any number of subscribers consume it independently.
//!
//! ```text
//! ┌─────────────────┐    emit    ┌───────────┐   subscribe   ┌────────────┐
//! │ Player commands ├───────────>│           ├──────────────>│  UI layer  │
//! └─────────────────┘            │ EventBus  │               └────────────┘
//! ┌─────────────────┐    emit    │ (broadcast│   subscribe   ┌────────────┐
//! │ Position tracker├───────────>│  channel) ├──────────────>│ Scrobbler  │
//! └─────────────────┘            │           │               └────────────┘
//! ┌─────────────────┐    emit    │           │
//! │ Download worker ├───────────>│           │
//! └─────────────────┘            └───────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{EventBus, PlayerEvent};
//! use tokio::sync::broadcast::error::RecvError;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let event_bus = EventBus::new(100);
//! let mut stream = event_bus.subscribe();
//!
//! tokio::spawn(async move {
//!     loop {
//!         match stream.recv().await {
//!             Ok(PlayerEvent::ChapterChanged { chapter_index }) => {
//!                 println!("Now in chapter {}", chapter_index);
//!             }
//!             Ok(_) => {}
//!             Err(RecvError::Lagged(n)) => eprintln!("Missed {} events", n),
//!             Err(RecvError::Closed) => break,
//!         }
//!     }
//! });
//! # }
//! ```
//!
//! ## Error Handling
//!
//! - **`RecvError::Lagged(n)`**: the subscriber fell behind and missed `n`
//!   events. Non-fatal; position ticks are the usual casualty.
//! - **`RecvError::Closed`**: every sender is gone, the player was dropped.
//!
//! Emitting with no subscribers is not an error for the player; it ignores
//! the `SendError`.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
///
/// The tracker emits five position ticks per second; 256 leaves a UI thread
/// roughly fifty seconds of slack before it lags.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 256;

/// Coarse playback state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PlaybackState {
    #[default]
    Stopped,
    Playing,
    Paused,
}

impl PlaybackState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlaybackState::Stopped => "stopped",
            PlaybackState::Playing => "playing",
            PlaybackState::Paused => "paused",
        }
    }

    /// Playing or paused, i.e. something is loaded in the engine.
    pub fn is_active(&self) -> bool {
        !matches!(self, PlaybackState::Stopped)
    }
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Notifications published by the player.
///
/// Positions are global book positions in seconds; indices are 0-based.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload")]
pub enum PlayerEvent {
    /// A book finished loading and its start file is playable.
    BookLoaded {
        book_id: String,
        title: String,
        file_count: usize,
        chapter_count: usize,
        start_position: f64,
    },
    /// The player moved between Stopped, Playing and Paused.
    StateChanged { state: PlaybackState },
    /// Periodic position tick.
    PositionChanged { position: f64, chapter_index: usize },
    /// The current chapter changed.
    ChapterChanged { chapter_index: usize },
    /// The engine now plays a different file.
    FileChanged { file_index: usize },
    /// The last file ended; the player is stopped.
    PlaybackEnded { book_id: String },
    /// Download of a file advanced by at least one whole percent.
    DownloadProgress { file_index: usize, percent: u8 },
    /// A file was downloaded and stored in the cache.
    DownloadCompleted { book_id: String, file_index: usize },
    /// A file could not be downloaded. Partial data was discarded.
    DownloadFailed {
        book_id: String,
        file_index: usize,
        message: String,
    },
    /// A failure the listener should know about (e.g. playback stopped
    /// because the next file could not be fetched).
    Error { message: String, recoverable: bool },
}

impl PlayerEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            PlayerEvent::BookLoaded { .. } => "Book loaded",
            PlayerEvent::StateChanged { .. } => "Playback state changed",
            PlayerEvent::PositionChanged { .. } => "Playback position changed",
            PlayerEvent::ChapterChanged { .. } => "Chapter changed",
            PlayerEvent::FileChanged { .. } => "Audio file changed",
            PlayerEvent::PlaybackEnded { .. } => "Playback ended",
            PlayerEvent::DownloadProgress { .. } => "Download progress",
            PlayerEvent::DownloadCompleted { .. } => "Download completed",
            PlayerEvent::DownloadFailed { .. } => "Download failed",
            PlayerEvent::Error { .. } => "Playback error",
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            PlayerEvent::Error { .. } => EventSeverity::Error,
            PlayerEvent::DownloadFailed { .. } => EventSeverity::Warning,
            PlayerEvent::BookLoaded { .. }
            | PlayerEvent::StateChanged { .. }
            | PlayerEvent::ChapterChanged { .. }
            | PlayerEvent::FileChanged { .. }
            | PlayerEvent::PlaybackEnded { .. } => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central event bus for publishing and subscribing to player events.
///
/// Cloning the bus clones the sender; all clones feed the same subscribers.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<PlayerEvent>,
}

impl EventBus {
    /// Creates a new event bus.
    ///
    /// `capacity` is the number of events buffered per subscriber before it
    /// starts receiving `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event, or an error
    /// if there are none.
    pub fn emit(&self, event: PlayerEvent) -> Result<usize, SendError<PlayerEvent>> {
        self.sender.send(event)
    }

    /// Creates a new subscriber. Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<PlayerEvent> {
        self.sender.subscribe()
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

type EventFilter = Box<dyn Fn(&PlayerEvent) -> bool + Send + Sync>;

/// A `broadcast::Receiver` with an optional predicate.
///
/// ```rust
/// use core_runtime::events::{EventBus, EventSeverity, EventStream};
///
/// let event_bus = EventBus::new(100);
/// let important = EventStream::new(event_bus.subscribe())
///     .filter(|event| event.severity() >= EventSeverity::Info);
/// ```
pub struct EventStream {
    receiver: Receiver<PlayerEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<PlayerEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Only events matching `predicate` will be returned by `recv()`.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&PlayerEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    /// Receives the next event that passes the filter.
    ///
    /// # Errors
    ///
    /// Returns `RecvError::Lagged(n)` if the subscriber fell behind by `n` events.
    /// Returns `RecvError::Closed` if all senders have been dropped.
    pub async fn recv(&mut self) -> Result<PlayerEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.matches(&event) {
                return Ok(event);
            }
        }
    }

    /// Attempts to receive an event without blocking.
    ///
    /// Returns `None` if no matching event is currently available.
    pub fn try_recv(&mut self) -> Option<Result<PlayerEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.matches(&event) {
                        return Some(Ok(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }

    fn matches(&self, event: &PlayerEvent) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(event))
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
