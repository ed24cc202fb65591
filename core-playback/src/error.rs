//! # Playback Error Types
//!
//! Error types for player commands and the download cache.

use bridge_traits::BridgeError;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during playback operations.
#[derive(Error, Debug)]
pub enum PlaybackError {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// A command that needs a book was issued before `load_book`.
    #[error("No book loaded")]
    NoBookLoaded,

    /// Invalid cache or player settings.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Runtime wiring failed (missing bridge, no Tokio runtime).
    #[error(transparent)]
    Runtime(#[from] core_runtime::Error),

    // ========================================================================
    // Readiness Errors
    // ========================================================================
    /// The file needed for a cold start has not been downloaded yet.
    #[error("Audio file {file_index} is not downloaded yet")]
    NotReady { file_index: usize },

    /// A bounded wait expired (engine readiness, download completion).
    #[error("Timed out after {after:?} waiting for {operation}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    // ========================================================================
    // State & Argument Errors
    // ========================================================================
    /// The command is not valid in the current playback state.
    #[error("Cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: crate::PlaybackState,
    },

    /// Seek target outside `[0, duration]`.
    #[error("Position {position:.3}s is outside the book (0..={duration:.3}s)")]
    InvalidPosition { position: f64, duration: f64 },

    #[error("Chapter {index} does not exist (book has {count} chapters)")]
    InvalidChapter { index: usize, count: usize },

    #[error("Audio file {index} does not exist (book has {count} files)")]
    InvalidFileIndex { index: usize, count: usize },

    #[error("Already at the last chapter")]
    NoNextChapter,

    #[error("Already at the first chapter")]
    NoPreviousChapter,

    /// `stop()` interrupted the command.
    #[error("Cancelled by stop")]
    Cancelled,

    // ========================================================================
    // I/O Errors
    // ========================================================================
    /// Download of an audio file failed. Partial data has been removed.
    #[error("Download of file {file_index} failed: {message}")]
    Download { file_index: usize, message: String },

    /// The audio engine rejected a command.
    #[error("Audio engine error: {0}")]
    Engine(#[source] BridgeError),

    /// Content source or progress sink failure.
    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // ========================================================================
    // Generic Errors
    // ========================================================================
    /// Internal error (should not occur in normal operation).
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse classification of [`PlaybackError`] for hosts that only need to
/// decide how to surface a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Configuration,
    NotReady,
    Io,
    Timeout,
    State,
    Internal,
}

impl PlaybackError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PlaybackError::NoBookLoaded
            | PlaybackError::Config(_)
            | PlaybackError::Runtime(_) => ErrorKind::Configuration,
            PlaybackError::NotReady { .. } => ErrorKind::NotReady,
            PlaybackError::Timeout { .. } => ErrorKind::Timeout,
            PlaybackError::InvalidState { .. }
            | PlaybackError::InvalidPosition { .. }
            | PlaybackError::InvalidChapter { .. }
            | PlaybackError::InvalidFileIndex { .. }
            | PlaybackError::NoNextChapter
            | PlaybackError::NoPreviousChapter
            | PlaybackError::Cancelled => ErrorKind::State,
            PlaybackError::Download { .. }
            | PlaybackError::Engine(_)
            | PlaybackError::Bridge(_)
            | PlaybackError::Io(_) => ErrorKind::Io,
            PlaybackError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Returns `true` if repeating the command later may succeed.
    ///
    /// The core never retries on its own; this is a hint for the host.
    pub fn is_transient(&self) -> bool {
        match self {
            PlaybackError::NotReady { .. }
            | PlaybackError::Timeout { .. }
            | PlaybackError::Download { .. }
            | PlaybackError::Io(_) => true,
            PlaybackError::Bridge(err) | PlaybackError::Engine(err) => err.is_transient(),
            _ => false,
        }
    }

    pub(crate) fn timeout(operation: &'static str, after: Duration) -> Self {
        PlaybackError::Timeout { operation, after }
    }
}

/// Result type for playback operations.
pub type Result<T> = std::result::Result<T, PlaybackError>;
