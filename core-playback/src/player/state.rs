//! Mutable session state shared by player commands and the tracker.

use crate::index::TimelineIndex;
use crate::model::{Book, PlaybackState};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Everything that changes while a book plays.
///
/// Lives behind a single `parking_lot::Mutex`; never hold the guard across
/// an `.await`.
#[derive(Debug)]
pub(crate) struct SessionState {
    pub book: Option<Arc<Book>>,
    pub index: TimelineIndex,
    pub state: PlaybackState,
    pub file_index: usize,
    pub chapter_index: usize,
    /// Seconds on the book timeline.
    pub global_position: f64,
    /// Seconds into the current file.
    pub local_position: f64,
    pub speed: f64,
    pub volume: u8,
    /// Bumped on every explicit reposition so in-flight tracker reads lose.
    pub seek_epoch: u64,
    /// Set while the engine is being moved to another file; tracker reads
    /// taken meanwhile belong to neither file.
    pub switching: bool,
    /// Cancelled by `stop()`; tracker and readiness waits of the current run
    /// observe it.
    pub run: CancellationToken,
}

impl SessionState {
    pub fn new(speed: f64, volume: u8) -> Self {
        Self {
            book: None,
            index: TimelineIndex::default(),
            state: PlaybackState::Stopped,
            file_index: 0,
            chapter_index: 0,
            global_position: 0.0,
            local_position: 0.0,
            speed,
            volume,
            seek_epoch: 0,
            switching: false,
            run: CancellationToken::new(),
        }
    }

    pub fn install(&mut self, book: Arc<Book>) {
        let index = TimelineIndex::for_book(&book);
        let start = book.start_position();
        let (file_index, local) = index.file_from_position(start);

        self.chapter_index = index.chapter_from_position(start);
        self.file_index = file_index;
        self.local_position = local;
        self.global_position = start;
        self.index = index;
        self.book = Some(book);
        self.state = PlaybackState::Stopped;
        self.seek_epoch += 1;
        self.switching = false;
    }

    pub fn unload(&mut self) {
        self.book = None;
        self.index = TimelineIndex::default();
        self.state = PlaybackState::Stopped;
        self.file_index = 0;
        self.chapter_index = 0;
        self.global_position = 0.0;
        self.local_position = 0.0;
        self.seek_epoch += 1;
        self.switching = false;
    }

    /// Mark the start of a file switch. Position reads are discarded until
    /// [`reposition`](Self::reposition) or [`abort_switch`](Self::abort_switch).
    pub fn begin_switch(&mut self) {
        self.switching = true;
        self.seek_epoch += 1;
    }

    pub fn abort_switch(&mut self) {
        self.switching = false;
        self.seek_epoch += 1;
    }

    /// Move to `global` inside `file_index`. Returns the new chapter index
    /// when it changed.
    pub fn reposition(&mut self, file_index: usize, global: f64, local: f64) -> Option<usize> {
        self.file_index = file_index;
        self.global_position = global;
        self.local_position = local;
        self.seek_epoch += 1;
        self.switching = false;
        self.update_chapter()
    }

    pub fn update_chapter(&mut self) -> Option<usize> {
        let chapter = self.index.chapter_from_position(self.global_position);
        if chapter != self.chapter_index {
            self.chapter_index = chapter;
            Some(chapter)
        } else {
            None
        }
    }

    /// Swap in a fresh run token, cancelling the previous one.
    pub fn restart_run(&mut self) -> CancellationToken {
        self.run.cancel();
        self.run = CancellationToken::new();
        self.run.clone()
    }

    pub fn snapshot(&self) -> Option<PlaybackSnapshot> {
        let book = self.book.as_ref()?;
        Some(PlaybackSnapshot {
            book_id: book.id.clone(),
            library_item_id: book.library_item_id.clone(),
            position: self.global_position,
            duration: book.duration,
            state: self.state,
            file_index: self.file_index,
            chapter_index: self.chapter_index,
        })
    }
}

/// Point-in-time view of the player, e.g. for progress sync.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackSnapshot {
    pub book_id: String,
    pub library_item_id: String,
    pub position: f64,
    pub duration: f64,
    pub state: PlaybackState,
    pub file_index: usize,
    pub chapter_index: usize,
}

impl PlaybackSnapshot {
    pub fn progress_percentage(&self) -> f64 {
        if self.duration > 0.0 {
            (self.position / self.duration * 100.0).clamp(0.0, 100.0)
        } else {
            0.0
        }
    }
}
