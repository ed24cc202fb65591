//! Book model.
//!
//! A [`Book`] is the immutable description of one loaded playback session:
//! the ordered audio files whose durations form the global timeline, and the
//! chapter markers laid over it.

use bridge_traits::{PlayableBook, RemoteAudioTrack, RemoteChapter};
use serde::{Deserialize, Serialize};

pub use core_runtime::events::PlaybackState;

/// One physical audio file. `index` is its 0-based position in the book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioFile {
    pub index: usize,
    /// Seconds.
    pub duration: f64,
    /// Payload size reported by the server, `0` when unknown.
    pub byte_len: u64,
    pub content_url: String,
}

/// Chapter marker on the global timeline (seconds, `start` inclusive,
/// `end` exclusive).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chapter {
    pub index: usize,
    pub start: f64,
    pub end: f64,
    pub title: String,
}

impl Chapter {
    pub fn contains(&self, position: f64) -> bool {
        self.start <= position && position < self.end
    }

    pub fn duration(&self) -> f64 {
        (self.end - self.start).max(0.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Book {
    /// Playback session id.
    pub id: String,
    pub library_item_id: String,
    pub title: String,
    pub author: String,
    /// Seconds.
    pub duration: f64,
    pub files: Vec<AudioFile>,
    pub chapters: Vec<Chapter>,
    /// Where the listener left off, seconds.
    pub last_position: f64,
}

impl Book {
    pub fn file(&self, index: usize) -> Option<&AudioFile> {
        self.files.get(index)
    }

    pub fn chapter(&self, index: usize) -> Option<&Chapter> {
        self.chapters.get(index)
    }

    /// `last_position` clamped into `[0, duration]`.
    pub fn start_position(&self) -> f64 {
        if self.last_position.is_finite() {
            self.last_position.clamp(0.0, self.duration.max(0.0))
        } else {
            0.0
        }
    }
}

impl From<PlayableBook> for Book {
    fn from(remote: PlayableBook) -> Self {
        let mut tracks: Vec<RemoteAudioTrack> = remote.audio_tracks;
        tracks.sort_by_key(|track| track.index);

        let files: Vec<AudioFile> = tracks
            .into_iter()
            .enumerate()
            .map(|(index, track)| AudioFile {
                index,
                duration: track.duration.max(0.0),
                byte_len: track.byte_len(),
                content_url: track.content_url,
            })
            .collect();

        let mut remote_chapters: Vec<RemoteChapter> = remote.chapters;
        remote_chapters.sort_by(|a, b| a.start.total_cmp(&b.start));

        let chapters = remote_chapters
            .into_iter()
            .enumerate()
            .map(|(index, chapter)| Chapter {
                index,
                start: chapter.start,
                end: chapter.end,
                title: chapter.title,
            })
            .collect();

        let duration = if remote.duration > 0.0 {
            remote.duration
        } else {
            files.iter().map(|f| f.duration).sum()
        };

        Book {
            library_item_id: remote.library_item_id.unwrap_or_else(|| remote.id.clone()),
            id: remote.id,
            title: remote.display_title,
            author: remote.display_author,
            duration,
            files,
            chapters,
            last_position: remote.current_time,
        }
    }
}
