//! Content Source Abstraction
//!
//! The core never talks to the media server directly. Hosts inject a
//! [`ContentSource`] that resolves a library item into a playable book
//! description and streams the audio payload of each file on demand.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::io::AsyncRead;

use crate::error::Result;

fn unknown() -> String {
    "Unknown".to_string()
}

/// Chapter marker as reported by the server (global timeline, seconds).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteChapter {
    #[serde(default)]
    pub id: u32,
    #[serde(default)]
    pub start: f64,
    #[serde(default)]
    pub end: f64,
    #[serde(default = "unknown")]
    pub title: String,
}

/// Extra metadata attached to an audio track.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteTrackMetadata {
    /// Payload size in bytes. Older servers call this field `size`.
    #[serde(default, alias = "size")]
    pub bytes: u64,
}

/// One physical audio file of a book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteAudioTrack {
    #[serde(default)]
    pub index: u32,
    #[serde(default)]
    pub start_offset: f64,
    #[serde(default)]
    pub duration: f64,
    #[serde(default)]
    pub content_url: String,
    #[serde(default)]
    pub metadata: Option<RemoteTrackMetadata>,
}

impl RemoteAudioTrack {
    /// Payload size in bytes, `0` when the server did not report one.
    pub fn byte_len(&self) -> u64 {
        self.metadata.as_ref().map(|m| m.bytes).unwrap_or(0)
    }
}

/// Playable book description returned when a playback session is opened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayableBook {
    /// Playback session identifier.
    pub id: String,
    #[serde(default)]
    pub library_item_id: Option<String>,
    #[serde(default = "unknown")]
    pub display_title: String,
    #[serde(default = "unknown")]
    pub display_author: String,
    #[serde(default)]
    pub duration: f64,
    #[serde(default)]
    pub chapters: Vec<RemoteChapter>,
    #[serde(default)]
    pub audio_tracks: Vec<RemoteAudioTrack>,
    #[serde(default)]
    pub start_time: f64,
    /// Last known listening position (seconds, global timeline).
    #[serde(default)]
    pub current_time: f64,
    #[serde(default)]
    pub updated_at: i64,
}

/// Streaming body of a download.
pub struct DownloadStream {
    pub reader: Box<dyn AsyncRead + Send + Unpin>,
    /// Total payload length when the server announced it.
    pub content_length: Option<u64>,
}

impl DownloadStream {
    pub fn new(reader: Box<dyn AsyncRead + Send + Unpin>, content_length: Option<u64>) -> Self {
        Self {
            reader,
            content_length,
        }
    }
}

impl fmt::Debug for DownloadStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownloadStream")
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// Remote content collaborator.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::content::ContentSource;
///
/// async fn first_url(source: &dyn ContentSource) -> Result<String> {
///     let book = source.fetch_playable_book("li_123").await?;
///     Ok(book.audio_tracks[0].content_url.clone())
/// }
/// ```
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Open a playback session for a library item and describe its timeline.
    async fn fetch_playable_book(&self, item_id: &str) -> Result<PlayableBook>;

    /// Start streaming the payload behind `url`.
    ///
    /// # Errors
    ///
    /// Returns an error when the request cannot be started or the server
    /// answers with a non-success status.
    async fn download_stream(&self, url: &str) -> Result<DownloadStream>;
}
