//! Progress Sync Abstraction
//!
//! Listening progress is persisted by an external collaborator (usually the
//! media server). The core only hands it periodic snapshots.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Snapshot of listening progress for one playback session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressUpdate {
    /// Playback session identifier.
    pub session_id: String,
    pub library_item_id: String,
    /// Global position in seconds.
    pub current_time: f64,
    /// Accumulated listening time in seconds for this session.
    pub time_listening: f64,
    pub duration: f64,
    /// Unix timestamp in milliseconds.
    pub updated_at: i64,
}

/// Remote progress persistence.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    /// Persist a progress snapshot.
    async fn report(&self, update: ProgressUpdate) -> Result<()>;
}
