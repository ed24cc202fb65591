//! Cache statistics and download progress

use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Snapshot of the on-disk cache.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Number of finished audio files
    pub files: usize,

    /// Bytes used by finished audio files
    pub total_bytes: u64,

    /// Files past the expiry window that will be re-downloaded on request
    pub expired_files: usize,

    /// Timestamp when stats were calculated (Unix seconds)
    pub calculated_at: i64,
}

impl CacheStats {
    /// Cache usage as a percentage of max size.
    pub fn usage_percentage(&self, max_size: u64) -> f64 {
        if max_size == 0 {
            return 0.0;
        }

        (self.total_bytes as f64 / max_size as f64) * 100.0
    }

    /// Returns true once usage exceeds the budget and a sweep would run.
    pub fn is_over_budget(&self, max_size: u64) -> bool {
        self.total_bytes > max_size
    }

    /// Bytes above the budget.
    pub fn space_needed(&self, max_size: u64) -> u64 {
        self.total_bytes.saturating_sub(max_size)
    }

    /// Returns average bytes per file.
    pub fn average_file_size(&self) -> u64 {
        if self.files == 0 {
            0
        } else {
            self.total_bytes / self.files as u64
        }
    }
}

/// Progress of the transfer the download worker is running.
#[derive(Debug, Clone)]
pub struct DownloadProgress {
    pub book_id: String,
    pub file_index: usize,

    /// Announced payload size; `None` when the server sent no length
    pub total_bytes: Option<u64>,

    pub downloaded_bytes: u64,

    /// Whole percent reached so far (0-100)
    pub progress_percent: u8,

    pub speed_bytes_per_sec: u64,

    pub eta_seconds: Option<u64>,

    started_at: Instant,
}

impl DownloadProgress {
    pub fn new(book_id: impl Into<String>, file_index: usize, total_bytes: Option<u64>) -> Self {
        Self {
            book_id: book_id.into(),
            file_index,
            total_bytes: total_bytes.filter(|total| *total > 0),
            downloaded_bytes: 0,
            progress_percent: 0,
            speed_bytes_per_sec: 0,
            eta_seconds: None,
            started_at: Instant::now(),
        }
    }

    /// Record the running byte count.
    ///
    /// Returns the new percentage when it advanced by at least one whole
    /// percent, so callers can throttle notifications.
    pub fn update(&mut self, downloaded_bytes: u64) -> Option<u8> {
        self.downloaded_bytes = downloaded_bytes;

        let elapsed = self.started_at.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.speed_bytes_per_sec = (downloaded_bytes as f64 / elapsed) as u64;
        }

        let total = self.total_bytes?;

        self.eta_seconds = if self.speed_bytes_per_sec > 0 {
            Some(total.saturating_sub(downloaded_bytes) / self.speed_bytes_per_sec)
        } else {
            None
        };

        let percent = ((downloaded_bytes as f64 / total as f64) * 100.0).min(100.0) as u8;
        if percent > self.progress_percent {
            self.progress_percent = percent;
            Some(percent)
        } else {
            None
        }
    }

    /// Returns true if download is complete.
    pub fn is_complete(&self) -> bool {
        match self.total_bytes {
            Some(total) => self.downloaded_bytes >= total,
            None => false,
        }
    }

    /// Format speed as human-readable string.
    pub fn speed_string(&self) -> String {
        format_bytes_per_sec(self.speed_bytes_per_sec)
    }

    /// Format ETA as human-readable string.
    pub fn eta_string(&self) -> String {
        match self.eta_seconds {
            Some(secs) => format_duration_seconds(secs),
            None => "calculating...".to_string(),
        }
    }
}

fn format_bytes_per_sec(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B/s", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB/s", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB/s", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1} GB/s", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

fn format_duration_seconds(seconds: u64) -> String {
    if seconds < 60 {
        format!("{}s", seconds)
    } else if seconds < 3600 {
        format!("{}m {}s", seconds / 60, seconds % 60)
    } else {
        format!("{}h {}m", seconds / 3600, (seconds % 3600) / 60)
    }
}
