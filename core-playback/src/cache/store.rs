//! # Disk Cache
//!
//! One finished artifact per fingerprint at `<cache_dir>/<fingerprint>.audio`;
//! in-progress downloads live next to it as `<fingerprint>.part`. The
//! directory listing and file modification times are the only bookkeeping:
//! nothing else is persisted.

use crate::cache::config::CacheConfig;
use crate::cache::stats::CacheStats;
use crate::error::Result;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

pub const ARTIFACT_EXTENSION: &str = "audio";
pub const PARTIAL_EXTENSION: &str = "part";

/// Outcome of a space reclamation sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReclaimReport {
    pub removed_files: usize,
    pub freed_bytes: u64,
    pub remaining_bytes: u64,
}

#[derive(Debug, Clone)]
struct Artifact {
    path: PathBuf,
    len: u64,
    modified: SystemTime,
}

/// Age-expiring, size-bounded directory of downloaded audio files.
#[derive(Debug, Clone)]
pub struct DiskCache {
    dir: PathBuf,
    max_bytes: u64,
    target_bytes: u64,
    expiry: Duration,
}

impl DiskCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            dir: config.cache_dir.clone(),
            max_bytes: config.max_cache_size_bytes,
            target_bytes: config.reclaim_target_bytes(),
            expiry: config.expiry,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn artifact_path(&self, fingerprint: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", fingerprint, ARTIFACT_EXTENSION))
    }

    pub fn temp_path(&self, fingerprint: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", fingerprint, PARTIAL_EXTENSION))
    }

    pub async fn ensure_dir(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        Ok(())
    }

    /// Path of the cached artifact for `fingerprint`, if present and younger
    /// than the expiry window.
    pub async fn resolve(&self, fingerprint: &str) -> Option<PathBuf> {
        let path = self.artifact_path(fingerprint);
        let metadata = match tokio::fs::metadata(&path).await {
            Ok(metadata) if metadata.is_file() => metadata,
            _ => return None,
        };

        match metadata.modified() {
            Ok(modified) if !self.is_expired(modified) => Some(path),
            Ok(_) => {
                debug!(fingerprint, "Cached file expired");
                None
            }
            Err(e) => {
                warn!(fingerprint, error = %e, "Cannot read cached file age");
                None
            }
        }
    }

    /// Atomically move a completed download into place.
    pub async fn finalize(&self, temp: &Path, fingerprint: &str) -> Result<PathBuf> {
        let target = self.artifact_path(fingerprint);
        tokio::fs::rename(temp, &target).await?;
        Ok(target)
    }

    /// Remove a partial download. Missing files are fine.
    pub async fn discard(&self, temp: &Path) {
        if let Err(e) = tokio::fs::remove_file(temp).await {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(error = %e, "Failed to remove partial download");
            }
        }
    }

    /// Remove `.part` leftovers of interrupted downloads.
    pub async fn remove_partials(&self) -> Result<usize> {
        let mut removed = 0;
        for path in self.list_paths(PARTIAL_EXTENSION).await? {
            if remove_if_present(&path).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Bytes used by finished artifacts.
    pub async fn usage_bytes(&self) -> Result<u64> {
        Ok(self.list_artifacts().await?.iter().map(|a| a.len).sum())
    }

    pub async fn stats(&self) -> Result<CacheStats> {
        let artifacts = self.list_artifacts().await?;
        Ok(CacheStats {
            files: artifacts.len(),
            total_bytes: artifacts.iter().map(|a| a.len).sum(),
            expired_files: artifacts
                .iter()
                .filter(|a| self.is_expired(a.modified))
                .count(),
            calculated_at: chrono::Utc::now().timestamp(),
        })
    }

    /// When usage exceeds the budget, delete artifacts oldest-first until
    /// usage is at or below the reclaim target. Within budget nothing is
    /// touched.
    pub async fn reclaim_space(&self) -> Result<ReclaimReport> {
        self.reclaim_space_protecting(None).await
    }

    /// Same as [`reclaim_space`](Self::reclaim_space) but never removes
    /// `protected` (the file that was just downloaded).
    pub async fn reclaim_space_protecting(&self, protected: Option<&Path>) -> Result<ReclaimReport> {
        let mut artifacts = self.list_artifacts().await?;
        let mut usage: u64 = artifacts.iter().map(|a| a.len).sum();

        let mut report = ReclaimReport {
            remaining_bytes: usage,
            ..ReclaimReport::default()
        };

        if usage <= self.max_bytes {
            return Ok(report);
        }

        artifacts.sort_by_key(|a| a.modified);

        for artifact in artifacts {
            if usage <= self.target_bytes {
                break;
            }
            if protected == Some(artifact.path.as_path()) {
                continue;
            }
            if remove_if_present(&artifact.path).await? {
                usage = usage.saturating_sub(artifact.len);
                report.removed_files += 1;
                report.freed_bytes += artifact.len;
            }
        }

        report.remaining_bytes = usage;
        info!(
            removed = report.removed_files,
            freed_bytes = report.freed_bytes,
            remaining_bytes = report.remaining_bytes,
            "Reclaimed cache space"
        );
        Ok(report)
    }

    /// Delete artifacts past the expiry window.
    pub async fn purge_expired(&self) -> Result<usize> {
        let mut removed = 0;
        for artifact in self.list_artifacts().await? {
            if self.is_expired(artifact.modified) && remove_if_present(&artifact.path).await? {
                removed += 1;
            }
        }
        if removed > 0 {
            info!(removed, "Purged expired cache files");
        }
        Ok(removed)
    }

    /// Delete every artifact and partial download.
    pub async fn clear(&self) -> Result<usize> {
        let mut removed = self.remove_partials().await?;
        for artifact in self.list_artifacts().await? {
            if remove_if_present(&artifact.path).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn is_expired(&self, modified: SystemTime) -> bool {
        let age = SystemTime::now()
            .duration_since(modified)
            .unwrap_or(Duration::ZERO);
        age >= self.expiry
    }

    async fn list_artifacts(&self) -> Result<Vec<Artifact>> {
        let mut artifacts = Vec::new();
        for path in self.list_paths(ARTIFACT_EXTENSION).await? {
            // Removed concurrently; skip.
            let Ok(metadata) = tokio::fs::metadata(&path).await else {
                continue;
            };
            artifacts.push(Artifact {
                path,
                len: metadata.len(),
                modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            });
        }
        Ok(artifacts)
    }

    async fn list_paths(&self, extension: &str) -> Result<Vec<PathBuf>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) == Some(extension) {
                paths.push(path);
            }
        }
        Ok(paths)
    }
}

async fn remove_if_present(path: &Path) -> Result<bool> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}
