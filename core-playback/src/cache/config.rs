//! Cache configuration and policies

use core_runtime::config::CoreConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the download cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Directory holding `<fingerprint>.audio` files
    pub cache_dir: PathBuf,

    /// Maximum cache size in bytes (default: 4GB)
    pub max_cache_size_bytes: u64,

    /// Files whose modification age exceeds this are re-downloaded (default: 30 days)
    pub expiry: Duration,

    /// Space reclamation sweeps down to this fraction of the budget (default: 0.9)
    pub reclaim_target_ratio: f64,

    /// Longest a blocking request waits for its download (default: 300s)
    pub download_wait_timeout: Duration,

    /// Longest a single transfer may take (default: 600s)
    pub transfer_timeout: Duration,

    /// Which book attribute the cache key is derived from
    pub fingerprint_scheme: FingerprintScheme,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("tome-cache"),
            max_cache_size_bytes: 4 * 1024 * 1024 * 1024, // 4GB
            expiry: Duration::from_secs(30 * 24 * 60 * 60),
            reclaim_target_ratio: 0.9,
            download_wait_timeout: Duration::from_secs(300),
            transfer_timeout: Duration::from_secs(600),
            fingerprint_scheme: FingerprintScheme::default(),
        }
    }
}

impl CacheConfig {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            ..Self::default()
        }
    }

    /// Derive the cache settings from the runtime configuration.
    pub fn from_core(config: &CoreConfig) -> Self {
        Self::new(config.cache_dir.clone())
            .with_max_size(config.cache_size_bytes())
            .with_expiry(Duration::from_secs(
                u64::from(config.cache_expiry_days) * 24 * 60 * 60,
            ))
    }

    /// Set maximum cache size.
    pub fn with_max_size(mut self, bytes: u64) -> Self {
        self.max_cache_size_bytes = bytes;
        self
    }

    pub fn with_expiry(mut self, expiry: Duration) -> Self {
        self.expiry = expiry;
        self
    }

    pub fn with_reclaim_target_ratio(mut self, ratio: f64) -> Self {
        self.reclaim_target_ratio = ratio;
        self
    }

    pub fn with_download_wait_timeout(mut self, timeout: Duration) -> Self {
        self.download_wait_timeout = timeout;
        self
    }

    pub fn with_transfer_timeout(mut self, timeout: Duration) -> Self {
        self.transfer_timeout = timeout;
        self
    }

    pub fn with_fingerprint_scheme(mut self, scheme: FingerprintScheme) -> Self {
        self.fingerprint_scheme = scheme;
        self
    }

    /// Usage the reclaim sweep stops at.
    pub fn reclaim_target_bytes(&self) -> u64 {
        (self.max_cache_size_bytes as f64 * self.reclaim_target_ratio) as u64
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.cache_dir.as_os_str().is_empty() {
            return Err("cache_dir cannot be empty".to_string());
        }

        if self.max_cache_size_bytes == 0 {
            return Err("max_cache_size_bytes must be greater than 0".to_string());
        }

        if !(self.reclaim_target_ratio > 0.0 && self.reclaim_target_ratio <= 1.0) {
            return Err("reclaim_target_ratio must be in (0, 1]".to_string());
        }

        if self.expiry.is_zero() {
            return Err("expiry must be greater than 0".to_string());
        }

        if self.download_wait_timeout.is_zero() || self.transfer_timeout.is_zero() {
            return Err("download timeouts must be greater than 0".to_string());
        }

        Ok(())
    }
}

/// Book attribute used as the cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FingerprintScheme {
    /// Library item id. Unique per book.
    #[default]
    LibraryItem,

    /// Book title. Matches caches written by older clients, but two books
    /// sharing a title share cache entries.
    Title,
}

impl FingerprintScheme {
    /// Returns a human-readable description of the scheme.
    pub fn description(&self) -> &'static str {
        match self {
            FingerprintScheme::LibraryItem => "Key cache entries by library item id",
            FingerprintScheme::Title => "Key cache entries by book title",
        }
    }
}
