//! Default on-disk locations for desktop hosts

use std::path::PathBuf;

const APP_DIR: &str = "tome-player";

/// `<platform cache dir>/tome-player/audio`, falling back to the temp dir
/// when the platform has no cache directory.
pub fn default_audio_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_DIR)
        .join("audio")
}
