//! Shared fakes for core-playback integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result as BridgeResult},
    AudioEngine, ContentSource, DownloadStream, EngineSignal, PlayableBook, RemoteAudioTrack,
    RemoteChapter, RemoteTrackMetadata,
};
use core_playback::cache::{CacheConfig, DownloadManager};
use core_playback::{AudioFile, Book, Chapter, Player, PlayerConfig};
use core_runtime::events::{EventBus, PlayerEvent, Receiver};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::broadcast;

pub const PAYLOAD_BYTES: usize = 4096;

// ============================================================================
// Books
// ============================================================================

/// Two files of 1000s and 800s, chapters [0, 600) and [600, 1800).
pub fn sample_book(last_position: f64) -> Book {
    book_with_files("play_1", "li_1", &[1000.0, 800.0], last_position)
}

pub fn book_with_files(id: &str, item_id: &str, durations: &[f64], last_position: f64) -> Book {
    let duration: f64 = durations.iter().sum();
    let files = durations
        .iter()
        .enumerate()
        .map(|(index, duration)| AudioFile {
            index,
            duration: *duration,
            byte_len: PAYLOAD_BYTES as u64,
            content_url: format!("/audio/{}/{}", item_id, index),
        })
        .collect();

    let chapters = if durations.len() == 2 {
        vec![
            Chapter {
                index: 0,
                start: 0.0,
                end: 600.0,
                title: "Ch1".to_string(),
            },
            Chapter {
                index: 1,
                start: 600.0,
                end: duration,
                title: "Ch2".to_string(),
            },
        ]
    } else {
        vec![Chapter {
            index: 0,
            start: 0.0,
            end: duration,
            title: "Whole book".to_string(),
        }]
    };

    Book {
        id: id.to_string(),
        library_item_id: item_id.to_string(),
        title: format!("Title of {}", item_id),
        author: "Author".to_string(),
        duration,
        files,
        chapters,
        last_position,
    }
}

pub fn file_url(book: &Book, index: usize) -> String {
    book.files[index].content_url.clone()
}

// ============================================================================
// Content source
// ============================================================================

/// Serves a fixed payload for every URL and records what was fetched.
#[derive(Default)]
pub struct MockContentSource {
    fetched: Mutex<Vec<String>>,
    downloads: AtomicUsize,
    failing: Mutex<HashSet<String>>,
    truncated: Mutex<HashSet<String>>,
    delay: Mutex<Option<Duration>>,
    book: Mutex<Option<PlayableBook>>,
}

impl MockContentSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn download_count(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }

    pub fn fetched_urls(&self) -> Vec<String> {
        self.fetched.lock().clone()
    }

    pub fn fail_url(&self, url: impl Into<String>) {
        self.failing.lock().insert(url.into());
    }

    /// Announce the full length but close the stream halfway.
    pub fn truncate_url(&self, url: impl Into<String>) {
        self.truncated.lock().insert(url.into());
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    pub fn set_playable_book(&self, book: PlayableBook) {
        *self.book.lock() = Some(book);
    }
}

#[async_trait]
impl ContentSource for MockContentSource {
    async fn fetch_playable_book(&self, item_id: &str) -> BridgeResult<PlayableBook> {
        self.book
            .lock()
            .clone()
            .filter(|book| book.library_item_id.as_deref() == Some(item_id))
            .ok_or_else(|| BridgeError::Http {
                status: 404,
                message: format!("item {} not found", item_id),
            })
    }

    async fn download_stream(&self, url: &str) -> BridgeResult<DownloadStream> {
        self.fetched.lock().push(url.to_string());
        self.downloads.fetch_add(1, Ordering::SeqCst);

        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.failing.lock().contains(url) {
            return Err(BridgeError::Http {
                status: 500,
                message: format!("cannot serve {}", url),
            });
        }

        let payload = vec![7u8; PAYLOAD_BYTES];
        if self.truncated.lock().contains(url) {
            let half = payload[..PAYLOAD_BYTES / 2].to_vec();
            return Ok(DownloadStream::new(
                Box::new(Cursor::new(half)),
                Some(PAYLOAD_BYTES as u64),
            ));
        }

        Ok(DownloadStream::new(
            Box::new(Cursor::new(payload)),
            Some(PAYLOAD_BYTES as u64),
        ))
    }
}

pub fn playable_book() -> PlayableBook {
    PlayableBook {
        id: "play_remote".to_string(),
        library_item_id: Some("li_remote".to_string()),
        display_title: "Remote Book".to_string(),
        display_author: "Remote Author".to_string(),
        duration: 1800.0,
        chapters: vec![
            RemoteChapter {
                id: 0,
                start: 0.0,
                end: 600.0,
                title: "Ch1".to_string(),
            },
            RemoteChapter {
                id: 1,
                start: 600.0,
                end: 1800.0,
                title: "Ch2".to_string(),
            },
        ],
        audio_tracks: vec![
            RemoteAudioTrack {
                index: 1,
                start_offset: 0.0,
                duration: 1000.0,
                content_url: "/audio/li_remote/1".to_string(),
                metadata: Some(RemoteTrackMetadata {
                    bytes: PAYLOAD_BYTES as u64,
                }),
            },
            RemoteAudioTrack {
                index: 2,
                start_offset: 1000.0,
                duration: 800.0,
                content_url: "/audio/li_remote/2".to_string(),
                metadata: None,
            },
        ],
        start_time: 0.0,
        current_time: 1100.0,
        updated_at: 0,
    }
}

// ============================================================================
// Audio engine
// ============================================================================

#[derive(Debug, Default)]
struct EngineState {
    loaded: Option<PathBuf>,
    paused: bool,
    position: Option<Duration>,
    speed: f64,
    volume: u8,
    loads: Vec<PathBuf>,
    seeks: Vec<Duration>,
    stops: usize,
    report_position: bool,
    never_ready: bool,
    speed_delay: Option<Duration>,
}

/// Scriptable engine: positions and signals are set by the test.
pub struct MockAudioEngine {
    state: Mutex<EngineState>,
    signals: broadcast::Sender<EngineSignal>,
}

impl MockAudioEngine {
    pub fn new() -> Self {
        let (signals, _) = broadcast::channel(16);
        Self {
            state: Mutex::new(EngineState {
                speed: 1.0,
                volume: 100,
                report_position: true,
                ..EngineState::default()
            }),
            signals,
        }
    }

    pub fn signal(&self, signal: EngineSignal) {
        let _ = self.signals.send(signal);
    }

    pub fn set_position(&self, position: Duration) {
        self.state.lock().position = Some(position);
    }

    /// Stop answering position queries, like an engine that ended a file
    /// without telling anyone.
    pub fn stop_reporting_position(&self) {
        self.state.lock().report_position = false;
    }

    pub fn never_ready(&self) {
        self.state.lock().never_ready = true;
    }

    /// Make `set_speed` take `delay`, which stretches every file switch
    /// after the new file is already loaded.
    pub fn slow_set_speed(&self, delay: Duration) {
        self.state.lock().speed_delay = Some(delay);
    }

    pub fn loads(&self) -> Vec<PathBuf> {
        self.state.lock().loads.clone()
    }

    pub fn seeks(&self) -> Vec<Duration> {
        self.state.lock().seeks.clone()
    }

    pub fn stops(&self) -> usize {
        self.state.lock().stops
    }

    pub fn is_paused(&self) -> bool {
        self.state.lock().paused
    }

    pub fn speed(&self) -> f64 {
        self.state.lock().speed
    }

    pub fn volume(&self) -> u8 {
        self.state.lock().volume
    }
}

#[async_trait]
impl AudioEngine for MockAudioEngine {
    async fn load(&self, path: &Path) -> BridgeResult<()> {
        let mut state = self.state.lock();
        state.loaded = Some(path.to_path_buf());
        state.loads.push(path.to_path_buf());
        state.position = Some(Duration::ZERO);
        Ok(())
    }

    async fn set_paused(&self, paused: bool) -> BridgeResult<()> {
        self.state.lock().paused = paused;
        Ok(())
    }

    async fn stop(&self) -> BridgeResult<()> {
        let mut state = self.state.lock();
        state.loaded = None;
        state.position = None;
        state.stops += 1;
        Ok(())
    }

    async fn seek(&self, position: Duration) -> BridgeResult<()> {
        let mut state = self.state.lock();
        if state.loaded.is_none() {
            return Err(BridgeError::OperationFailed("nothing loaded".to_string()));
        }
        state.position = Some(position);
        state.seeks.push(position);
        Ok(())
    }

    async fn position(&self) -> BridgeResult<Option<Duration>> {
        let state = self.state.lock();
        if !state.report_position || state.loaded.is_none() {
            return Ok(None);
        }
        Ok(state.position)
    }

    async fn is_idle(&self) -> BridgeResult<bool> {
        let state = self.state.lock();
        Ok(state.never_ready || state.loaded.is_none())
    }

    async fn set_speed(&self, speed: f64) -> BridgeResult<()> {
        let delay = self.state.lock().speed_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.state.lock().speed = speed;
        Ok(())
    }

    async fn set_volume(&self, volume: u8) -> BridgeResult<()> {
        self.state.lock().volume = volume;
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<EngineSignal> {
        self.signals.subscribe()
    }
}

// ============================================================================
// Harness
// ============================================================================

pub fn test_player_config() -> PlayerConfig {
    let mut config = PlayerConfig::default()
        .with_engine_ready_timeout(Duration::from_millis(200))
        .with_file_switch_timeout(Duration::from_millis(500))
        .with_tracker_interval(Duration::from_millis(20))
        .with_stall_threshold(Duration::from_millis(200));
    config.ready_poll_interval = Duration::from_millis(5);
    config
}

pub struct Harness {
    pub dir: TempDir,
    pub source: Arc<MockContentSource>,
    pub engine: Arc<MockAudioEngine>,
    pub events: EventBus,
    pub downloads: Arc<DownloadManager>,
    pub player: Player,
}

impl Harness {
    /// Must be called inside a Tokio runtime.
    pub fn new() -> Self {
        Self::with_config(test_player_config())
    }

    pub fn with_config(config: PlayerConfig) -> Self {
        let dir = TempDir::new().unwrap();
        let source = Arc::new(MockContentSource::new());
        let engine = Arc::new(MockAudioEngine::new());
        let events = EventBus::new(1024);
        let downloads = Arc::new(
            DownloadManager::new(
                CacheConfig::new(dir.path()),
                source.clone(),
                events.clone(),
            )
            .unwrap(),
        );
        let player = Player::new(
            config,
            engine.clone(),
            source.clone(),
            downloads.clone(),
            events.clone(),
        )
        .unwrap();

        Self {
            dir,
            source,
            engine,
            events,
            downloads,
            player,
        }
    }
}

/// Drain everything currently buffered on `receiver`.
pub fn drain(receiver: &mut Receiver<PlayerEvent>) -> Vec<PlayerEvent> {
    let mut events = Vec::new();
    loop {
        match receiver.try_recv() {
            Ok(event) => events.push(event),
            Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }
    events
}

/// Poll `condition` every 10ms for up to `limit`.
pub async fn wait_for(limit: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
