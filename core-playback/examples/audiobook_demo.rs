//! # Audiobook Player Example
//!
//! Plays a tiny three-file book against an in-memory content source and a
//! silent engine whose clock runs 100x faster than real time, printing every
//! player event.
//!
//! Run with: `cargo run --example audiobook_demo --package core-playback`

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result as BridgeResult},
    AudioEngine, ContentSource, DownloadStream, EngineSignal, PlayableBook, RemoteAudioTrack,
    RemoteChapter,
};
use core_playback::{PlaybackState, Player};
use core_runtime::config::CoreConfig;
use core_runtime::events::{EventBus, PlayerEvent};
use core_runtime::logging::{init_logging, LogFormat, LoggingConfig};
use parking_lot::Mutex;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

const SPEEDUP: f64 = 100.0;

// ============================================================================
// In-memory content source
// ============================================================================

struct DemoLibrary;

#[async_trait]
impl ContentSource for DemoLibrary {
    async fn fetch_playable_book(&self, item_id: &str) -> BridgeResult<PlayableBook> {
        if item_id != "demo" {
            return Err(BridgeError::Http {
                status: 404,
                message: format!("unknown item {}", item_id),
            });
        }

        let durations = [300.0, 200.0, 200.0];
        Ok(PlayableBook {
            id: "session-demo".to_string(),
            library_item_id: Some("demo".to_string()),
            display_title: "The Demo Book".to_string(),
            display_author: "Core Playback".to_string(),
            duration: durations.iter().sum(),
            chapters: vec![
                RemoteChapter {
                    id: 0,
                    start: 0.0,
                    end: 250.0,
                    title: "Opening".to_string(),
                },
                RemoteChapter {
                    id: 1,
                    start: 250.0,
                    end: 700.0,
                    title: "Ending".to_string(),
                },
            ],
            audio_tracks: durations
                .iter()
                .enumerate()
                .map(|(index, duration)| RemoteAudioTrack {
                    index: index as u32,
                    start_offset: 0.0,
                    duration: *duration,
                    content_url: format!("/demo/{}", index),
                    metadata: None,
                })
                .collect(),
            start_time: 0.0,
            current_time: 0.0,
            updated_at: 0,
        })
    }

    async fn download_stream(&self, _url: &str) -> BridgeResult<DownloadStream> {
        let payload = vec![0u8; 256 * 1024];
        let length = payload.len() as u64;
        Ok(DownloadStream::new(Box::new(Cursor::new(payload)), Some(length)))
    }
}

// ============================================================================
// Silent engine
// ============================================================================

struct Track {
    path: PathBuf,
    started: Instant,
    offset: Duration,
    paused_at: Option<Instant>,
}

struct SilentEngine {
    track: Mutex<Option<Track>>,
    paused: Mutex<bool>,
    signals: broadcast::Sender<EngineSignal>,
}

impl SilentEngine {
    fn new() -> Self {
        let (signals, _) = broadcast::channel(16);
        Self {
            track: Mutex::new(None),
            paused: Mutex::new(false),
            signals,
        }
    }

    fn elapsed(track: &Track) -> Duration {
        let until = track.paused_at.unwrap_or_else(Instant::now);
        let real = until.duration_since(track.started);
        track.offset + real.mul_f64(SPEEDUP)
    }
}

#[async_trait]
impl AudioEngine for SilentEngine {
    async fn load(&self, path: &Path) -> BridgeResult<()> {
        let paused = *self.paused.lock();
        let now = Instant::now();
        *self.track.lock() = Some(Track {
            path: path.to_path_buf(),
            started: now,
            offset: Duration::ZERO,
            paused_at: paused.then_some(now),
        });
        println!("  [engine] loaded {}", path.display());
        Ok(())
    }

    async fn set_paused(&self, paused: bool) -> BridgeResult<()> {
        *self.paused.lock() = paused;
        if let Some(track) = self.track.lock().as_mut() {
            match (paused, track.paused_at) {
                (true, None) => track.paused_at = Some(Instant::now()),
                (false, Some(at)) => {
                    track.offset += at.duration_since(track.started).mul_f64(SPEEDUP);
                    track.started = Instant::now();
                    track.paused_at = None;
                }
                _ => {}
            }
        }
        Ok(())
    }

    async fn stop(&self) -> BridgeResult<()> {
        self.track.lock().take();
        Ok(())
    }

    async fn seek(&self, position: Duration) -> BridgeResult<()> {
        let mut track = self.track.lock();
        let track = track
            .as_mut()
            .ok_or_else(|| BridgeError::OperationFailed("nothing loaded".to_string()))?;
        let now = Instant::now();
        track.offset = position;
        track.started = now;
        if track.paused_at.is_some() {
            track.paused_at = Some(now);
        }
        Ok(())
    }

    async fn position(&self) -> BridgeResult<Option<Duration>> {
        Ok(self.track.lock().as_ref().map(Self::elapsed))
    }

    async fn is_idle(&self) -> BridgeResult<bool> {
        Ok(self.track.lock().is_none())
    }

    async fn set_speed(&self, _speed: f64) -> BridgeResult<()> {
        Ok(())
    }

    async fn set_volume(&self, _volume: u8) -> BridgeResult<()> {
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<EngineSignal> {
        self.signals.subscribe()
    }
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging(LoggingConfig::default().with_format(LogFormat::Compact))?;

    let cache_dir = std::env::temp_dir().join("core-playback-demo");
    let config = CoreConfig::builder()
        .cache_dir(&cache_dir)
        .content_source(Arc::new(DemoLibrary))
        .audio_engine(Arc::new(SilentEngine::new()))
        .build()?;

    let events = EventBus::new(256);
    let player = Player::from_core(&config, events.clone())?;
    let mut stream = events.subscribe();

    println!("Opening demo book (cache: {})", cache_dir.display());
    player.open("demo").await?;
    player.play().await?;

    // The silent engine never signals; the tracker notices each file parked
    // at its end and moves on.
    let mut last_report = Instant::now();
    loop {
        match tokio::time::timeout(Duration::from_secs(30), stream.recv()).await {
            Ok(Ok(PlayerEvent::PositionChanged { position, chapter_index })) => {
                if last_report.elapsed() >= Duration::from_millis(500) {
                    println!(
                        "  position {:>6.1}s  chapter {}  ({:.0}%)",
                        position,
                        chapter_index,
                        player.progress_percentage()
                    );
                    last_report = Instant::now();
                }
            }
            Ok(Ok(PlayerEvent::PlaybackEnded { book_id })) => {
                println!("Finished {}", book_id);
                break;
            }
            Ok(Ok(event)) => println!("{}", event.description()),
            Ok(Err(e)) => println!("event stream: {}", e),
            Err(_) => {
                println!("No events for 30s, giving up");
                break;
            }
        }
    }

    assert_eq!(player.state(), PlaybackState::Stopped);
    player.shutdown().await?;
    Ok(())
}
