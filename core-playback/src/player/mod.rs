//! # Player
//!
//! Plays a book that is split across several audio files as one continuous
//! timeline.
//!
//! ## Overview
//!
//! [`Player`] is a cheaply cloneable handle around shared state:
//!
//! - one `parking_lot::Mutex<SessionState>` with everything that changes
//!   during playback (never held across `.await`)
//! - an async command gate serializing the commands that drive the engine
//!   (load, play, seek, track end)
//! - an `AtomicBool` that keeps track-end handling single-flight
//! - a [`CancellationToken`] per play run, cancelled by [`Player::stop`]
//!
//! Two background tasks hold only a `Weak` reference to that state: the
//! engine-signal listener (one per player) and the position tracker (one per
//! play run).
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_playback::Player;
//!
//! let player = Player::from_core(&core_config, event_bus.clone())?;
//! player.open("li_42").await?;
//! player.play().await?;
//! player.seek_to_chapter(3).await?;
//! ```

pub mod state;
mod tracker;

pub use state::PlaybackSnapshot;

use crate::cache::{CacheConfig, DownloadManager, DownloadMode, FileAvailability};
use crate::error::{PlaybackError, Result};
use crate::model::{AudioFile, Book, Chapter, PlaybackState};
use bridge_traits::{AudioEngine, ContentSource, EngineSignal};
use core_runtime::config::CoreConfig;
use core_runtime::events::{EventBus, PlayerEvent, Receiver};
use core_runtime::logging::strip_path;
use parking_lot::Mutex;
use state::SessionState;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

pub const MIN_PLAYBACK_SPEED: f64 = 0.5;
pub const MAX_PLAYBACK_SPEED: f64 = 3.0;
pub const MAX_VOLUME: u8 = 100;

/// Timing knobs of the player.
#[derive(Debug, Clone)]
pub struct PlayerConfig {
    /// Engine readiness wait of a cold `play()` (default: 1s)
    pub engine_ready_timeout: Duration,

    /// Engine readiness wait after switching files (default: 10s)
    pub file_switch_timeout: Duration,

    /// How often readiness is polled (default: 50ms)
    pub ready_poll_interval: Duration,

    /// Position tracker tick (default: 200ms)
    pub tracker_interval: Duration,

    /// No position, or a position stuck near the end of the file, for longer
    /// than this forces track-end handling (default: 2s)
    pub stall_threshold: Duration,

    /// Distance from the end of a file that counts as "near the end" (default: 0.5s)
    pub end_of_file_margin: Duration,

    /// `previous_chapter()` restarts the current chapter when further into
    /// it than this (default: 3s)
    pub previous_chapter_threshold: Duration,

    pub default_speed: f64,

    pub default_volume: u8,

    /// Queue background downloads of neighboring files
    pub prefetch_neighbors: bool,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            engine_ready_timeout: Duration::from_secs(1),
            file_switch_timeout: Duration::from_secs(10),
            ready_poll_interval: Duration::from_millis(50),
            tracker_interval: Duration::from_millis(200),
            stall_threshold: Duration::from_secs(2),
            end_of_file_margin: Duration::from_millis(500),
            previous_chapter_threshold: Duration::from_secs(3),
            default_speed: 1.0,
            default_volume: MAX_VOLUME,
            prefetch_neighbors: true,
        }
    }
}

impl PlayerConfig {
    pub fn from_core(config: &CoreConfig) -> Self {
        Self {
            prefetch_neighbors: config.features.prefetch_neighbors,
            ..Self::default()
        }
    }

    pub fn with_engine_ready_timeout(mut self, timeout: Duration) -> Self {
        self.engine_ready_timeout = timeout;
        self
    }

    pub fn with_file_switch_timeout(mut self, timeout: Duration) -> Self {
        self.file_switch_timeout = timeout;
        self
    }

    pub fn with_tracker_interval(mut self, interval: Duration) -> Self {
        self.tracker_interval = interval;
        self
    }

    pub fn with_stall_threshold(mut self, threshold: Duration) -> Self {
        self.stall_threshold = threshold;
        self
    }

    pub fn with_prefetch_neighbors(mut self, enabled: bool) -> Self {
        self.prefetch_neighbors = enabled;
        self
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        let intervals = [
            ("engine_ready_timeout", self.engine_ready_timeout),
            ("file_switch_timeout", self.file_switch_timeout),
            ("ready_poll_interval", self.ready_poll_interval),
            ("tracker_interval", self.tracker_interval),
            ("stall_threshold", self.stall_threshold),
        ];
        if let Some((name, _)) = intervals.iter().find(|(_, value)| value.is_zero()) {
            return Err(format!("{} must be greater than 0", name));
        }

        if !(MIN_PLAYBACK_SPEED..=MAX_PLAYBACK_SPEED).contains(&self.default_speed) {
            return Err(format!(
                "default_speed must be within {}..={}",
                MIN_PLAYBACK_SPEED, MAX_PLAYBACK_SPEED
            ));
        }

        if self.default_volume > MAX_VOLUME {
            return Err("default_volume must be at most 100".to_string());
        }

        Ok(())
    }
}

/// What caused a track-end check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackEndTrigger {
    EndOfFile,
    /// Re-checked against the engine before acting.
    Idle,
    /// The tracker saw no position for too long.
    Stalled,
    /// The tracker saw the position stuck at the end of the file.
    StuckNearEnd,
    /// The host reported the end of the file.
    Host,
}

/// Result of a track-end check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackEndOutcome {
    /// Playback continues in the given file.
    Advanced { file_index: usize },
    /// The last file ended; the player is stopped.
    Ended,
    /// Duplicate, stale or spurious signal.
    Ignored,
}

/// Audiobook player handle.
#[derive(Clone)]
pub struct Player {
    inner: Arc<PlayerInner>,
}

struct PlayerInner {
    config: PlayerConfig,
    engine: Arc<dyn AudioEngine>,
    source: Arc<dyn ContentSource>,
    downloads: Arc<DownloadManager>,
    events: EventBus,
    session: Mutex<SessionState>,
    commands: tokio::sync::Mutex<()>,
    track_end_in_flight: AtomicBool,
    shutdown: CancellationToken,
}

impl Player {
    /// Create a player and start listening to engine signals.
    ///
    /// # Errors
    ///
    /// - [`PlaybackError::Config`] for an invalid [`PlayerConfig`]
    /// - [`PlaybackError::Runtime`] when called outside a Tokio runtime
    pub fn new(
        config: PlayerConfig,
        engine: Arc<dyn AudioEngine>,
        source: Arc<dyn ContentSource>,
        downloads: Arc<DownloadManager>,
        events: EventBus,
    ) -> Result<Self> {
        config
            .validate()
            .map_err(|e| PlaybackError::Config(format!("Invalid player configuration: {}", e)))?;

        let handle = tokio::runtime::Handle::try_current().map_err(|_| {
            core_runtime::Error::CapabilityMissing {
                capability: "TokioRuntime".to_string(),
                message: "Player must be created inside a Tokio runtime".to_string(),
            }
        })?;

        let session = SessionState::new(config.default_speed, config.default_volume);
        let inner = Arc::new(PlayerInner {
            config,
            engine,
            source,
            downloads,
            events,
            session: Mutex::new(session),
            commands: tokio::sync::Mutex::new(()),
            track_end_in_flight: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        });

        let signals = inner.engine.subscribe();
        handle.spawn(listen_engine_signals(
            Arc::downgrade(&inner),
            signals,
            inner.shutdown.clone(),
        ));

        Ok(Self { inner })
    }

    /// Build the download manager and player from the runtime configuration.
    pub fn from_core(config: &CoreConfig, events: EventBus) -> Result<Self> {
        let downloads = Arc::new(DownloadManager::new(
            CacheConfig::from_core(config),
            Arc::clone(&config.content_source),
            events.clone(),
        )?);

        Self::new(
            PlayerConfig::from_core(config),
            Arc::clone(&config.audio_engine),
            Arc::clone(&config.content_source),
            downloads,
            events,
        )
    }

    pub fn subscribe(&self) -> Receiver<PlayerEvent> {
        self.inner.events.subscribe()
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    pub fn downloads(&self) -> &Arc<DownloadManager> {
        &self.inner.downloads
    }

    // ========================================================================
    // Commands
    // ========================================================================

    /// Look up `item_id` on the content source and load it.
    #[instrument(skip(self))]
    pub async fn open(&self, item_id: &str) -> Result<()> {
        let remote = self
            .inner
            .source
            .fetch_playable_book(item_id)
            .await
            .inspect_err(|e| error!(error = %e, "Failed to open book"))?;
        self.load_book(Book::from(remote)).await
    }

    /// Load `book`, positioned at its `last_position`.
    ///
    /// Returns once the start file is on disk. If that file cannot be
    /// obtained the book is unloaded again.
    #[instrument(skip(self, book), fields(book_id = %book.id, files = book.files.len()))]
    pub async fn load_book(&self, book: Book) -> Result<()> {
        if book.files.is_empty() {
            warn!("Book has no audio files");
            return Err(PlaybackError::InvalidFileIndex { index: 0, count: 0 });
        }

        self.stop().await?;

        let inner = &self.inner;
        let _gate = inner.commands.lock().await;

        let book = Arc::new(book);
        let (file_index, previous, run) = {
            let mut session = inner.session.lock();
            let previous = session.book.as_ref().map(|b| b.id.clone());
            session.install(Arc::clone(&book));
            (session.file_index, previous, session.run.clone())
        };

        if let Some(previous) = previous.filter(|id| id != &book.id) {
            inner.downloads.forget_book(&previous);
        }

        if let Err(e) = inner.ensure_file(&book, file_index, &run).await {
            error!(error = %e, file_index, "Failed to fetch start file, unloading book");
            inner.session.lock().unload();
            return Err(e);
        }

        inner.prefetch(&book, [file_index + 1]);

        info!(title = %book.title, start = book.start_position(), "Book loaded");
        inner.emit(PlayerEvent::BookLoaded {
            book_id: book.id.clone(),
            title: book.title.clone(),
            file_count: book.files.len(),
            chapter_count: book.chapters.len(),
            start_position: book.start_position(),
        });
        Ok(())
    }

    /// Start or resume playback. No-op while already playing.
    ///
    /// # Errors
    ///
    /// - [`PlaybackError::NoBookLoaded`]
    /// - [`PlaybackError::NotReady`] when the current file is not downloaded
    /// - [`PlaybackError::Timeout`] when the engine does not become ready
    #[instrument(skip(self))]
    pub async fn play(&self) -> Result<()> {
        let inner = &self.inner;
        let _gate = inner.commands.lock().await;

        let (state, book, file_index, local) = {
            let session = inner.session.lock();
            (
                session.state,
                session.book.clone(),
                session.file_index,
                session.local_position,
            )
        };

        match state {
            PlaybackState::Playing => return Ok(()),
            PlaybackState::Paused => {
                inner
                    .engine
                    .set_paused(false)
                    .await
                    .map_err(PlaybackError::Engine)
                    .inspect_err(|e| error!(error = %e, "Failed to resume"))?;
                inner.transition(PlaybackState::Playing);
                return Ok(());
            }
            PlaybackState::Stopped => {}
        }

        let book = book.ok_or(PlaybackError::NoBookLoaded)?;
        let path = inner
            .downloads
            .cached_path(&book.id, file_index)
            .ok_or(PlaybackError::NotReady { file_index })
            .inspect_err(|_| warn!(file_index, "Current file is not downloaded yet"))?;

        let run = inner.session.lock().restart_run();
        let started = async {
            inner
                .load_file(&path, inner.config.engine_ready_timeout, &run, true)
                .await?;
            if local > 0.0 {
                inner
                    .engine
                    .seek(Duration::from_secs_f64(local))
                    .await
                    .map_err(PlaybackError::Engine)?;
            }
            inner
                .engine
                .set_paused(false)
                .await
                .map_err(PlaybackError::Engine)
        }
        .await;

        if let Err(e) = started {
            error!(error = %e, file_index, "Failed to start playback");
            run.cancel();
            if let Err(stop_err) = inner.engine.stop().await {
                warn!(error = %stop_err, "Engine stop after failed start also failed");
            }
            return Err(e);
        }

        inner.transition(PlaybackState::Playing);
        tracker::spawn(Arc::downgrade(&self.inner), run, &inner.config);
        Ok(())
    }

    /// Pause playback. Only valid while playing.
    #[instrument(skip(self))]
    pub async fn pause(&self) -> Result<()> {
        let inner = &self.inner;
        let _gate = inner.commands.lock().await;

        let state = inner.session.lock().state;
        if state != PlaybackState::Playing {
            debug!(%state, "Pause ignored");
            return Err(PlaybackError::InvalidState {
                operation: "pause",
                state,
            });
        }

        inner
            .engine
            .set_paused(true)
            .await
            .map_err(PlaybackError::Engine)
            .inspect_err(|e| error!(error = %e, "Failed to pause"))?;
        inner.transition(PlaybackState::Paused);
        Ok(())
    }

    /// Stop playback from any state. Idempotent; downloads keep running.
    #[instrument(skip(self))]
    pub async fn stop(&self) -> Result<()> {
        let inner = &self.inner;

        // Interrupt readiness and download waits of a command holding the gate.
        inner.session.lock().run.cancel();
        let _gate = inner.commands.lock().await;

        let state = {
            let mut session = inner.session.lock();
            session.restart_run();
            session.state
        };
        if state == PlaybackState::Stopped {
            return Ok(());
        }

        if let Err(e) = inner.engine.stop().await {
            warn!(error = %e, "Engine failed to stop cleanly");
        }
        inner.transition(PlaybackState::Stopped);
        Ok(())
    }

    /// Move to `position` seconds on the book timeline.
    ///
    /// Crossing into another file fetches it first (blocking). While stopped
    /// only the stored position changes, so the next `play()` starts there.
    #[instrument(skip(self))]
    pub async fn seek_to_position(&self, position: f64) -> Result<()> {
        let inner = &self.inner;
        let _gate = inner.commands.lock().await;

        let (book, state, current_file, target_file, local, run) = {
            let session = inner.session.lock();
            let book = session.book.clone().ok_or(PlaybackError::NoBookLoaded)?;
            if !(position >= 0.0 && position <= book.duration) {
                return Err(PlaybackError::InvalidPosition {
                    position,
                    duration: book.duration,
                });
            }
            let (target_file, local) = session.index.file_from_position(position);
            (
                book,
                session.state,
                session.file_index,
                target_file,
                local,
                session.run.clone(),
            )
        };

        let engine_active = state.is_active();

        if target_file != current_file {
            debug!(from = current_file, to = target_file, "Seeking across files");
            let switched = async {
                let path = inner.ensure_file(&book, target_file, &run).await?;
                if engine_active {
                    inner.session.lock().begin_switch();
                    inner
                        .load_file(
                            &path,
                            inner.config.file_switch_timeout,
                            &run,
                            state == PlaybackState::Paused,
                        )
                        .await?;
                }
                Ok::<_, PlaybackError>(())
            }
            .await;
            if let Err(e) = switched {
                inner.session.lock().abort_switch();
                match e {
                    PlaybackError::Cancelled => debug!(file_index = target_file, "Seek cancelled"),
                    _ => error!(error = %e, file_index = target_file, "Seek failed"),
                }
                return Err(e);
            }

            inner.session.lock().file_index = target_file;
            inner.prefetch(
                &book,
                [Some(target_file + 1), target_file.checked_sub(1)]
                    .into_iter()
                    .flatten(),
            );
            inner.emit(PlayerEvent::FileChanged {
                file_index: target_file,
            });
        }

        if engine_active {
            if let Err(e) = inner
                .engine
                .seek(Duration::from_secs_f64(local))
                .await
                .map_err(PlaybackError::Engine)
            {
                error!(error = %e, "Engine seek failed");
                inner.session.lock().abort_switch();
                return Err(e);
            }
        }

        let (changed_chapter, chapter_index) = {
            let mut session = inner.session.lock();
            let changed = session.reposition(target_file, position, local);
            (changed, session.chapter_index)
        };
        if let Some(chapter_index) = changed_chapter {
            inner.emit(PlayerEvent::ChapterChanged { chapter_index });
        }
        inner.emit(PlayerEvent::PositionChanged {
            position,
            chapter_index,
        });
        Ok(())
    }

    /// Seek to the start of chapter `index` (0-based).
    pub async fn seek_to_chapter(&self, index: usize) -> Result<()> {
        let start = {
            let session = self.inner.session.lock();
            if session.book.is_none() {
                return Err(PlaybackError::NoBookLoaded);
            }
            let timeline = &session.index;
            let start = timeline
                .chapter_start(index)
                .ok_or(PlaybackError::InvalidChapter {
                    index,
                    count: timeline.chapter_count(),
                })?;
            start.clamp(0.0, timeline.duration().max(0.0))
        };
        self.seek_to_position(start).await
    }

    pub async fn next_chapter(&self) -> Result<()> {
        let next = {
            let session = self.inner.session.lock();
            if session.book.is_none() {
                return Err(PlaybackError::NoBookLoaded);
            }
            let next = session.chapter_index + 1;
            if next >= session.index.chapter_count() {
                return Err(PlaybackError::NoNextChapter);
            }
            next
        };
        self.seek_to_chapter(next).await
    }

    /// Restart the current chapter when more than
    /// `previous_chapter_threshold` into it, otherwise go to the previous one.
    pub async fn previous_chapter(&self) -> Result<()> {
        let threshold = self.inner.config.previous_chapter_threshold.as_secs_f64();
        let target = {
            let session = self.inner.session.lock();
            if session.book.is_none() {
                return Err(PlaybackError::NoBookLoaded);
            }
            let current = session.chapter_index;
            let start = session
                .index
                .chapter_start(current)
                .ok_or(PlaybackError::NoPreviousChapter)?;

            if session.global_position - start > threshold {
                current
            } else if current == 0 {
                return Err(PlaybackError::NoPreviousChapter);
            } else {
                current - 1
            }
        };
        self.seek_to_chapter(target).await
    }

    pub async fn skip_forward(&self, seconds: f64) -> Result<()> {
        let target = self.relative_target(seconds)?;
        self.seek_to_position(target).await
    }

    pub async fn skip_backward(&self, seconds: f64) -> Result<()> {
        let target = self.relative_target(-seconds)?;
        self.seek_to_position(target).await
    }

    /// Clamp `speed` into `[0.5, 3.0]`, apply it and keep it for later
    /// loads. Returns the applied speed.
    #[instrument(skip(self))]
    pub async fn set_playback_speed(&self, speed: f64) -> Result<f64> {
        let applied = if speed.is_nan() {
            self.inner.config.default_speed
        } else {
            speed.clamp(MIN_PLAYBACK_SPEED, MAX_PLAYBACK_SPEED)
        };

        self.inner.session.lock().speed = applied;
        self.inner
            .engine
            .set_speed(applied)
            .await
            .map_err(PlaybackError::Engine)
            .inspect_err(|e| error!(error = %e, "Failed to set speed"))?;
        Ok(applied)
    }

    /// Clamp `volume` into `[0, 100]` and apply it. Returns the applied volume.
    #[instrument(skip(self))]
    pub async fn set_volume(&self, volume: i32) -> Result<u8> {
        let applied = volume.clamp(0, i32::from(MAX_VOLUME)) as u8;

        self.inner.session.lock().volume = applied;
        self.inner
            .engine
            .set_volume(applied)
            .await
            .map_err(PlaybackError::Engine)
            .inspect_err(|e| error!(error = %e, "Failed to set volume"))?;
        Ok(applied)
    }

    /// Report that file `ending_file_index` finished, for hosts whose engine
    /// does not publish [`EngineSignal`]s.
    pub async fn notify_track_end(&self, ending_file_index: usize) -> Result<TrackEndOutcome> {
        Arc::clone(&self.inner)
            .handle_track_end(ending_file_index, TrackEndTrigger::Host)
            .await
    }

    /// Stop playback, the signal listener and the download worker.
    pub async fn shutdown(&self) -> Result<()> {
        self.stop().await?;
        self.inner.shutdown.cancel();
        self.inner.downloads.shutdown().await;
        Ok(())
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Global position in seconds.
    pub fn current_position(&self) -> f64 {
        self.inner.session.lock().global_position
    }

    pub fn current_chapter(&self) -> Option<Chapter> {
        let session = self.inner.session.lock();
        let book = session.book.as_ref()?;
        book.chapter(session.chapter_index).cloned()
    }

    pub fn current_chapter_index(&self) -> usize {
        self.inner.session.lock().chapter_index
    }

    pub fn current_file(&self) -> Option<AudioFile> {
        let session = self.inner.session.lock();
        let book = session.book.as_ref()?;
        book.file(session.file_index).cloned()
    }

    pub fn current_file_index(&self) -> usize {
        self.inner.session.lock().file_index
    }

    pub fn is_playing(&self) -> bool {
        self.inner.session.lock().state == PlaybackState::Playing
    }

    /// `0..=100`; 0 without a book or for a zero-length book.
    pub fn progress_percentage(&self) -> f64 {
        self.snapshot()
            .map(|snapshot| snapshot.progress_percentage())
            .unwrap_or(0.0)
    }

    pub fn state(&self) -> PlaybackState {
        self.inner.session.lock().state
    }

    pub fn book(&self) -> Option<Arc<Book>> {
        self.inner.session.lock().book.clone()
    }

    pub fn snapshot(&self) -> Option<PlaybackSnapshot> {
        self.inner.session.lock().snapshot()
    }

    pub fn speed(&self) -> f64 {
        self.inner.session.lock().speed
    }

    pub fn volume(&self) -> u8 {
        self.inner.session.lock().volume
    }

    fn relative_target(&self, delta: f64) -> Result<f64> {
        let session = self.inner.session.lock();
        if session.book.is_none() {
            return Err(PlaybackError::NoBookLoaded);
        }
        Ok((session.global_position + delta).clamp(0.0, session.index.duration().max(0.0)))
    }
}

impl std::fmt::Debug for Player {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let session = self.inner.session.lock();
        f.debug_struct("Player")
            .field("book", &session.book.as_ref().map(|b| b.id.as_str()))
            .field("state", &session.state)
            .field("position", &session.global_position)
            .field("file_index", &session.file_index)
            .finish()
    }
}

impl PlayerInner {
    fn emit(&self, event: PlayerEvent) {
        // No subscribers is fine.
        let _ = self.events.emit(event);
    }

    fn transition(&self, state: PlaybackState) {
        let previous = std::mem::replace(&mut self.session.lock().state, state);
        if previous != state {
            debug!(from = %previous, to = %state, "State changed");
            self.emit(PlayerEvent::StateChanged { state });
        }
    }

    /// Blocking fetch of `file_index`, abandoned when `run` is cancelled.
    /// An abandoned transfer still completes into the cache.
    async fn ensure_file(
        &self,
        book: &Book,
        file_index: usize,
        run: &CancellationToken,
    ) -> Result<PathBuf> {
        let requested = tokio::select! {
            _ = run.cancelled() => {
                debug!(file_index, "Stopped while waiting for download");
                return Err(PlaybackError::Cancelled);
            }
            requested = self.downloads.request(book, file_index, DownloadMode::Blocking) => requested?,
        };
        match requested {
            FileAvailability::Ready(path) => Ok(path),
            FileAvailability::Queued => Err(PlaybackError::Internal(
                "blocking request returned without a file".to_string(),
            )),
        }
    }

    fn prefetch(&self, book: &Arc<Book>, indices: impl IntoIterator<Item = usize>) {
        if !self.config.prefetch_neighbors {
            return;
        }
        let wanted: Vec<usize> = indices
            .into_iter()
            .filter(|index| *index < book.files.len())
            .collect();
        if wanted.is_empty() {
            return;
        }

        let downloads = Arc::clone(&self.downloads);
        let book = Arc::clone(book);
        tokio::spawn(async move {
            for file_index in wanted {
                if let Err(e) = downloads
                    .request(&book, file_index, DownloadMode::Background)
                    .await
                {
                    debug!(error = %e, file_index, "Prefetch request failed");
                }
            }
        });
    }

    /// Load `path`, wait until the engine reports ready and apply the
    /// remembered speed.
    async fn load_file(
        &self,
        path: &Path,
        limit: Duration,
        run: &CancellationToken,
        paused: bool,
    ) -> Result<()> {
        let name = path.to_string_lossy();
        debug!(file = strip_path(&name), paused, "Loading into engine");
        self.engine
            .set_paused(paused)
            .await
            .map_err(PlaybackError::Engine)?;
        self.engine.load(path).await.map_err(PlaybackError::Engine)?;
        self.wait_until_ready(limit, run).await?;

        let speed = self.session.lock().speed;
        self.engine
            .set_speed(speed)
            .await
            .map_err(PlaybackError::Engine)
    }

    async fn wait_until_ready(&self, limit: Duration, run: &CancellationToken) -> Result<()> {
        let interval = self.config.ready_poll_interval;
        let poll = async {
            loop {
                match self.engine.is_idle().await {
                    Ok(false) => return Ok(()),
                    Ok(true) => tokio::time::sleep(interval).await,
                    Err(e) => return Err(PlaybackError::Engine(e)),
                }
            }
        };

        tokio::select! {
            _ = run.cancelled() => Err(PlaybackError::Cancelled),
            waited = timeout(limit, poll) => waited
                .unwrap_or_else(|_| Err(PlaybackError::timeout("engine readiness", limit))),
        }
    }

    #[instrument(skip(self), fields(trigger = ?trigger))]
    async fn handle_track_end(
        self: Arc<Self>,
        ending_file_index: usize,
        trigger: TrackEndTrigger,
    ) -> Result<TrackEndOutcome> {
        if self
            .track_end_in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Track end already in flight");
            return Ok(TrackEndOutcome::Ignored);
        }
        let _flight = FlightGuard(&self.track_end_in_flight);
        let _gate = self.commands.lock().await;

        let (book, state, current_file, file_count, run) = {
            let session = self.session.lock();
            (
                session.book.clone(),
                session.state,
                session.file_index,
                session.index.file_count(),
                session.run.clone(),
            )
        };

        let Some(book) = book else {
            return Ok(TrackEndOutcome::Ignored);
        };
        if !state.is_active() || current_file != ending_file_index {
            debug!(current_file, ending_file_index, "Stale track end");
            return Ok(TrackEndOutcome::Ignored);
        }

        if trigger == TrackEndTrigger::Idle {
            match self.engine.is_idle().await {
                Ok(true) => {}
                Ok(false) => {
                    debug!("Engine is not idle, ignoring signal");
                    return Ok(TrackEndOutcome::Ignored);
                }
                Err(e) => warn!(error = %e, "Cannot verify idle signal"),
            }
        }

        let next = ending_file_index + 1;
        if next >= file_count {
            self.finish_playback(&book).await;
            return Ok(TrackEndOutcome::Ended);
        }

        info!(next, "File ended, moving to next");
        let switched = async {
            let path = self.ensure_file(&book, next, &run).await?;
            self.session.lock().begin_switch();
            self.load_file(
                &path,
                self.config.file_switch_timeout,
                &run,
                state == PlaybackState::Paused,
            )
            .await
        }
        .await;

        if let Err(e) = switched {
            self.session.lock().abort_switch();
            if matches!(e, PlaybackError::Cancelled) {
                return Err(e);
            }
            error!(error = %e, next, "Cannot continue with next file, stopping");
            self.session.lock().restart_run();
            if let Err(stop_err) = self.engine.stop().await {
                warn!(error = %stop_err, "Engine failed to stop cleanly");
            }
            self.transition(PlaybackState::Stopped);
            self.emit(PlayerEvent::Error {
                message: format!("Cannot continue with file {}: {}", next, e),
                recoverable: e.is_transient(),
            });
            return Err(e);
        }

        let changed_chapter = {
            let mut session = self.session.lock();
            let offset = session.index.file_offset(next);
            session.reposition(next, offset, 0.0)
        };
        self.emit(PlayerEvent::FileChanged { file_index: next });
        if let Some(chapter_index) = changed_chapter {
            self.emit(PlayerEvent::ChapterChanged { chapter_index });
        }
        self.prefetch(&book, [next + 1]);
        Ok(TrackEndOutcome::Advanced { file_index: next })
    }

    async fn finish_playback(&self, book: &Book) {
        info!("Reached the end of the book");
        {
            let mut session = self.session.lock();
            session.restart_run();
            let last = session.file_index;
            let local = session.index.file_duration(last).unwrap_or(0.0);
            session.reposition(last, book.duration.max(0.0), local);
        }
        if let Err(e) = self.engine.stop().await {
            warn!(error = %e, "Engine failed to stop cleanly");
        }
        self.transition(PlaybackState::Stopped);
        self.emit(PlayerEvent::PlaybackEnded {
            book_id: book.id.clone(),
        });
    }
}

impl Drop for PlayerInner {
    fn drop(&mut self) {
        self.shutdown.cancel();
        self.session.get_mut().run.cancel();
    }
}

/// Clears the single-flight flag when track-end handling returns.
struct FlightGuard<'a>(&'a AtomicBool);

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

async fn listen_engine_signals(
    player: Weak<PlayerInner>,
    mut signals: broadcast::Receiver<EngineSignal>,
    shutdown: CancellationToken,
) {
    loop {
        let received = tokio::select! {
            _ = shutdown.cancelled() => break,
            received = signals.recv() => received,
        };

        let signal = match received {
            Ok(signal) => signal,
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "Missed engine signals");
                continue;
            }
            Err(RecvError::Closed) => break,
        };

        let Some(inner) = player.upgrade() else {
            break;
        };

        let ending = {
            let session = inner.session.lock();
            session.state.is_active().then_some(session.file_index)
        };
        let Some(ending) = ending else {
            continue;
        };

        let trigger = match signal {
            EngineSignal::EndOfFile => TrackEndTrigger::EndOfFile,
            EngineSignal::Idle => TrackEndTrigger::Idle,
        };
        tokio::spawn(async move {
            if let Err(e) = inner.handle_track_end(ending, trigger).await {
                debug!(error = %e, "Track end handling failed");
            }
        });
    }

    debug!("Engine signal listener exiting");
}
