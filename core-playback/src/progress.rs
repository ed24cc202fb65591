//! # Progress Reporter
//!
//! Periodically pushes the player's position to a [`ProgressSink`].
//!
//! Nothing is reported unless a book is loaded, the player is playing and
//! the position is past 0. Listening time is wall time between syncs while
//! playing; it is credited to the session in chunks of at least
//! `min_listen_threshold`.

use crate::error::{PlaybackError, Result};
use crate::model::PlaybackState;
use crate::player::Player;
use bridge_traits::{Clock, ProgressSink, ProgressUpdate};
use chrono::{DateTime, Utc};
use core_runtime::config::CoreConfig;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct ProgressConfig {
    /// Sync period (default: 5s)
    pub interval: Duration,
    /// Smallest amount of listening time credited at once (default: 30s)
    pub min_listen_threshold: Duration,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            min_listen_threshold: Duration::from_secs(30),
        }
    }
}

/// Listening time bookkeeping for the current session.
#[derive(Debug, Default)]
struct ListeningLedger {
    session_id: Option<String>,
    time_listening: f64,
    pending: f64,
    last_sync: Option<DateTime<Utc>>,
}

/// Handle to the progress sync loop.
#[derive(Clone)]
pub struct ProgressReporter {
    inner: Arc<ReporterInner>,
}

struct ReporterInner {
    player: Player,
    sink: Arc<dyn ProgressSink>,
    clock: Arc<dyn Clock>,
    config: ProgressConfig,
    ledger: Mutex<ListeningLedger>,
    shutdown: CancellationToken,
}

impl ProgressReporter {
    pub fn new(
        player: Player,
        sink: Arc<dyn ProgressSink>,
        clock: Arc<dyn Clock>,
        config: ProgressConfig,
    ) -> Self {
        Self {
            inner: Arc::new(ReporterInner {
                player,
                sink,
                clock,
                config,
                ledger: Mutex::new(ListeningLedger::default()),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Build a reporter when progress sync is enabled in `config`.
    pub fn from_core(player: Player, config: &CoreConfig) -> Option<Self> {
        if !config.features.enable_progress_sync {
            return None;
        }
        let sink = config.progress_sink.clone()?;
        Some(Self::new(
            player,
            sink,
            Arc::clone(&config.clock),
            ProgressConfig::default(),
        ))
    }

    /// Start the periodic sync loop.
    ///
    /// # Errors
    ///
    /// Returns [`PlaybackError::Runtime`] outside a Tokio runtime.
    pub fn start(&self) -> Result<()> {
        let handle = tokio::runtime::Handle::try_current().map_err(|_| {
            core_runtime::Error::CapabilityMissing {
                capability: "TokioRuntime".to_string(),
                message: "Progress reporter must be started inside a Tokio runtime".to_string(),
            }
        })?;

        handle.spawn(run_reporter(
            Arc::downgrade(&self.inner),
            self.inner.shutdown.clone(),
            self.inner.config.interval,
        ));
        Ok(())
    }

    /// Sync right away. Returns `false` when there was nothing to report.
    pub async fn sync_now(&self) -> Result<bool> {
        self.inner.sync().await
    }

    /// Accumulated listening time of the current session in seconds.
    pub fn time_listening(&self) -> f64 {
        self.inner.ledger.lock().time_listening
    }

    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }
}

impl ReporterInner {
    async fn sync(&self) -> Result<bool> {
        let Some(snapshot) = self.player.snapshot() else {
            self.ledger.lock().last_sync = None;
            return Ok(false);
        };
        if snapshot.state != PlaybackState::Playing || snapshot.position <= 0.0 {
            // Paused time is not listening time.
            self.ledger.lock().last_sync = None;
            return Ok(false);
        }

        let now = self.clock.now();
        let threshold = self.config.min_listen_threshold.as_secs_f64();
        let update = {
            let mut ledger = self.ledger.lock();
            if ledger.session_id.as_deref() != Some(snapshot.book_id.as_str()) {
                *ledger = ListeningLedger {
                    session_id: Some(snapshot.book_id.clone()),
                    ..ListeningLedger::default()
                };
            }

            if let Some(last) = ledger.last_sync {
                let elapsed = (now - last)
                    .to_std()
                    .map(|elapsed| elapsed.as_secs_f64())
                    .unwrap_or(0.0);
                ledger.pending += elapsed;
            }
            if ledger.pending >= threshold {
                ledger.time_listening += ledger.pending;
                ledger.pending = 0.0;
            }
            ledger.last_sync = Some(now);

            ProgressUpdate {
                session_id: snapshot.book_id.clone(),
                library_item_id: snapshot.library_item_id.clone(),
                current_time: snapshot.position,
                time_listening: ledger.time_listening,
                duration: snapshot.duration,
                updated_at: now.timestamp_millis(),
            }
        };

        let position = update.current_time;
        self.sink.report(update).await.map_err(|e| {
            warn!(error = %e, session_id = %snapshot.book_id, "Progress sync failed");
            PlaybackError::Bridge(e)
        })?;
        debug!(session_id = %snapshot.book_id, position, "Progress synced");
        Ok(true)
    }
}

async fn run_reporter(reporter: Weak<ReporterInner>, shutdown: CancellationToken, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let Some(inner) = reporter.upgrade() else {
                    break;
                };
                // Failures were already logged; the next tick tries again.
                let _ = inner.sync().await;
            }
        }
    }

    debug!("Progress reporter exiting");
}

impl Drop for ReporterInner {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
