//! Position tracker: one task per play run.
//!
//! Polls the engine while playing, mirrors the position into the session
//! and detects two failure modes of end-of-file signalling: the engine
//! reporting no position at all, and a position that stays pinned at the end
//! of the file.

use super::{PlayerConfig, PlayerInner, TrackEndTrigger};
use crate::model::PlaybackState;
use core_runtime::events::PlayerEvent;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub(super) fn spawn(player: Weak<PlayerInner>, run: CancellationToken, config: &PlayerConfig) {
    let tracker = PositionTracker::new(config.stall_threshold, config.end_of_file_margin);
    tokio::spawn(run_tracker(player, run, config.tracker_interval, tracker));
}

async fn run_tracker(
    player: Weak<PlayerInner>,
    run: CancellationToken,
    period: Duration,
    mut tracker: PositionTracker,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = run.cancelled() => break,
            _ = ticker.tick() => {
                let Some(inner) = player.upgrade() else {
                    break;
                };
                if !poll_once(&inner, &mut tracker).await {
                    break;
                }
            }
        }
    }

    debug!("Position tracker exiting");
}

/// One tracker tick. Returns `false` once the run is over.
async fn poll_once(inner: &Arc<PlayerInner>, tracker: &mut PositionTracker) -> bool {
    let (state, switching, file_index, epoch, file_offset, file_duration) = {
        let session = inner.session.lock();
        (
            session.state,
            session.switching,
            session.file_index,
            session.seek_epoch,
            session.index.file_offset(session.file_index),
            session.index.file_duration(session.file_index),
        )
    };

    match state {
        PlaybackState::Stopped => return false,
        PlaybackState::Paused => {
            tracker.reset();
            return true;
        }
        PlaybackState::Playing if switching => {
            tracker.reset();
            return true;
        }
        PlaybackState::Playing => {}
    }
    tracker.follow(file_index, epoch);

    let reported = match inner.engine.position().await {
        Ok(position) => position,
        Err(e) => {
            debug!(error = %e, "Engine position query failed");
            None
        }
    };
    let now = Instant::now();

    let trigger = match reported {
        Some(local) => {
            let local = local.as_secs_f64();
            let applied = {
                let mut session = inner.session.lock();
                // A command repositioned while the engine was queried.
                if session.seek_epoch != epoch
                    || session.switching
                    || session.file_index != file_index
                    || session.state != PlaybackState::Playing
                {
                    None
                } else {
                    session.local_position = local;
                    session.global_position = file_offset + local;
                    let changed = session.update_chapter();
                    Some((changed, session.global_position, session.chapter_index))
                }
            };

            match applied {
                Some((changed, position, chapter_index)) => {
                    if let Some(chapter_index) = changed {
                        inner.emit(PlayerEvent::ChapterChanged { chapter_index });
                    }
                    inner.emit(PlayerEvent::PositionChanged {
                        position,
                        chapter_index,
                    });
                    let remaining = file_duration.map(|duration| duration - local);
                    tracker.on_position(now, remaining)
                }
                None => None,
            }
        }
        None => tracker.on_missing(now),
    };

    if let Some(trigger) = trigger {
        warn!(file_index, ?trigger, "Forcing track end");
        tracker.reset();
        let inner = Arc::clone(inner);
        tokio::spawn(async move {
            if let Err(e) = inner.handle_track_end(file_index, trigger).await {
                debug!(error = %e, "Forced track end failed");
            }
        });
    }
    true
}

/// Timers behind stall detection.
#[derive(Debug)]
struct PositionTracker {
    stall_threshold: Duration,
    end_margin: f64,
    file_index: usize,
    epoch: u64,
    missing_since: Option<Instant>,
    near_end_since: Option<Instant>,
}

impl PositionTracker {
    fn new(stall_threshold: Duration, end_margin: Duration) -> Self {
        Self {
            stall_threshold,
            end_margin: end_margin.as_secs_f64(),
            file_index: 0,
            epoch: 0,
            missing_since: None,
            near_end_since: None,
        }
    }

    fn reset(&mut self) {
        self.missing_since = None;
        self.near_end_since = None;
    }

    /// Timers only span ticks of the same file and seek epoch.
    fn follow(&mut self, file_index: usize, epoch: u64) {
        if self.file_index != file_index || self.epoch != epoch {
            self.file_index = file_index;
            self.epoch = epoch;
            self.reset();
        }
    }

    fn on_position(&mut self, now: Instant, remaining: Option<f64>) -> Option<TrackEndTrigger> {
        self.missing_since = None;

        match remaining {
            Some(remaining) if remaining <= self.end_margin => {
                let since = *self.near_end_since.get_or_insert(now);
                (now.duration_since(since) > self.stall_threshold)
                    .then_some(TrackEndTrigger::StuckNearEnd)
            }
            _ => {
                self.near_end_since = None;
                None
            }
        }
    }

    fn on_missing(&mut self, now: Instant) -> Option<TrackEndTrigger> {
        self.near_end_since = None;
        let since = *self.missing_since.get_or_insert(now);
        (now.duration_since(since) > self.stall_threshold).then_some(TrackEndTrigger::Stalled)
    }
}
