//! Integration tests for the player state machine
//!
//! These tests drive a [`Player`] against a scripted engine and an in-memory
//! content source:
//! - Loading, cold start and resume
//! - Seeking within and across files, chapter navigation, skips
//! - Track-end handling (signals, host reports, stalls, failures)
//! - Speed/volume clamping

mod common;

use bridge_traits::EngineSignal;
use common::{
    drain, file_url, playable_book, sample_book, test_player_config, wait_for, Harness,
};
use core_playback::{PlaybackError, PlaybackState, TrackEndOutcome};
use core_runtime::events::PlayerEvent;
use std::time::{Duration, Instant};

const EPSILON: f64 = 1e-6;

async fn loaded() -> Harness {
    let harness = Harness::new();
    harness.player.load_book(sample_book(0.0)).await.unwrap();
    harness
}

async fn playing() -> Harness {
    let harness = loaded().await;
    harness.player.play().await.unwrap();
    harness
}

// ============================================================================
// Loading & starting
// ============================================================================

#[tokio::test]
async fn test_load_book_fetches_start_file() {
    let harness = Harness::new();
    let mut events = harness.player.subscribe();

    harness.player.load_book(sample_book(1100.0)).await.unwrap();

    assert_eq!(harness.player.current_file_index(), 1);
    assert_eq!(harness.player.current_chapter_index(), 1);
    assert!((harness.player.current_position() - 1100.0).abs() < EPSILON);
    assert!(harness.downloads.is_available("play_1", 1));
    assert_eq!(harness.player.state(), PlaybackState::Stopped);

    let events = drain(&mut events);
    assert!(events.iter().any(|event| matches!(
        event,
        PlayerEvent::BookLoaded { file_count: 2, chapter_count: 2, .. }
    )));
}

#[tokio::test]
async fn test_load_failure_unloads_book() {
    let harness = Harness::new();
    let book = sample_book(0.0);
    harness.source.fail_url(file_url(&book, 0));

    let err = harness.player.load_book(book).await.unwrap_err();

    assert!(matches!(err, PlaybackError::Download { .. }));
    assert!(harness.player.book().is_none());
    assert!(matches!(
        harness.player.play().await,
        Err(PlaybackError::NoBookLoaded)
    ));
}

#[tokio::test]
async fn test_open_converts_remote_book() {
    let harness = Harness::new();
    harness.source.set_playable_book(playable_book());

    harness.player.open("li_remote").await.unwrap();

    let book = harness.player.book().unwrap();
    assert_eq!(book.id, "play_remote");
    assert_eq!(book.files.len(), 2);
    assert_eq!(harness.player.current_file_index(), 1);
    assert!(matches!(
        harness.player.open("missing").await,
        Err(PlaybackError::Bridge(_))
    ));
}

#[tokio::test]
async fn test_play_without_book() {
    let harness = Harness::new();
    assert!(matches!(
        harness.player.play().await,
        Err(PlaybackError::NoBookLoaded)
    ));
}

#[tokio::test]
async fn test_cold_play_requires_cached_file() {
    let harness = loaded().await;
    harness.downloads.forget_file("play_1", 0);

    let err = harness.player.play().await.unwrap_err();

    assert!(matches!(err, PlaybackError::NotReady { file_index: 0 }));
    assert_eq!(harness.player.state(), PlaybackState::Stopped);
    assert!(harness.engine.loads().is_empty());
}

#[tokio::test]
async fn test_play_starts_engine_at_stored_offset() {
    let harness = Harness::new();
    harness.player.load_book(sample_book(300.0)).await.unwrap();
    let mut events = harness.player.subscribe();

    harness.player.play().await.unwrap();

    assert!(harness.player.is_playing());
    assert_eq!(harness.engine.loads().len(), 1);
    assert_eq!(harness.engine.seeks(), vec![Duration::from_secs(300)]);
    assert!(!harness.engine.is_paused());
    assert!(drain(&mut events).contains(&PlayerEvent::StateChanged {
        state: PlaybackState::Playing
    }));

    // Already playing: no-op.
    harness.player.play().await.unwrap();
    assert_eq!(harness.engine.loads().len(), 1);
}

#[tokio::test]
async fn test_play_times_out_when_engine_never_ready() {
    let harness = loaded().await;
    harness.engine.never_ready();

    let err = harness.player.play().await.unwrap_err();

    assert!(matches!(err, PlaybackError::Timeout { .. }));
    assert_eq!(harness.player.state(), PlaybackState::Stopped);
}

// ============================================================================
// Pause / stop
// ============================================================================

#[tokio::test]
async fn test_pause_while_stopped_fails() {
    let harness = loaded().await;

    let err = harness.player.pause().await.unwrap_err();

    assert!(matches!(
        err,
        PlaybackError::InvalidState {
            operation: "pause",
            state: PlaybackState::Stopped
        }
    ));
}

#[tokio::test]
async fn test_pause_and_resume() {
    let harness = playing().await;

    harness.player.pause().await.unwrap();
    assert_eq!(harness.player.state(), PlaybackState::Paused);
    assert!(harness.engine.is_paused());

    harness.player.play().await.unwrap();
    assert_eq!(harness.player.state(), PlaybackState::Playing);
    assert!(!harness.engine.is_paused());
    assert_eq!(harness.engine.loads().len(), 1);
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let harness = playing().await;

    harness.player.stop().await.unwrap();
    harness.player.stop().await.unwrap();

    assert_eq!(harness.player.state(), PlaybackState::Stopped);
    assert_eq!(harness.engine.stops(), 1);
}

#[tokio::test]
async fn test_stop_interrupts_seek_waiting_for_download() {
    let harness = Harness::with_config(test_player_config().with_prefetch_neighbors(false));
    harness.player.load_book(sample_book(0.0)).await.unwrap();
    harness.player.play().await.unwrap();
    harness.source.set_delay(Duration::from_millis(1500));

    let player = harness.player.clone();
    let seek = tokio::spawn(async move { player.seek_to_position(1100.0).await });
    tokio::time::sleep(Duration::from_millis(100)).await;

    let started = Instant::now();
    harness.player.stop().await.unwrap();
    assert!(started.elapsed() < Duration::from_millis(500));

    let err = seek.await.unwrap().unwrap_err();
    assert!(matches!(err, PlaybackError::Cancelled));
    assert_eq!(harness.player.state(), PlaybackState::Stopped);
    assert_eq!(harness.player.current_file_index(), 0);
    assert_eq!(harness.engine.loads().len(), 1);

    // The abandoned transfer still lands in the cache.
    let downloads = harness.downloads.clone();
    assert!(wait_for(Duration::from_secs(3), || downloads.is_available("play_1", 1)).await);
}

// ============================================================================
// Seeking & navigation
// ============================================================================

#[tokio::test]
async fn test_seek_within_first_file_changes_chapter() {
    let harness = loaded().await;
    let mut events = harness.player.subscribe();

    harness.player.seek_to_position(650.0).await.unwrap();

    assert_eq!(harness.player.current_file_index(), 0);
    assert_eq!(harness.player.current_chapter_index(), 1);
    assert!((harness.player.current_position() - 650.0).abs() < EPSILON);

    let events = drain(&mut events);
    assert!(events.contains(&PlayerEvent::ChapterChanged { chapter_index: 1 }));
    assert!(events.contains(&PlayerEvent::PositionChanged {
        position: 650.0,
        chapter_index: 1
    }));
}

#[tokio::test]
async fn test_seek_into_second_file() {
    let harness = loaded().await;

    harness.player.seek_to_position(1100.0).await.unwrap();

    assert_eq!(harness.player.current_file_index(), 1);
    assert_eq!(harness.player.current_chapter_index(), 1);
    assert!(harness.downloads.is_available("play_1", 1));
    assert_eq!(harness.player.current_file().unwrap().index, 1);
}

#[tokio::test]
async fn test_seek_across_files_while_playing_reloads_engine() {
    let harness = playing().await;
    let mut events = harness.player.subscribe();

    harness.player.seek_to_position(1100.0).await.unwrap();

    let loads = harness.engine.loads();
    assert_eq!(loads.len(), 2);
    assert_eq!(
        loads[1],
        harness.downloads.cached_path("play_1", 1).unwrap()
    );
    assert_eq!(harness.engine.seeks().last(), Some(&Duration::from_secs(100)));
    assert!(harness.player.is_playing());
    assert!(drain(&mut events).contains(&PlayerEvent::FileChanged { file_index: 1 }));
}

#[tokio::test]
async fn test_seek_while_paused_stays_paused() {
    let harness = playing().await;
    harness.player.pause().await.unwrap();

    harness.player.seek_to_position(1500.0).await.unwrap();

    assert_eq!(harness.player.state(), PlaybackState::Paused);
    assert!(harness.engine.is_paused());
    assert_eq!(harness.engine.seeks().last(), Some(&Duration::from_secs(500)));
}

#[tokio::test]
async fn test_seek_rejects_positions_outside_book() {
    let harness = loaded().await;

    for position in [-1.0, 1800.5, f64::NAN] {
        let err = harness.player.seek_to_position(position).await.unwrap_err();
        assert!(matches!(err, PlaybackError::InvalidPosition { .. }));
    }
    assert_eq!(harness.player.current_position(), 0.0);
}

#[tokio::test]
async fn test_skip_forward_clamps_to_duration() {
    let harness = loaded().await;
    harness.player.seek_to_position(1790.0).await.unwrap();

    harness.player.skip_forward(30.0).await.unwrap();

    assert!((harness.player.current_position() - 1800.0).abs() < EPSILON);
    assert_eq!(harness.player.current_file_index(), 1);
    assert!((harness.player.progress_percentage() - 100.0).abs() < EPSILON);
}

#[tokio::test]
async fn test_skip_backward_clamps_to_zero() {
    let harness = loaded().await;
    harness.player.seek_to_position(10.0).await.unwrap();

    harness.player.skip_backward(30.0).await.unwrap();

    assert_eq!(harness.player.current_position(), 0.0);
}

#[tokio::test]
async fn test_previous_chapter_near_start_goes_back() {
    let harness = loaded().await;
    harness.player.seek_to_position(602.0).await.unwrap();

    harness.player.previous_chapter().await.unwrap();

    assert_eq!(harness.player.current_position(), 0.0);
    assert_eq!(harness.player.current_chapter_index(), 0);
}

#[tokio::test]
async fn test_previous_chapter_restarts_current() {
    let harness = loaded().await;
    harness.player.seek_to_position(700.0).await.unwrap();

    harness.player.previous_chapter().await.unwrap();

    assert!((harness.player.current_position() - 600.0).abs() < EPSILON);
    assert_eq!(harness.player.current_chapter_index(), 1);
}

#[tokio::test]
async fn test_chapter_navigation_bounds() {
    let harness = loaded().await;

    assert!(matches!(
        harness.player.previous_chapter().await,
        Err(PlaybackError::NoPreviousChapter)
    ));

    harness.player.next_chapter().await.unwrap();
    assert_eq!(harness.player.current_chapter().unwrap().title, "Ch2");

    assert!(matches!(
        harness.player.next_chapter().await,
        Err(PlaybackError::NoNextChapter)
    ));
    assert!(matches!(
        harness.player.seek_to_chapter(7).await,
        Err(PlaybackError::InvalidChapter { index: 7, count: 2 })
    ));
}

// ============================================================================
// Track end
// ============================================================================

#[tokio::test]
async fn test_track_end_advances_to_next_file() {
    let harness = playing().await;
    let mut events = harness.player.subscribe();

    let outcome = harness.player.notify_track_end(0).await.unwrap();

    assert_eq!(outcome, TrackEndOutcome::Advanced { file_index: 1 });
    assert_eq!(harness.player.current_file_index(), 1);
    assert!((harness.player.current_position() - 1000.0).abs() < EPSILON);
    assert!(harness.player.is_playing());
    assert!(drain(&mut events).contains(&PlayerEvent::FileChanged { file_index: 1 }));
}

#[tokio::test]
async fn test_concurrent_track_end_signals_advance_once() {
    let harness = playing().await;

    let (first, second) = tokio::join!(
        harness.player.notify_track_end(0),
        harness.player.notify_track_end(0)
    );

    let outcomes = [first.unwrap(), second.unwrap()];
    let advanced = outcomes
        .iter()
        .filter(|outcome| matches!(outcome, TrackEndOutcome::Advanced { .. }))
        .count();
    assert_eq!(advanced, 1);
    assert!(outcomes.contains(&TrackEndOutcome::Ignored));
    assert_eq!(harness.player.current_file_index(), 1);
    assert_eq!(harness.engine.loads().len(), 2);
}

#[tokio::test]
async fn test_stale_track_end_is_ignored() {
    let harness = playing().await;
    harness.player.seek_to_position(1100.0).await.unwrap();

    let outcome = harness.player.notify_track_end(0).await.unwrap();

    assert_eq!(outcome, TrackEndOutcome::Ignored);
    assert_eq!(harness.player.current_file_index(), 1);
}

#[tokio::test]
async fn test_end_of_last_file_ends_playback() {
    let harness = playing().await;
    harness.player.seek_to_position(1700.0).await.unwrap();
    let mut events = harness.player.subscribe();

    let outcome = harness.player.notify_track_end(1).await.unwrap();

    assert_eq!(outcome, TrackEndOutcome::Ended);
    assert_eq!(harness.player.state(), PlaybackState::Stopped);
    assert!((harness.player.current_position() - 1800.0).abs() < EPSILON);

    let events = drain(&mut events);
    assert!(events.contains(&PlayerEvent::PlaybackEnded {
        book_id: "play_1".to_string()
    }));
    assert!(events.contains(&PlayerEvent::StateChanged {
        state: PlaybackState::Stopped
    }));
}

#[tokio::test]
async fn test_engine_end_of_file_signal_advances() {
    let harness = playing().await;

    harness.engine.signal(EngineSignal::EndOfFile);

    let player = harness.player.clone();
    assert!(wait_for(Duration::from_secs(2), || player.current_file_index() == 1).await);
    assert!(harness.player.is_playing());
}

#[tokio::test]
async fn test_spurious_idle_signal_is_ignored() {
    let harness = playing().await;

    // The engine still has a file loaded, so the idle signal is stale.
    harness.engine.signal(EngineSignal::Idle);
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(harness.player.current_file_index(), 0);
    assert_eq!(harness.engine.loads().len(), 1);
}

#[tokio::test]
async fn test_next_file_failure_stops_playback() {
    let harness = Harness::new();
    let book = sample_book(0.0);
    harness.source.fail_url(file_url(&book, 1));
    harness.player.load_book(book).await.unwrap();
    harness.player.play().await.unwrap();
    let mut events = harness.player.subscribe();

    let err = harness.player.notify_track_end(0).await.unwrap_err();

    assert!(matches!(err, PlaybackError::Download { file_index: 1, .. }));
    assert_eq!(harness.player.state(), PlaybackState::Stopped);
    assert!(drain(&mut events)
        .iter()
        .any(|event| matches!(event, PlayerEvent::Error { .. })));
}

#[tokio::test]
async fn test_position_never_moves_back_during_file_switch() {
    let harness = playing().await;
    harness.engine.set_position(Duration::from_secs(990));
    let player = harness.player.clone();
    assert!(
        wait_for(Duration::from_secs(2), || {
            (player.current_position() - 990.0).abs() < EPSILON
        })
        .await
    );
    harness.engine.slow_set_speed(Duration::from_millis(150));
    let mut events = harness.player.subscribe();

    let sample = async {
        let mut positions = Vec::new();
        for _ in 0..15 {
            positions.push(player.current_position());
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        positions
    };
    let (outcome, positions) = tokio::join!(harness.player.notify_track_end(0), sample);

    assert_eq!(outcome.unwrap(), TrackEndOutcome::Advanced { file_index: 1 });
    assert!(
        positions.iter().all(|position| *position >= 990.0 - EPSILON),
        "position went backwards: {:?}",
        positions
    );

    let events = drain(&mut events);
    assert!(!events
        .iter()
        .any(|event| matches!(event, PlayerEvent::ChapterChanged { .. })));
    assert!(events.iter().all(|event| match event {
        PlayerEvent::PositionChanged { position, .. } => *position >= 990.0 - EPSILON,
        _ => true,
    }));
    assert!(harness.player.current_position() >= 1000.0 - EPSILON);
}

// ============================================================================
// Position tracker
// ============================================================================

#[tokio::test]
async fn test_tracker_follows_engine_position() {
    let harness = playing().await;

    harness.engine.set_position(Duration::from_secs(12));

    let player = harness.player.clone();
    assert!(
        wait_for(Duration::from_secs(2), || {
            (player.current_position() - 12.0).abs() < EPSILON
        })
        .await
    );
}

#[tokio::test]
async fn test_tracker_reports_chapter_crossing() {
    let harness = playing().await;
    let mut events = harness.player.subscribe();

    harness.engine.set_position(Duration::from_secs(601));

    let player = harness.player.clone();
    assert!(wait_for(Duration::from_secs(2), || player.current_chapter_index() == 1).await);
    assert!(drain(&mut events).contains(&PlayerEvent::ChapterChanged { chapter_index: 1 }));
}

#[tokio::test]
async fn test_missing_position_forces_track_end() {
    let harness = playing().await;

    harness.engine.stop_reporting_position();

    let player = harness.player.clone();
    assert!(wait_for(Duration::from_secs(3), || player.current_file_index() == 1).await);
}

#[tokio::test]
async fn test_position_stuck_at_file_end_forces_track_end() {
    let harness = playing().await;

    harness.engine.set_position(Duration::from_secs_f64(999.8));

    let player = harness.player.clone();
    assert!(wait_for(Duration::from_secs(3), || player.current_file_index() == 1).await);
}

#[tokio::test]
async fn test_tracker_stops_with_player() {
    let harness = playing().await;
    harness.player.stop().await.unwrap();

    harness.engine.set_position(Duration::from_secs(42));
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(harness.player.current_position(), 0.0);
}

// ============================================================================
// Speed & volume
// ============================================================================

#[tokio::test]
async fn test_speed_is_clamped() {
    let harness = loaded().await;

    assert_eq!(harness.player.set_playback_speed(5.0).await.unwrap(), 3.0);
    assert_eq!(harness.engine.speed(), 3.0);
    assert_eq!(harness.player.set_playback_speed(0.1).await.unwrap(), 0.5);
    assert_eq!(harness.player.set_playback_speed(1.25).await.unwrap(), 1.25);
    assert_eq!(harness.player.speed(), 1.25);
}

#[tokio::test]
async fn test_speed_survives_reload() {
    let harness = loaded().await;
    harness.player.set_playback_speed(1.5).await.unwrap();
    harness.player.play().await.unwrap();

    harness.player.seek_to_position(1200.0).await.unwrap();

    assert_eq!(harness.engine.speed(), 1.5);
}

#[tokio::test]
async fn test_volume_is_clamped() {
    let harness = loaded().await;

    assert_eq!(harness.player.set_volume(150).await.unwrap(), 100);
    assert_eq!(harness.player.set_volume(-5).await.unwrap(), 0);
    assert_eq!(harness.engine.volume(), 0);
    assert_eq!(harness.player.volume(), 0);
}
