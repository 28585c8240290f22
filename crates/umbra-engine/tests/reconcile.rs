//! Reconciliation behavior against the recording mock.

use std::{sync::Arc, time::Duration};

use tokio::time::{Instant, sleep};

use screen_ops::{
    DisplayInfo, Rect,
    ops::{MockScreen, OverlayCall},
    Sample,
};
use umbra_engine::{Engine, EngineCfg, EngineEvent, EngineHandle, Error};

fn display(id: u32, x: i32) -> DisplayInfo {
    DisplayInfo {
        id,
        bounds: Rect::new(x, 0, 1920, 1080),
        is_primary: id == 1,
        is_builtin: id == 1,
    }
}

fn test_cfg() -> EngineCfg {
    EngineCfg {
        poll_ms: 10,
        hotplug_every: 3,
        sample_timeout_ms: 500,
        default_opacity: 0.7,
        event_capacity: 64,
    }
}

/// Engine over a mock with displays 1 (primary) and 2 side by side.
fn spawn_two_displays() -> (EngineHandle, Arc<MockScreen>) {
    let mock = Arc::new(MockScreen::new());
    mock.set_displays(vec![display(1, 0), display(2, 1920)]);
    let handle = Engine::spawn(mock.clone(), test_cfg());
    (handle, mock)
}

/// Enough wall time for several sampler ticks.
async fn settle() {
    sleep(Duration::from_millis(150)).await;
}

async fn drain_events(handle: &EngineHandle, cursor: &mut umbra_engine::EventCursor) -> Vec<EngineEvent> {
    let mut events = Vec::new();
    loop {
        let deadline = Instant::now() + Duration::from_millis(50);
        match handle.next_event_until(cursor, deadline).await {
            Some(ev) => events.push(ev),
            None => break,
        }
    }
    events
}

#[tokio::test(flavor = "multi_thread")]
async fn focus_move_issues_minimal_ops_in_order() {
    let (handle, mock) = spawn_two_displays();

    // Focus lands on display 1: display 2 gets dimmed.
    mock.focus_at("Terminal", 100, 100);
    settle().await;
    assert_eq!(mock.overlays(), vec![2]);
    assert_eq!(mock.overlay_opacity(2), Some(0.7));
    let status = handle.status().await.expect("status");
    assert_eq!(status.focused_display, Some(1));

    // Focus moves to display 2: overlay created on 1, destroyed on 2.
    let mut cursor = handle.subscribe();
    mock.clear_calls();
    mock.focus_at("Safari", 2000, 100);
    settle().await;

    assert_eq!(
        mock.calls(),
        vec![OverlayCall::Create(1, 0.7), OverlayCall::Destroy(2)]
    );
    let status = handle.status().await.expect("status");
    assert_eq!(status.focused_display, Some(2));

    let events = drain_events(&handle, &mut cursor).await;
    assert!(events.contains(&EngineEvent::FocusChanged { display: Some(2) }));

    handle.shutdown().await.expect("shutdown");
}

#[tokio::test(flavor = "multi_thread")]
async fn steady_state_issues_no_overlay_ops() {
    let (handle, mock) = spawn_two_displays();
    mock.focus_at("Terminal", 100, 100);
    settle().await;

    mock.clear_calls();
    settle().await;
    settle().await;
    assert!(mock.calls().is_empty(), "steady state must be quiet");

    handle.shutdown().await.expect("shutdown");
}

#[tokio::test(flavor = "multi_thread")]
async fn focused_display_is_never_dimmed() {
    let (handle, mock) = spawn_two_displays();
    mock.focus_at("Terminal", 100, 100);
    settle().await;

    let status = handle.status().await.expect("status");
    assert!(!status.monitors[&1].has_overlay);
    assert!(status.monitors[&1].is_focused);
    assert!(status.monitors[&2].has_overlay);

    // Even with its own setting disabled, the focused display stays clear
    // and disabling it does not dim it.
    handle.set_monitor_enabled(1, false).await.expect("disable");
    settle().await;
    let status = handle.status().await.expect("status");
    assert!(!status.monitors[&1].has_overlay);

    handle.shutdown().await.expect("shutdown");
}

#[tokio::test(flavor = "multi_thread")]
async fn disabled_display_is_never_dimmed() {
    let (handle, mock) = spawn_two_displays();
    handle.set_monitor_enabled(2, false).await.expect("disable");

    mock.focus_at("Terminal", 100, 100);
    settle().await;
    assert!(!mock.has_overlay(2));

    // Re-enabling a non-focused display dims it immediately.
    handle.set_monitor_enabled(2, true).await.expect("enable");
    assert!(mock.has_overlay(2));

    handle.shutdown().await.expect("shutdown");
}

#[tokio::test(flavor = "multi_thread")]
async fn opacity_update_never_recreates_the_overlay() {
    let (handle, mock) = spawn_two_displays();
    mock.focus_at("Terminal", 100, 100);
    settle().await;
    assert!(mock.has_overlay(2));

    mock.clear_calls();
    handle.set_monitor_opacity(2, 0.42).await.expect("opacity");

    assert_eq!(mock.destroy_count(), 0);
    assert_eq!(mock.create_count(), 0);
    assert_eq!(mock.set_opacity_count(), 1);
    assert_eq!(mock.overlay_opacity(2), Some(0.42));

    // Round-trip: only the targeted display changed.
    let status = handle.status().await.expect("status");
    assert_eq!(status.monitors[&2].opacity, 0.42);
    assert_eq!(status.monitors[&1].opacity, 0.7);

    handle.shutdown().await.expect("shutdown");
}

#[tokio::test(flavor = "multi_thread")]
async fn global_opacity_skips_overridden_monitors() {
    let mock = Arc::new(MockScreen::new());
    mock.set_displays(vec![display(1, 0), display(2, 1920), display(3, 3840)]);
    let handle = Engine::spawn(mock.clone(), test_cfg());

    mock.focus_at("Terminal", 100, 100);
    settle().await;
    assert_eq!(mock.overlays(), vec![2, 3]);

    handle.set_monitor_opacity(2, 0.9).await.expect("override");
    mock.clear_calls();
    handle.set_opacity(0.5).await.expect("global opacity");

    // Only the non-overridden live overlay was retargeted, in place.
    assert_eq!(mock.calls(), vec![OverlayCall::SetOpacity(3, 0.5)]);
    assert_eq!(mock.overlay_opacity(2), Some(0.9));
    assert_eq!(mock.overlay_opacity(3), Some(0.5));

    let status = handle.status().await.expect("status");
    assert_eq!(status.opacity, 0.5);
    assert_eq!(status.monitors[&1].opacity, 0.5);
    assert_eq!(status.monitors[&2].opacity, 0.9);

    handle.shutdown().await.expect("shutdown");
}

#[tokio::test(flavor = "multi_thread")]
async fn toggle_clears_and_restores_overlays() {
    let (handle, mock) = spawn_two_displays();
    mock.focus_at("Terminal", 100, 100);
    settle().await;
    assert!(mock.has_overlay(2));

    let enabled = handle.toggle().await.expect("toggle off");
    assert!(!enabled);
    assert!(mock.overlays().is_empty());

    let enabled = handle.toggle().await.expect("toggle on");
    assert!(enabled);
    assert_eq!(mock.overlays(), vec![2]);

    handle.shutdown().await.expect("shutdown");
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_sample_changes_nothing() {
    let (handle, mock) = spawn_two_displays();
    mock.focus_at("Terminal", 100, 100);
    settle().await;

    mock.set_sample(Sample::Unknown);
    mock.clear_calls();
    settle().await;

    assert!(mock.calls().is_empty());
    let status = handle.status().await.expect("status");
    assert_eq!(status.focused_display, Some(1));
    assert!(status.monitors[&2].has_overlay);

    handle.shutdown().await.expect("shutdown");
}

#[tokio::test(flavor = "multi_thread")]
async fn permission_denial_pauses_dimming_and_warns_once() {
    let (handle, mock) = spawn_two_displays();
    let mut cursor = handle.subscribe();

    mock.set_sample(Sample::PermissionDenied);
    settle().await;

    let status = handle.status().await.expect("status");
    assert!(status.permission_denied);
    assert!(mock.overlays().is_empty(), "no dimming from unknown focus");

    // Sustained denial produces a single error event, not one per tick.
    let errors = drain_events(&handle, &mut cursor)
        .await
        .into_iter()
        .filter(|ev| matches!(ev, EngineEvent::Error { .. }))
        .count();
    assert_eq!(errors, 1);

    // Sampling keeps running, so a later grant recovers on its own.
    mock.focus_at("Terminal", 100, 100);
    settle().await;
    let status = handle.status().await.expect("status");
    assert!(!status.permission_denied);
    assert_eq!(status.focused_display, Some(1));

    handle.shutdown().await.expect("shutdown");
}

#[tokio::test(flavor = "multi_thread")]
async fn opacity_extremes_are_legal() {
    let (handle, mock) = spawn_two_displays();
    mock.focus_at("Terminal", 100, 100);
    settle().await;

    handle.set_monitor_opacity(2, 0.0).await.expect("opacity 0");
    assert!(mock.has_overlay(2), "0.0 still keeps the overlay");
    assert_eq!(mock.overlay_opacity(2), Some(0.0));

    handle.set_monitor_opacity(2, 1.0).await.expect("opacity 1");
    assert_eq!(mock.overlay_opacity(2), Some(1.0));

    handle.shutdown().await.expect("shutdown");
}

#[tokio::test(flavor = "multi_thread")]
async fn invalid_requests_are_rejected() {
    let (handle, _mock) = spawn_two_displays();

    match handle.set_monitor_opacity(99, 0.5).await {
        Err(Error::UnknownDisplay(99)) => {}
        other => panic!("expected UnknownDisplay, got {other:?}"),
    }
    match handle.set_opacity(f64::NAN).await {
        Err(Error::InvalidOpacity(_)) => {}
        other => panic!("expected InvalidOpacity, got {other:?}"),
    }

    // Out-of-range finite values clamp rather than error.
    handle.set_opacity(1.5).await.expect("clamps");
    let status = handle.status().await.expect("status");
    assert_eq!(status.opacity, 1.0);

    handle.shutdown().await.expect("shutdown");
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_create_is_retried_without_blocking_others() {
    let mock = Arc::new(MockScreen::new());
    mock.set_displays(vec![display(1, 0), display(2, 1920), display(3, 3840)]);
    let handle = Engine::spawn(mock.clone(), test_cfg());

    mock.fail_display(2, true);
    mock.focus_at("Terminal", 100, 100);
    settle().await;

    // Display 3 dimmed fine; 2 is pending retry.
    assert_eq!(mock.overlays(), vec![3]);
    assert!(mock.create_count() >= 2);

    mock.fail_display(2, false);
    settle().await;
    assert_eq!(mock.overlays(), vec![2, 3]);

    handle.shutdown().await.expect("shutdown");
}

#[tokio::test(flavor = "multi_thread")]
async fn sustained_create_exhaustion_stops_the_engine() {
    let (handle, mock) = spawn_two_displays();
    let mut cursor = handle.subscribe();

    mock.fail_creates(true);
    mock.focus_at("Terminal", 100, 100);
    // Enough ticks to exceed the exhaustion threshold.
    sleep(Duration::from_millis(400)).await;

    assert!(matches!(handle.status().await, Err(Error::Stopped)));
    let events = drain_events(&handle, &mut cursor).await;
    assert!(events.iter().any(|ev| matches!(
        ev,
        EngineEvent::Error { message } if message.contains("exhausted")
    )));
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_destroys_every_overlay() {
    let (handle, mock) = spawn_two_displays();
    mock.focus_at("Terminal", 100, 100);
    settle().await;
    assert!(!mock.overlays().is_empty());

    handle.shutdown().await.expect("shutdown");
    assert!(mock.overlays().is_empty());

    // The actor is gone: further requests fail cleanly.
    assert!(matches!(handle.status().await, Err(Error::Stopped)));
}
