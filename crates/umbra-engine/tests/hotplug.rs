//! Hot-plug handling: registry sync, overlay retirement, setting retention.

use std::{sync::Arc, time::Duration};

use tokio::time::{Instant, sleep};

use screen_ops::{DisplayInfo, Rect, ops::MockScreen};
use umbra_engine::{Engine, EngineCfg, EngineEvent, EngineHandle};

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

fn spawn_two_displays() -> (EngineHandle, Arc<MockScreen>) {
    let mock = Arc::new(MockScreen::new());
    mock.set_displays(vec![display(1, 0), display(2, 1920)]);
    let handle = Engine::spawn(mock.clone(), test_cfg());
    (handle, mock)
}

/// Enough wall time for several hot-plug syncs.
async fn settle() {
    sleep(Duration::from_millis(200)).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn removed_display_is_retired_cleanly() {
    let (handle, mock) = spawn_two_displays();
    mock.focus_at("Terminal", 100, 100);
    settle().await;
    assert!(mock.has_overlay(2));

    mock.set_displays(vec![display(1, 0)]);
    settle().await;

    assert!(!mock.has_overlay(2), "unplugged display's overlay destroyed");
    let displays = handle.displays().await.expect("displays");
    assert_eq!(displays.len(), 1);
    assert_eq!(displays[0].id, 1);
    let status = handle.status().await.expect("status");
    assert_eq!(status.focused_display, Some(1));

    handle.shutdown().await.expect("shutdown");
}

#[tokio::test(flavor = "multi_thread")]
async fn removing_the_focused_display_revalidates_tracking() {
    let (handle, mock) = spawn_two_displays();
    mock.focus_at("Safari", 2000, 100);
    settle().await;
    let status = handle.status().await.expect("status");
    assert_eq!(status.focused_display, Some(2));
    assert!(mock.has_overlay(1));

    // Display 2 goes away; the frontmost window lands back on display 1.
    mock.set_displays(vec![display(1, 0)]);
    mock.focus_at("Safari", 100, 100);
    settle().await;

    let status = handle.status().await.expect("status");
    assert_eq!(status.focused_display, Some(1));
    assert!(mock.overlays().is_empty(), "only display is focused");

    handle.shutdown().await.expect("shutdown");
}

#[tokio::test(flavor = "multi_thread")]
async fn added_display_gets_defaults_and_is_dimmed() {
    let mock = Arc::new(MockScreen::new());
    mock.set_displays(vec![display(1, 0)]);
    let handle = Engine::spawn(mock.clone(), test_cfg());
    mock.focus_at("Terminal", 100, 100);
    settle().await;
    assert!(mock.overlays().is_empty());

    mock.set_displays(vec![display(1, 0), display(2, 1920)]);
    settle().await;

    let status = handle.status().await.expect("status");
    let m = &status.monitors[&2];
    assert!(m.enabled);
    assert_eq!(m.opacity, 0.7);
    assert!(m.has_overlay);
    assert_eq!(mock.overlay_opacity(2), Some(0.7));

    handle.shutdown().await.expect("shutdown");
}

#[tokio::test(flavor = "multi_thread")]
async fn settings_survive_a_reattach() {
    let (handle, mock) = spawn_two_displays();
    mock.focus_at("Terminal", 100, 100);
    settle().await;

    handle.set_monitor_opacity(2, 0.33).await.expect("override");
    handle.set_monitor_enabled(2, false).await.expect("disable");

    mock.set_displays(vec![display(1, 0)]);
    settle().await;
    mock.set_displays(vec![display(1, 0), display(2, 1920)]);
    settle().await;

    let status = handle.status().await.expect("status");
    let m = &status.monitors[&2];
    assert_eq!(m.opacity, 0.33);
    assert!(!m.enabled);
    assert!(!m.has_overlay, "reattached display kept its disabled flag");

    handle.shutdown().await.expect("shutdown");
}

#[tokio::test(flavor = "multi_thread")]
async fn enumeration_failure_is_treated_as_no_change() {
    let (handle, mock) = spawn_two_displays();
    mock.focus_at("Terminal", 100, 100);
    settle().await;
    assert!(mock.has_overlay(2));

    mock.fail_enumerate(true);
    settle().await;

    // A transient failure must never read as "all displays disconnected".
    let displays = handle.displays().await.expect("displays");
    assert_eq!(displays.len(), 2);
    assert!(mock.has_overlay(2));

    handle.shutdown().await.expect("shutdown");
}

#[tokio::test(flavor = "multi_thread")]
async fn one_sync_emits_one_aggregated_event() {
    let (handle, mock) = spawn_two_displays();
    mock.focus_at("Terminal", 100, 100);
    settle().await;

    let mut cursor = handle.subscribe();
    // Remove 2 and add 3 in a single configuration change.
    mock.set_displays(vec![display(1, 0), display(3, 3840)]);
    settle().await;

    let mut config_events = Vec::new();
    loop {
        let deadline = Instant::now() + Duration::from_millis(50);
        match handle.next_event_until(&mut cursor, deadline).await {
            Some(EngineEvent::ConfigurationChanged { added, removed }) => {
                config_events.push((added, removed));
            }
            Some(_) => {}
            None => break,
        }
    }
    assert_eq!(config_events.len(), 1);
    assert_eq!(config_events[0], (vec![3], vec![2]));

    handle.shutdown().await.expect("shutdown");
}
