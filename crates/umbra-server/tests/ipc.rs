//! End-to-end IPC behavior over a real Unix socket with mock screen ops.

use std::{sync::Arc, time::Duration};

use tokio::{task::JoinHandle, time::sleep};

use screen_ops::{DisplayInfo, Rect, ops::MockScreen};
use umbra_engine::EngineCfg;
use umbra_protocol::Msg;
use umbra_server::{Connection, Server};

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

fn unique_socket(tag: &str) -> String {
    std::env::temp_dir()
        .join(format!(
            "umbra-ipc-test-{}-{}-{}.sock",
            tag,
            unsafe { libc::getuid() },
            std::process::id()
        ))
        .to_string_lossy()
        .to_string()
}

/// Start a server over the mock and wait until the socket accepts.
async fn start_server(tag: &str, mock: Arc<MockScreen>) -> (String, JoinHandle<()>) {
    let socket = unique_socket(tag);
    let server = Server::new()
        .with_socket_path(&socket)
        .with_engine_cfg(test_cfg());
    let handle = {
        let ops = mock;
        tokio::spawn(async move {
            server.run(ops).await.expect("server run");
        })
    };
    // Wait for the listener to come up.
    for _ in 0..100 {
        if Connection::connect_unix(&socket).await.is_ok() {
            return (socket, handle);
        }
        sleep(Duration::from_millis(20)).await;
    }
    panic!("server did not start on {socket}");
}

async fn recv_with_timeout(conn: &mut Connection) -> Msg {
    tokio::time::timeout(Duration::from_secs(2), conn.recv_event())
        .await
        .expect("push message within deadline")
        .expect("event channel open")
}

/// Wait until the mock shows an overlay on `id`.
async fn wait_for_overlay(mock: &MockScreen, id: u32) {
    for _ in 0..100 {
        if mock.has_overlay(id) {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("overlay on display {id} never appeared");
}

#[tokio::test(flavor = "multi_thread")]
async fn connect_gets_snapshot_then_stream() {
    let mock = Arc::new(MockScreen::new());
    mock.set_displays(vec![display(1, 0), display(2, 1920)]);
    mock.focus_at("Terminal", 100, 100);
    let (socket, _server) = start_server("snapshot", mock.clone()).await;
    wait_for_overlay(&mock, 2).await;

    let mut observer = Connection::connect_unix(&socket).await.expect("connect");
    match recv_with_timeout(&mut observer).await {
        Msg::InitialStatus(status) => {
            assert!(status.enabled);
            assert_eq!(status.opacity, 0.7);
            assert_eq!(status.focused_display, Some(1));
            assert_eq!(status.monitor_settings.len(), 2);
            assert!(status.monitor_settings[&2].has_overlay);
        }
        other => panic!("expected InitialStatus first, got {other:?}"),
    }

    // A mutation from another connection streams to this observer.
    let mut control = Connection::connect_unix(&socket).await.expect("connect");
    let enabled = control.toggle().await.expect("toggle");
    assert!(!enabled);

    loop {
        match recv_with_timeout(&mut observer).await {
            Msg::EnabledChanged { enabled } => {
                assert!(!enabled);
                break;
            }
            // Heartbeats, logs, and in-flight focus traffic are fine.
            _ => continue,
        }
    }

    let status = control.get_status().await.expect("status");
    assert!(!status.enabled);

    control.shutdown().await.expect("shutdown");
}

#[tokio::test(flavor = "multi_thread")]
async fn monitor_settings_round_trip_and_validation() {
    let mock = Arc::new(MockScreen::new());
    mock.set_displays(vec![display(1, 0), display(2, 1920)]);
    mock.focus_at("Terminal", 100, 100);
    let (socket, _server) = start_server("monitors", mock.clone()).await;
    wait_for_overlay(&mock, 2).await;

    let mut conn = Connection::connect_unix(&socket).await.expect("connect");

    conn.set_monitor_opacity(2, 0.42).await.expect("set opacity");
    let monitors = conn.get_monitors().await.expect("monitors");
    assert_eq!(monitors[&2].opacity, 0.42);
    assert_eq!(monitors[&1].opacity, 0.7, "other displays untouched");

    // Malformed requests are rejected at the API boundary.
    let err = conn
        .set_monitor_opacity(99, 0.5)
        .await
        .expect_err("unknown display");
    assert!(err.to_string().contains("UnknownDisplay"), "{err}");

    let err = conn
        .set_monitor_opacity(2, 1.5)
        .await
        .expect_err("out of range");
    assert!(err.to_string().contains("InvalidOpacity"), "{err}");

    // The engine state is unchanged by the rejected calls.
    let monitors = conn.get_monitors().await.expect("monitors");
    assert_eq!(monitors[&2].opacity, 0.42);

    let displays = conn.get_displays().await.expect("displays");
    assert_eq!(displays.len(), 2);
    assert!(displays.iter().any(|d| d.id == 1 && d.is_primary));

    conn.shutdown().await.expect("shutdown");
}

#[tokio::test(flavor = "multi_thread")]
async fn ping_answers_with_pong() {
    let mock = Arc::new(MockScreen::new());
    mock.set_displays(vec![display(1, 0)]);
    let (socket, _server) = start_server("ping", mock.clone()).await;

    let mut conn = Connection::connect_unix(&socket).await.expect("connect");
    conn.ping().await.expect("ping");

    loop {
        match recv_with_timeout(&mut conn).await {
            Msg::Pong => break,
            _ => continue,
        }
    }

    conn.shutdown().await.expect("shutdown");
}

#[tokio::test(flavor = "multi_thread")]
async fn reconnect_resyncs_from_snapshot_without_replay() {
    let mock = Arc::new(MockScreen::new());
    mock.set_displays(vec![display(1, 0), display(2, 1920)]);
    mock.focus_at("Terminal", 100, 100);
    let (socket, _server) = start_server("reconnect", mock.clone()).await;
    wait_for_overlay(&mock, 2).await;

    // First observer connects and goes away.
    let mut observer = Connection::connect_unix(&socket).await.expect("connect");
    assert!(matches!(
        recv_with_timeout(&mut observer).await,
        Msg::InitialStatus(_)
    ));
    drop(observer);

    // State changes while nobody is watching.
    let mut control = Connection::connect_unix(&socket).await.expect("connect");
    control.set_opacity(0.3).await.expect("opacity");
    control.toggle().await.expect("toggle");
    sleep(Duration::from_millis(50)).await;

    // The reconnecting observer gets exactly one fresh snapshot reflecting
    // the current state, not a replay of the missed events.
    let mut observer = Connection::connect_unix(&socket).await.expect("reconnect");
    match recv_with_timeout(&mut observer).await {
        Msg::InitialStatus(status) => {
            assert!(!status.enabled);
            assert_eq!(status.opacity, 0.3);
        }
        other => panic!("expected InitialStatus, got {other:?}"),
    }
    // Nothing but heartbeats afterwards while the state is quiet.
    let quiet = tokio::time::timeout(Duration::from_millis(300), async {
        loop {
            match observer.recv_event().await.expect("event channel open") {
                Msg::Heartbeat(_) => continue,
                other => break other,
            }
        }
    })
    .await;
    assert!(quiet.is_err(), "unexpected replayed message: {quiet:?}");

    control.shutdown().await.expect("shutdown");
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_rpc_stops_server_and_destroys_overlays() {
    let mock = Arc::new(MockScreen::new());
    mock.set_displays(vec![display(1, 0), display(2, 1920)]);
    mock.focus_at("Terminal", 100, 100);
    let (socket, server) = start_server("shutdown", mock.clone()).await;
    wait_for_overlay(&mock, 2).await;

    let mut conn = Connection::connect_unix(&socket).await.expect("connect");
    conn.shutdown().await.expect("shutdown rpc");

    tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .expect("server exits after shutdown")
        .expect("server task");
    assert!(
        mock.overlays().is_empty(),
        "no overlay may outlive the server"
    );
}
