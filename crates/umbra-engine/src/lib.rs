//! umbra-engine: focus-to-display resolution and overlay state.
//!
//! The engine decides, for every connected display, whether a dimming
//! overlay should exist and at what opacity, and keeps that state correct
//! across focus changes, per-monitor configuration, and display hot-plug.
//!
//! Structure
//! - All shared state (registry, settings, global switches) is owned by one
//!   coordinator actor; handles talk to it over a command channel, so no
//!   lock ordering exists anywhere in the crate.
//! - A sampler task polls the OS for focus (and, on a coarser cadence,
//!   display configuration) via the [`screen_ops::ops::ScreenOps`] trait and
//!   feeds observations to the actor.
//! - Every state transition is published through an event hub with
//!   per-subscriber ring buffers; the server layer fans these out to IPC
//!   observers.
//!
//! Shutdown destroys every overlay the engine owns before the actor exits —
//! an orphaned overlay would keep dimming a display after the process dies.

use std::{collections::BTreeMap, sync::Arc};

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use screen_ops::{DisplayId, Rect, ops::ScreenOps};

mod error;
mod events;
mod reconcile;
mod registry;
mod sampler;
mod settings;

pub use error::{Error, Result};
pub use events::{EngineEvent, EventCursor};

use events::EventHub;
use reconcile::{Command, Coordinator, run_actor};
use sampler::run_sampler;

/// Engine tuning knobs.
#[derive(Clone, Debug)]
pub struct EngineCfg {
    /// Focus poll interval in milliseconds.
    pub poll_ms: u64,
    /// Run the hot-plug check every N focus ticks (0 disables it).
    pub hotplug_every: u32,
    /// Hard cap on one focus query, in milliseconds.
    pub sample_timeout_ms: u64,
    /// Default overlay opacity for displays without an override.
    pub default_opacity: f64,
    /// Per-subscriber event ring capacity.
    pub event_capacity: usize,
}

impl Default for EngineCfg {
    fn default() -> Self {
        Self {
            poll_ms: 500,
            hotplug_every: 10,
            sample_timeout_ms: 2000,
            default_opacity: 0.7,
            event_capacity: events::DEFAULT_EVENT_CAPACITY,
        }
    }
}

/// Per-display settings plus derived state, as reported by [`EngineHandle::status`].
#[derive(Clone, Debug, PartialEq)]
pub struct MonitorState {
    /// Whether dimming logic applies to this display.
    pub enabled: bool,
    /// Effective overlay opacity.
    pub opacity: f64,
    /// Display bounds in the registry's coordinate space.
    pub bounds: Rect,
    /// True when this display holds focus.
    pub is_focused: bool,
    /// True when an overlay currently covers this display.
    pub has_overlay: bool,
}

/// Full authoritative engine state.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct EngineStatus {
    /// Master dimming switch.
    pub enabled: bool,
    /// Global default opacity.
    pub opacity: f64,
    /// Display currently holding focus, if resolved.
    pub focused_display: Option<DisplayId>,
    /// Per-display settings and derived state.
    pub monitors: BTreeMap<DisplayId, MonitorState>,
    /// True once the OS has denied the focus query.
    pub permission_denied: bool,
}

/// One display with identity, geometry, and derived state.
#[derive(Clone, Debug, PartialEq)]
pub struct DisplayState {
    /// OS-assigned display identifier.
    pub id: DisplayId,
    /// Display bounds in the registry's coordinate space.
    pub bounds: Rect,
    /// True for the primary display.
    pub is_primary: bool,
    /// True for a built-in panel.
    pub is_builtin: bool,
    /// True when this display holds focus.
    pub is_focused: bool,
    /// True when an overlay currently covers this display.
    pub has_overlay: bool,
}

/// Cheap, clonable handle to the engine actor.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::UnboundedSender<Command>,
    hub: Arc<EventHub>,
    cancel: CancellationToken,
}

impl EngineHandle {
    /// Subscribe to the state-change event stream. Pair with
    /// [`EngineHandle::status`] for a consistent snapshot-then-stream view.
    pub fn subscribe(&self) -> EventCursor {
        self.hub.subscribe()
    }

    /// Await the next event for `cursor` until `deadline`; `None` on timeout
    /// or when the engine has stopped.
    pub async fn next_event_until(
        &self,
        cursor: &mut EventCursor,
        deadline: tokio::time::Instant,
    ) -> Option<EngineEvent> {
        self.hub.next_event_until(cursor, deadline).await
    }

    /// Full status snapshot, no older than the last completed reconciliation.
    pub async fn status(&self) -> Result<EngineStatus> {
        self.request(|respond| Command::Status { respond }).await
    }

    /// Connected displays with derived state.
    pub async fn displays(&self) -> Result<Vec<DisplayState>> {
        self.request(|respond| Command::Displays { respond }).await
    }

    /// Flip the master dimming switch; returns the new position.
    pub async fn toggle(&self) -> Result<bool> {
        self.request(|respond| Command::SetEnabled {
            enabled: None,
            respond,
        })
        .await
    }

    /// Set the master dimming switch; returns the new position.
    pub async fn set_enabled(&self, enabled: bool) -> Result<bool> {
        self.request(|respond| Command::SetEnabled {
            enabled: Some(enabled),
            respond,
        })
        .await
    }

    /// Set the global default opacity (clamped to `[0.0, 1.0]`).
    pub async fn set_opacity(&self, opacity: f64) -> Result<()> {
        self.request(|respond| Command::SetOpacity { opacity, respond })
            .await?
    }

    /// Set one display's opacity override.
    pub async fn set_monitor_opacity(&self, display: DisplayId, opacity: f64) -> Result<()> {
        self.request(|respond| Command::SetMonitorOpacity {
            display,
            opacity,
            respond,
        })
        .await?
    }

    /// Enable or disable dimming for one display.
    pub async fn set_monitor_enabled(&self, display: DisplayId, enabled: bool) -> Result<()> {
        self.request(|respond| Command::SetMonitorEnabled {
            display,
            enabled,
            respond,
        })
        .await?
    }

    /// Stop the engine: cancel the sampler, destroy all overlays, and wait
    /// for the actor to acknowledge.
    pub async fn shutdown(&self) -> Result<()> {
        self.cancel.cancel();
        self.request(|respond| Command::Shutdown { respond }).await
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.tx.send(make(tx)).map_err(|_| Error::Stopped)?;
        rx.await.map_err(|_| Error::Stopped)
    }
}

/// Engine constructor. Spawns the coordinator actor and the sampler task.
pub struct Engine;

impl Engine {
    /// Spawn the engine against the given screen primitives.
    ///
    /// The registry is seeded from one synchronous enumeration so queries
    /// have an answer before the first hot-plug tick; a failure here is
    /// treated as an empty display set and corrected by the next sync.
    pub fn spawn(ops: Arc<dyn ScreenOps>, cfg: EngineCfg) -> EngineHandle {
        let initial = ops.enumerate_displays().unwrap_or_else(|e| {
            tracing::warn!("initial display enumeration failed: {e}");
            Vec::new()
        });

        let (tx, rx) = mpsc::unbounded_channel();
        let hub = Arc::new(EventHub::new(cfg.event_capacity));
        let cancel = CancellationToken::new();

        let coordinator = Coordinator::new(ops.clone(), hub.clone(), cfg.default_opacity, initial);
        tokio::spawn(run_actor(rx, coordinator));
        tokio::spawn(run_sampler(ops, tx.clone(), cfg, cancel.clone()));

        EngineHandle { tx, hub, cancel }
    }
}
