//! The overlay coordinator: single-writer state plus reconciliation.
//!
//! All engine state lives in one [`Coordinator`] owned by one actor task, so
//! reconciliation, hot-plug syncs, and API mutations can never interleave
//! their read-modify-write sequences. Overlay side effects are issued
//! fire-and-confirm: a failed call marks the display dirty and is retried on
//! the next pass instead of being trusted or aborting the pass for other
//! displays.

use std::{
    collections::{BTreeSet, HashSet},
    sync::Arc,
};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, trace, warn};

use screen_ops::{DisplayId, DisplayInfo, Point, Sample, ops::ScreenOps};

use crate::{
    DisplayState, EngineStatus, MonitorState,
    error::{Error, Result},
    events::{EngineEvent, EventHub},
    registry::DisplayRegistry,
    settings::SettingsStore,
};

/// Consecutive all-create-fail reconciliation passes tolerated before the
/// engine treats overlay creation as exhausted and stops.
const FATAL_CREATE_PASSES: u32 = 8;

/// Requests processed by the coordinator actor.
pub(crate) enum Command {
    /// A focus observation from the sampler.
    Sample(Sample),
    /// A fresh display enumeration from the hot-plug monitor.
    SyncDisplays(Vec<DisplayInfo>),
    /// Full status snapshot.
    Status {
        respond: oneshot::Sender<EngineStatus>,
    },
    /// Display list with derived state.
    Displays {
        respond: oneshot::Sender<Vec<DisplayState>>,
    },
    /// Set (or with `None`, flip) the master switch; replies with the new
    /// position.
    SetEnabled {
        enabled: Option<bool>,
        respond: oneshot::Sender<bool>,
    },
    /// Set the global default opacity.
    SetOpacity {
        opacity: f64,
        respond: oneshot::Sender<Result<()>>,
    },
    /// Set one display's opacity override.
    SetMonitorOpacity {
        display: DisplayId,
        opacity: f64,
        respond: oneshot::Sender<Result<()>>,
    },
    /// Enable/disable dimming for one display.
    SetMonitorEnabled {
        display: DisplayId,
        enabled: bool,
        respond: oneshot::Sender<Result<()>>,
    },
    /// Destroy all overlays and stop the actor.
    Shutdown { respond: oneshot::Sender<()> },
}

pub(crate) struct Coordinator {
    ops: Arc<dyn ScreenOps>,
    hub: Arc<EventHub>,
    registry: DisplayRegistry,
    settings: SettingsStore,
    /// Master dimming switch.
    enabled: bool,
    /// Global default opacity for monitors without an override.
    opacity: f64,
    /// Display currently holding focus, if resolved. `None` also after a
    /// hot-unplug of the focused display, which forces a full re-resolution
    /// on the next sample. No overlays are held while unresolved.
    focused: Option<DisplayId>,
    /// Displays that actually have an overlay (confirmed side effects only).
    overlays: HashSet<DisplayId>,
    /// Displays whose last overlay op failed; retried next pass.
    dirty: HashSet<DisplayId>,
    permission_denied: bool,
    allfail_passes: u32,
    stopping: bool,
}

impl Coordinator {
    pub(crate) fn new(
        ops: Arc<dyn ScreenOps>,
        hub: Arc<EventHub>,
        default_opacity: f64,
        initial: Vec<DisplayInfo>,
    ) -> Self {
        let mut co = Self {
            ops,
            hub,
            registry: DisplayRegistry::new(),
            settings: SettingsStore::new(),
            enabled: true,
            opacity: default_opacity,
            focused: None,
            overlays: HashSet::new(),
            dirty: HashSet::new(),
            permission_denied: false,
            allfail_passes: 0,
            stopping: false,
        };
        co.registry.replace(&initial);
        for id in co.registry.ids() {
            co.settings.ensure(id, co.opacity);
        }
        co
    }

    /// Target state for one display: dimmed iff the master switch is on, a
    /// focused display is known, the display's own setting is enabled, and
    /// it is not the focused display. Focus wins over `enabled`; `enabled`
    /// wins over non-focus.
    fn desired(&self, id: DisplayId) -> bool {
        self.enabled
            && self.focused.is_some()
            && self.settings.enabled(id)
            && self.focused != Some(id)
    }

    /// Bring one display's overlay in line with its target state. Returns
    /// `(create_attempts, create_successes)` for the exhaustion counter.
    fn reconcile_display(&mut self, id: DisplayId) -> (u32, u32) {
        let target = self.desired(id);
        let actual = self.overlays.contains(&id);
        if target && (!actual || self.dirty.contains(&id)) {
            let Some(bounds) = self.registry.bounds(id) else {
                return (0, 0);
            };
            let opacity = self.settings.opacity(id, self.opacity);
            match self.ops.create_overlay(id, bounds, opacity) {
                Ok(()) => {
                    self.overlays.insert(id);
                    self.dirty.remove(&id);
                    debug!(display = id, opacity, "overlay created");
                    (1, 1)
                }
                Err(e) => {
                    warn!(display = id, "overlay create failed: {e}");
                    self.dirty.insert(id);
                    (1, 0)
                }
            }
        } else if !target && actual {
            match self.ops.destroy_overlay(id) {
                Ok(()) => {
                    self.overlays.remove(&id);
                    self.dirty.remove(&id);
                    debug!(display = id, "overlay destroyed");
                }
                Err(e) => {
                    warn!(display = id, "overlay destroy failed: {e}");
                    self.dirty.insert(id);
                }
            }
            (0, 0)
        } else {
            (0, 0)
        }
    }

    /// Reconcile every known display, tracking overlay-creation exhaustion.
    fn reconcile_all(&mut self) {
        let mut attempts = 0;
        let mut successes = 0;
        for id in self.registry.ids() {
            let (a, s) = self.reconcile_display(id);
            attempts += a;
            successes += s;
        }
        // Exhaustion means no overlay can be created at all; a single
        // failing display while others hold overlays is just a retry.
        if attempts > 0 && successes == 0 && self.overlays.is_empty() {
            self.allfail_passes += 1;
            if self.allfail_passes >= FATAL_CREATE_PASSES {
                error!(
                    passes = self.allfail_passes,
                    "unable to create any overlay; stopping engine"
                );
                self.hub.publish(&EngineEvent::Error {
                    message: "overlay creation exhausted; engine stopping".into(),
                });
                self.teardown();
                self.stopping = true;
            }
        } else {
            self.allfail_passes = 0;
        }
    }

    /// Handle one focus sample. `Unknown` samples never change state:
    /// treating them as "nothing focused" would dim every display spuriously.
    fn apply_sample(&mut self, sample: Sample) {
        match sample {
            Sample::Unknown => {}
            Sample::PermissionDenied => {
                if !self.permission_denied {
                    self.permission_denied = true;
                    warn!("focus query denied by the OS; dimming paused until permission granted");
                    self.hub.publish(&EngineEvent::Error {
                        message: "focus query permission denied".into(),
                    });
                }
            }
            Sample::Focused { app, x, y } => {
                if self.permission_denied {
                    self.permission_denied = false;
                    info!("focus query permission restored");
                }
                let Some(display) = self.registry.resolve(Point { x, y }) else {
                    return;
                };
                // Dominant case: focus stayed put and nothing needs repair.
                if self.focused == Some(display) && self.dirty.is_empty() {
                    return;
                }
                let moved = self.focused != Some(display);
                self.focused = Some(display);
                let display_id = display;
                trace!(app = %app, display = display_id, "focus resolved");
                self.reconcile_all();
                if moved {
                    self.hub.publish(&EngineEvent::FocusChanged {
                        display: Some(display),
                    });
                }
            }
        }
    }

    /// Sync the registry against a fresh enumeration.
    fn sync_displays(&mut self, list: Vec<DisplayInfo>) {
        let incoming: BTreeSet<DisplayId> = list.iter().map(|d| d.id).collect();
        let current: BTreeSet<DisplayId> = self.registry.ids().into_iter().collect();

        let removed: Vec<DisplayId> = current.difference(&incoming).copied().collect();
        let added: Vec<DisplayId> = incoming.difference(&current).copied().collect();

        for &id in &removed {
            if self.overlays.remove(&id) {
                // The display is gone; a failed destroy has nothing to retry.
                if let Err(e) = self.ops.destroy_overlay(id) {
                    warn!(display = id, "destroy on unplug failed: {e}");
                }
            }
            self.dirty.remove(&id);
            self.settings.retire(id);
            if self.focused == Some(id) {
                self.focused = None;
            }
        }
        for &id in &added {
            self.settings.ensure(id, self.opacity);
        }

        let changed = self.registry.replace(&list);
        if !changed {
            return;
        }
        info!(?added, ?removed, displays = list.len(), "display configuration changed");
        self.reconcile_all();
        self.hub
            .publish(&EngineEvent::ConfigurationChanged { added, removed });
    }

    fn set_enabled(&mut self, value: Option<bool>) -> bool {
        let next = value.unwrap_or(!self.enabled);
        if next != self.enabled {
            self.enabled = next;
            info!(enabled = next, "dimming toggled");
            self.reconcile_all();
            self.hub
                .publish(&EngineEvent::EnabledChanged { enabled: next });
        }
        next
    }

    fn set_opacity(&mut self, opacity: f64) -> Result<()> {
        if !opacity.is_finite() {
            return Err(Error::InvalidOpacity(opacity));
        }
        let opacity = opacity.clamp(0.0, 1.0);
        self.opacity = opacity;
        for id in self.settings.apply_global(opacity) {
            self.refresh_overlay_alpha(id, opacity);
        }
        self.hub.publish(&EngineEvent::OpacityChanged { opacity });
        Ok(())
    }

    fn set_monitor_opacity(&mut self, display: DisplayId, opacity: f64) -> Result<()> {
        if !opacity.is_finite() {
            return Err(Error::InvalidOpacity(opacity));
        }
        if !self.registry.contains(display) {
            return Err(Error::UnknownDisplay(display));
        }
        let opacity = opacity.clamp(0.0, 1.0);
        self.settings.set_override(display, opacity);
        self.refresh_overlay_alpha(display, opacity);
        self.hub
            .publish(&EngineEvent::MonitorOpacityChanged { display, opacity });
        Ok(())
    }

    fn set_monitor_enabled(&mut self, display: DisplayId, enabled: bool) -> Result<()> {
        if !self.registry.contains(display) {
            return Err(Error::UnknownDisplay(display));
        }
        self.settings.set_enabled(display, enabled);
        // Bounded re-reconciliation: only the affected display.
        let _ = self.reconcile_display(display);
        self.hub
            .publish(&EngineEvent::MonitorEnabledChanged { display, enabled });
        Ok(())
    }

    /// Update a live overlay's alpha in place. Opacity changes never destroy
    /// or recreate an overlay.
    fn refresh_overlay_alpha(&mut self, id: DisplayId, opacity: f64) {
        if !self.overlays.contains(&id) {
            return;
        }
        if let Err(e) = self.ops.set_overlay_opacity(id, opacity) {
            warn!(display = id, "overlay opacity update failed: {e}");
            self.dirty.insert(id);
        }
    }

    fn status(&self) -> EngineStatus {
        let monitors = self
            .settings
            .iter()
            .filter_map(|(id, setting)| {
                let bounds = self.registry.bounds(id)?;
                Some((
                    id,
                    MonitorState {
                        enabled: setting.enabled,
                        opacity: setting.opacity,
                        bounds,
                        is_focused: self.focused == Some(id),
                        has_overlay: self.overlays.contains(&id),
                    },
                ))
            })
            .collect();
        EngineStatus {
            enabled: self.enabled,
            opacity: self.opacity,
            focused_display: self.focused,
            monitors,
            permission_denied: self.permission_denied,
        }
    }

    fn displays(&self) -> Vec<DisplayState> {
        self.registry
            .ids()
            .into_iter()
            .filter_map(|id| {
                let info = self.registry.get(id)?;
                Some(DisplayState {
                    id,
                    bounds: info.bounds,
                    is_primary: info.is_primary,
                    is_builtin: info.is_builtin,
                    is_focused: self.focused == Some(id),
                    has_overlay: self.overlays.contains(&id),
                })
            })
            .collect()
    }

    /// Destroy every overlay. A leaked overlay outlives the engine and
    /// permanently dims a display, so this runs on every exit path.
    fn teardown(&mut self) {
        for id in self.overlays.drain() {
            if let Err(e) = self.ops.destroy_overlay(id) {
                warn!(display = id, "overlay destroy on shutdown failed: {e}");
            }
        }
        self.ops.destroy_all();
        self.dirty.clear();
        self.focused = None;
    }
}

/// The coordinator actor: the single writer of all engine state.
pub(crate) async fn run_actor(mut rx: mpsc::UnboundedReceiver<Command>, mut co: Coordinator) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            Command::Sample(sample) => co.apply_sample(sample),
            Command::SyncDisplays(list) => co.sync_displays(list),
            Command::Status { respond } => {
                let _ = respond.send(co.status());
            }
            Command::Displays { respond } => {
                let _ = respond.send(co.displays());
            }
            Command::SetEnabled { enabled, respond } => {
                let _ = respond.send(co.set_enabled(enabled));
            }
            Command::SetOpacity { opacity, respond } => {
                let _ = respond.send(co.set_opacity(opacity));
            }
            Command::SetMonitorOpacity {
                display,
                opacity,
                respond,
            } => {
                let _ = respond.send(co.set_monitor_opacity(display, opacity));
            }
            Command::SetMonitorEnabled {
                display,
                enabled,
                respond,
            } => {
                let _ = respond.send(co.set_monitor_enabled(display, enabled));
            }
            Command::Shutdown { respond } => {
                co.teardown();
                co.stopping = true;
                let _ = respond.send(());
            }
        }
        if co.stopping {
            break;
        }
    }
    // Channel closed without an explicit shutdown: still clean up.
    if !co.stopping {
        co.teardown();
    }
    debug!("coordinator stopped");
}
