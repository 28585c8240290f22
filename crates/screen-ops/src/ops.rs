//! The `ScreenOps` trait and its recording mock.

use std::collections::{BTreeMap, HashSet};

use parking_lot::Mutex;

use crate::{DisplayId, DisplayInfo, Rect, Result, Sample};

/// OS capabilities the engine consumes.
///
/// Overlay operations are idempotent by contract: creating an overlay that
/// already exists updates it in place, and destroying a nonexistent overlay is
/// a no-op. Implementations must be callable from any thread; the engine
/// issues these from blocking contexts so a slow call cannot stall its actor.
pub trait ScreenOps: Send + Sync {
    /// Enumerate the currently connected displays.
    fn enumerate_displays(&self) -> Result<Vec<DisplayInfo>>;

    /// Sample the frontmost application and window origin.
    fn sample_focus(&self) -> Sample;

    /// Create (or update) the dimming overlay covering `bounds` on `id`.
    fn create_overlay(&self, id: DisplayId, bounds: Rect, opacity: f64) -> Result<()>;

    /// Adjust the alpha of an existing overlay without recreating it.
    fn set_overlay_opacity(&self, id: DisplayId, opacity: f64) -> Result<()>;

    /// Destroy the overlay on `id` if one exists.
    fn destroy_overlay(&self, id: DisplayId) -> Result<()>;

    /// Destroy every overlay this instance owns. Used on shutdown.
    fn destroy_all(&self);
}

/// One recorded overlay call, for test assertions.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum OverlayCall {
    /// `create_overlay` with the requested opacity.
    Create(DisplayId, f64),
    /// `set_overlay_opacity`.
    SetOpacity(DisplayId, f64),
    /// `destroy_overlay`.
    Destroy(DisplayId),
}

#[derive(Default)]
struct MockState {
    displays: Vec<DisplayInfo>,
    sample: Option<Sample>,
    enumerate_fails: bool,
    create_fails: bool,
    failing_displays: HashSet<DisplayId>,
    overlays: BTreeMap<DisplayId, f64>,
    calls: Vec<OverlayCall>,
}

/// Scriptable in-memory `ScreenOps` used throughout the test suites.
///
/// Records every overlay call so tests can assert on minimality (e.g. an
/// opacity change must be one `SetOpacity` with no destroy/create pair).
#[derive(Default)]
pub struct MockScreen {
    state: Mutex<MockState>,
}

impl MockScreen {
    /// Create an empty mock with no displays and an `Unknown` focus sample.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the enumerated display set.
    pub fn set_displays(&self, displays: Vec<DisplayInfo>) {
        self.state.lock().displays = displays;
    }

    /// Set the sample returned by the next `sample_focus` calls.
    pub fn set_sample(&self, sample: Sample) {
        self.state.lock().sample = Some(sample);
    }

    /// Point the focus sample at the given coordinates.
    pub fn focus_at(&self, app: &str, x: i32, y: i32) {
        self.set_sample(Sample::Focused {
            app: app.to_string(),
            x,
            y,
        });
    }

    /// Make `enumerate_displays` return an error.
    pub fn fail_enumerate(&self, fail: bool) {
        self.state.lock().enumerate_fails = fail;
    }

    /// Make every `create_overlay` call fail.
    pub fn fail_creates(&self, fail: bool) {
        self.state.lock().create_fails = fail;
    }

    /// Make overlay calls fail for one specific display only.
    pub fn fail_display(&self, id: DisplayId, fail: bool) {
        let mut st = self.state.lock();
        if fail {
            st.failing_displays.insert(id);
        } else {
            st.failing_displays.remove(&id);
        }
    }

    /// Displays that currently have an overlay.
    pub fn overlays(&self) -> Vec<DisplayId> {
        self.state.lock().overlays.keys().copied().collect()
    }

    /// Current overlay opacity for a display, if one exists.
    pub fn overlay_opacity(&self, id: DisplayId) -> Option<f64> {
        self.state.lock().overlays.get(&id).copied()
    }

    /// True when the display currently has an overlay.
    pub fn has_overlay(&self, id: DisplayId) -> bool {
        self.state.lock().overlays.contains_key(&id)
    }

    /// Snapshot of all recorded overlay calls in order.
    pub fn calls(&self) -> Vec<OverlayCall> {
        self.state.lock().calls.clone()
    }

    /// Forget recorded calls (state such as live overlays is kept).
    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// Count of recorded `Create` calls.
    pub fn create_count(&self) -> usize {
        self.count(|c| matches!(c, OverlayCall::Create(..)))
    }

    /// Count of recorded `Destroy` calls.
    pub fn destroy_count(&self) -> usize {
        self.count(|c| matches!(c, OverlayCall::Destroy(..)))
    }

    /// Count of recorded `SetOpacity` calls.
    pub fn set_opacity_count(&self) -> usize {
        self.count(|c| matches!(c, OverlayCall::SetOpacity(..)))
    }

    fn count(&self, pred: impl Fn(&OverlayCall) -> bool) -> usize {
        self.state.lock().calls.iter().filter(|c| pred(c)).count()
    }
}

impl ScreenOps for MockScreen {
    fn enumerate_displays(&self) -> Result<Vec<DisplayInfo>> {
        let st = self.state.lock();
        if st.enumerate_fails {
            return Err(crate::Error::Enumeration("mock enumeration failure".into()));
        }
        Ok(st.displays.clone())
    }

    fn sample_focus(&self) -> Sample {
        self.state.lock().sample.clone().unwrap_or(Sample::Unknown)
    }

    fn create_overlay(&self, id: DisplayId, _bounds: Rect, opacity: f64) -> Result<()> {
        let mut st = self.state.lock();
        st.calls.push(OverlayCall::Create(id, opacity));
        if st.create_fails || st.failing_displays.contains(&id) {
            return Err(crate::Error::Overlay(format!(
                "mock create failure for display {id}"
            )));
        }
        // Idempotent: an existing overlay is updated in place.
        st.overlays.insert(id, opacity);
        Ok(())
    }

    fn set_overlay_opacity(&self, id: DisplayId, opacity: f64) -> Result<()> {
        let mut st = self.state.lock();
        st.calls.push(OverlayCall::SetOpacity(id, opacity));
        if st.failing_displays.contains(&id) {
            return Err(crate::Error::Overlay(format!(
                "mock opacity failure for display {id}"
            )));
        }
        match st.overlays.get_mut(&id) {
            Some(v) => {
                *v = opacity;
                Ok(())
            }
            None => Err(crate::Error::Overlay(format!(
                "no overlay on display {id}"
            ))),
        }
    }

    fn destroy_overlay(&self, id: DisplayId) -> Result<()> {
        let mut st = self.state.lock();
        st.calls.push(OverlayCall::Destroy(id));
        // Destroying a nonexistent overlay is a no-op by contract.
        st.overlays.remove(&id);
        Ok(())
    }

    fn destroy_all(&self) {
        let mut st = self.state.lock();
        let ids: Vec<DisplayId> = st.overlays.keys().copied().collect();
        for id in ids {
            st.calls.push(OverlayCall::Destroy(id));
            st.overlays.remove(&id);
        }
    }
}
