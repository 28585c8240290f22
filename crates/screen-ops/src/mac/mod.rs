//! macOS system implementation of [`ScreenOps`].
//!
//! Display enumeration uses CoreGraphics directly. Focus sampling shells out
//! to `osascript` (System Events is the only reliable source for the
//! frontmost window's origin without an AX observer). Overlays are helper
//! child processes (`umbra overlay ...`), one per display; opacity updates
//! are written to the child's stdin so an alpha change never recreates the
//! window.

use core_graphics::display::CGDisplay;
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::warn;

use crate::{
    DisplayId, DisplayInfo, Error, Rect, Result, Sample,
    ops::ScreenOps,
};

mod focus;
mod overlay;

use overlay::OverlayChild;

/// System-backed screen primitives.
pub struct SystemScreen {
    overlays: Mutex<HashMap<DisplayId, OverlayChild>>,
}

impl SystemScreen {
    /// Create a new instance owning no overlays.
    pub fn new() -> Self {
        Self {
            overlays: Mutex::new(HashMap::new()),
        }
    }

    /// Height of the primary display, used to translate between the flipped
    /// registry space and CoreGraphics' top-left-origin space.
    fn primary_height() -> i32 {
        CGDisplay::main().bounds().size.height as i32
    }
}

impl Default for SystemScreen {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SystemScreen {
    fn drop(&mut self) {
        // A leaked helper keeps dimming its display after we exit.
        self.destroy_all();
    }
}

impl ScreenOps for SystemScreen {
    fn enumerate_displays(&self) -> Result<Vec<DisplayInfo>> {
        let ids = CGDisplay::active_displays()
            .map_err(|e| Error::Enumeration(format!("CGGetActiveDisplayList error {e}")))?;
        let main = CGDisplay::main();
        let primary_height = main.bounds().size.height as i32;

        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            let display = CGDisplay::new(id);
            let b = display.bounds();
            // CG bounds are top-left origin; the registry stores flipped
            // (bottom-left origin) frames.
            let height = b.size.height as i32;
            let flipped_y = primary_height - (b.origin.y as i32 + height);
            out.push(DisplayInfo {
                id,
                bounds: Rect::new(b.origin.x as i32, flipped_y, b.size.width as i32, height),
                is_primary: id == main.id,
                is_builtin: display.is_builtin(),
            });
        }
        Ok(out)
    }

    fn sample_focus(&self) -> Sample {
        focus::sample()
    }

    fn create_overlay(&self, id: DisplayId, bounds: Rect, opacity: f64) -> Result<()> {
        let mut overlays = self.overlays.lock();
        if let Some(child) = overlays.get_mut(&id) {
            if child.is_alive() {
                // Idempotent: an existing overlay is updated in place.
                return child.set_opacity(opacity);
            }
            warn!(display = id, "overlay helper died; respawning");
            if let Some(dead) = overlays.remove(&id) {
                dead.terminate();
            }
        }

        // The helper draws in CG's top-left-origin space.
        let primary_height = Self::primary_height();
        let top_left = Rect::new(
            bounds.x,
            primary_height - (bounds.y + bounds.height),
            bounds.width,
            bounds.height,
        );
        let child = OverlayChild::spawn(id, top_left, opacity)?;
        overlays.insert(id, child);
        Ok(())
    }

    fn set_overlay_opacity(&self, id: DisplayId, opacity: f64) -> Result<()> {
        let mut overlays = self.overlays.lock();
        match overlays.get_mut(&id) {
            Some(child) if child.is_alive() => child.set_opacity(opacity),
            Some(_) => {
                if let Some(dead) = overlays.remove(&id) {
                    dead.terminate();
                }
                Err(Error::Overlay(format!(
                    "overlay helper for display {id} is not running"
                )))
            }
            None => Err(Error::Overlay(format!("no overlay on display {id}"))),
        }
    }

    fn destroy_overlay(&self, id: DisplayId) -> Result<()> {
        // No-op when absent, by contract.
        if let Some(child) = self.overlays.lock().remove(&id) {
            child.terminate();
        }
        Ok(())
    }

    fn destroy_all(&self) {
        let drained: Vec<OverlayChild> = {
            let mut overlays = self.overlays.lock();
            overlays.drain().map(|(_, c)| c).collect()
        };
        for child in drained {
            child.terminate();
        }
    }
}
