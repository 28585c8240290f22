//! screen-ops: the OS-facing primitives consumed by the umbra engine.
//!
//! Three capabilities live behind the [`ops::ScreenOps`] trait:
//! - display enumeration (`enumerate_displays`),
//! - frontmost-window focus sampling (`sample_focus`),
//! - overlay lifecycle (`create_overlay` / `set_overlay_opacity` /
//!   `destroy_overlay`).
//!
//! The engine never talks to the OS directly; it holds an `Arc<dyn ScreenOps>`
//! so the whole reconciliation core can be exercised against the recording
//! [`ops::MockScreen`]. The macOS system implementation is in the private
//! `mac` module and constructed via [`system`].

use std::{result::Result as StdResult, sync::Arc};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod ops;

#[cfg(target_os = "macos")]
mod mac;

/// Identifier the OS assigns to a connected display for the current session.
pub type DisplayId = u32;

/// A point in screen coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    /// Horizontal coordinate.
    pub x: i32,
    /// Vertical coordinate.
    pub y: i32,
}

/// A pixel rectangle: origin plus extent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    /// Left edge.
    pub x: i32,
    /// Top edge (in the owning coordinate space).
    pub y: i32,
    /// Width in pixels.
    pub width: i32,
    /// Height in pixels.
    pub height: i32,
}

impl Rect {
    /// Construct a rectangle from origin and extent.
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Exclusive right edge.
    pub const fn right(&self) -> i32 {
        self.x + self.width
    }

    /// Exclusive bottom edge.
    pub const fn bottom(&self) -> i32 {
        self.y + self.height
    }

    /// Half-open containment test: `left <= x < right`, `top <= y < bottom`.
    pub const fn contains(&self, p: Point) -> bool {
        p.x >= self.x && p.x < self.right() && p.y >= self.y && p.y < self.bottom()
    }
}

/// One enumerated display: identity plus geometry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayInfo {
    /// OS-assigned display identifier.
    pub id: DisplayId,
    /// Display bounds in the registry's coordinate space.
    pub bounds: Rect,
    /// True for the primary display (menu bar host on macOS).
    pub is_primary: bool,
    /// True for a built-in panel (laptop lid).
    pub is_builtin: bool,
}

/// One focus observation from the OS.
///
/// `Unknown` covers transient query failures and timeouts; consumers must
/// treat it as "no change", never as "nothing focused".
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Sample {
    /// The frontmost application and its front window origin, in the focus
    /// sampler's (top-left-origin) coordinate space.
    Focused {
        /// Frontmost application name.
        app: String,
        /// Window origin x.
        x: i32,
        /// Window origin y.
        y: i32,
    },
    /// The query failed or timed out this tick.
    Unknown,
    /// The OS refused the query for lack of permission.
    PermissionDenied,
}

/// Errors surfaced by screen primitives.
#[derive(Debug, Error)]
pub enum Error {
    /// No system implementation exists for this platform.
    #[error("screen primitives are not supported on this platform")]
    Unsupported,
    /// Display enumeration failed.
    #[error("display enumeration failed: {0}")]
    Enumeration(String),
    /// An overlay operation failed.
    #[error("overlay operation failed: {0}")]
    Overlay(String),
    /// Underlying IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias for screen primitive results.
pub type Result<T> = StdResult<T, Error>;

/// Construct the system `ScreenOps` implementation for this platform.
pub fn system() -> Result<Arc<dyn ops::ScreenOps>> {
    #[cfg(target_os = "macos")]
    {
        Ok(Arc::new(mac::SystemScreen::new()))
    }
    #[cfg(not(target_os = "macos"))]
    {
        Err(Error::Unsupported)
    }
}
