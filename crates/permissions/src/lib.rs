//! Simple permission checks for umbra.
//!
//! Focus sampling goes through System Events, which requires the
//! Accessibility permission; window-title access additionally needs Screen
//! Recording on recent macOS releases. This crate exposes a minimal, stable
//! API to query those grants so the server can warn early instead of
//! discovering denial from failing samples.
//!
//! There is no prompting logic here: the host is responsible for guiding the
//! user to System Settings if permissions are missing. On platforms other
//! than macOS every check reports granted.
//!
//! All calls are fast and side-effect free.

use serde::{Deserialize, Serialize};

#[cfg(target_os = "macos")]
#[link(name = "ApplicationServices", kind = "framework")]
unsafe extern "C" {
    fn AXIsProcessTrusted() -> bool;
    fn CGPreflightScreenCaptureAccess() -> bool;
}

/// Check the global Accessibility permission.
pub fn accessibility_ok() -> bool {
    #[cfg(target_os = "macos")]
    {
        unsafe { AXIsProcessTrusted() }
    }
    #[cfg(not(target_os = "macos"))]
    {
        true
    }
}

/// Check the Screen Recording permission.
///
/// Returns `true` when the process may read screen content via CoreGraphics
/// APIs that gate on Screen Recording.
pub fn screen_recording_ok() -> bool {
    #[cfg(target_os = "macos")]
    {
        unsafe { CGPreflightScreenCaptureAccess() }
    }
    #[cfg(not(target_os = "macos"))]
    {
        true
    }
}

/// Current permission status for the process.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PermissionsStatus {
    /// Accessibility (AX) permission; `true` if granted.
    pub accessibility_ok: bool,
    /// Screen Recording permission; `true` if granted.
    pub screen_recording_ok: bool,
}

/// Query all permissions relevant to focus sampling.
pub fn check_permissions() -> PermissionsStatus {
    PermissionsStatus {
        accessibility_ok: accessibility_ok(),
        screen_recording_ok: screen_recording_ok(),
    }
}
