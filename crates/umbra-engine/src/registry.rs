//! Authoritative display registry and point-to-display resolution.

use std::collections::BTreeMap;

use screen_ops::{DisplayId, DisplayInfo, Point, Rect};

/// The set of currently connected displays plus the cached primary height.
///
/// Bounds are stored in the enumeration's (bottom-left-origin) coordinate
/// space. Focus samples arrive in top-left-origin coordinates, so
/// [`DisplayRegistry::resolve`] applies `y' = primary_height - y` before any
/// containment test. The primary height is cached here because it must stay
/// consistent with the stored bounds across hot-plug events.
#[derive(Debug, Default)]
pub(crate) struct DisplayRegistry {
    displays: BTreeMap<DisplayId, DisplayInfo>,
    primary_height: i32,
}

impl DisplayRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Replace the registry contents from a fresh enumeration. Returns true
    /// when membership, geometry, or primary designation changed.
    pub(crate) fn replace(&mut self, list: &[DisplayInfo]) -> bool {
        let next: BTreeMap<DisplayId, DisplayInfo> =
            list.iter().map(|info| (info.id, *info)).collect();
        let changed = next != self.displays;
        self.displays = next;
        self.primary_height = self
            .primary()
            .map(|info| info.bounds.height)
            .unwrap_or(0);
        changed
    }

    /// Display ids in ascending order (the resolution iteration order).
    pub(crate) fn ids(&self) -> Vec<DisplayId> {
        self.displays.keys().copied().collect()
    }

    pub(crate) fn contains(&self, id: DisplayId) -> bool {
        self.displays.contains_key(&id)
    }

    pub(crate) fn get(&self, id: DisplayId) -> Option<&DisplayInfo> {
        self.displays.get(&id)
    }

    pub(crate) fn bounds(&self, id: DisplayId) -> Option<Rect> {
        self.displays.get(&id).map(|info| info.bounds)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.displays.is_empty()
    }

    /// The primary display: the one flagged by the OS, else the lowest id.
    fn primary(&self) -> Option<&DisplayInfo> {
        self.displays
            .values()
            .find(|info| info.is_primary)
            .or_else(|| self.displays.values().next())
    }

    /// Resolve a focus-sampler point to a display identity.
    ///
    /// The point is converted into the registry's coordinate space, then
    /// tested against every display with half-open semantics in ascending-id
    /// order (first match wins; deterministic even if bounds ever overlapped).
    /// A point outside every display falls back to the primary — the engine
    /// must always have an answer for "which display is focused". `None` only
    /// when the registry is empty.
    pub(crate) fn resolve(&self, point: Point) -> Option<DisplayId> {
        let converted = Point {
            x: point.x,
            y: self.primary_height - point.y,
        };
        for (id, info) in &self.displays {
            if info.bounds.contains(converted) {
                return Some(*id);
            }
        }
        self.primary().map(|info| info.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(id: DisplayId, bounds: Rect, primary: bool) -> DisplayInfo {
        DisplayInfo {
            id,
            bounds,
            is_primary: primary,
            is_builtin: primary,
        }
    }

    /// Primary 1920x1080 at the origin, secondary to the right.
    fn two_displays() -> DisplayRegistry {
        let mut reg = DisplayRegistry::new();
        reg.replace(&[
            info(1, Rect::new(0, 0, 1920, 1080), true),
            info(2, Rect::new(1920, 0, 2560, 1440), false),
        ]);
        reg
    }

    #[test]
    fn resolves_interior_points() {
        let reg = two_displays();
        // Sampler y is measured from the top of the primary; a window 100px
        // down converts to flipped y 980, inside display 1.
        assert_eq!(reg.resolve(Point { x: 500, y: 100 }), Some(1));
        assert_eq!(reg.resolve(Point { x: 2000, y: 100 }), Some(2));
    }

    #[test]
    fn conversion_is_applied_before_containment() {
        let mut reg = DisplayRegistry::new();
        reg.replace(&[
            info(1, Rect::new(0, 0, 1000, 1000), true),
            // Below the primary in flipped space.
            info(2, Rect::new(0, -1000, 1000, 1000), false),
        ]);
        // Sampler y 1500 is below the primary's bottom edge: flipped to -500.
        assert_eq!(reg.resolve(Point { x: 10, y: 1500 }), Some(2));
    }

    #[test]
    fn outside_all_bounds_falls_back_to_primary() {
        let reg = two_displays();
        assert_eq!(reg.resolve(Point { x: 99999, y: 99999 }), Some(1));
        assert_eq!(reg.resolve(Point { x: -5000, y: 100 }), Some(1));
    }

    #[test]
    fn fallback_without_primary_flag_is_lowest_id() {
        let mut reg = DisplayRegistry::new();
        reg.replace(&[
            info(7, Rect::new(0, 0, 100, 100), false),
            info(3, Rect::new(200, 0, 100, 100), false),
        ]);
        assert_eq!(reg.resolve(Point { x: 99999, y: 0 }), Some(3));
    }

    #[test]
    fn empty_registry_resolves_to_none() {
        let reg = DisplayRegistry::new();
        assert_eq!(reg.resolve(Point { x: 0, y: 0 }), None);
    }

    #[test]
    fn replace_reports_changes() {
        let mut reg = DisplayRegistry::new();
        let first = [info(1, Rect::new(0, 0, 1920, 1080), true)];
        assert!(reg.replace(&first));
        assert!(!reg.replace(&first));
        // Same membership, moved bounds.
        assert!(reg.replace(&[info(1, Rect::new(0, 0, 2560, 1440), true)]));
    }

    #[test]
    fn primary_height_tracks_primary_changes() {
        let mut reg = DisplayRegistry::new();
        reg.replace(&[
            info(1, Rect::new(0, 0, 1920, 1080), true),
            info(2, Rect::new(1920, 0, 2560, 1440), false),
        ]);
        // Point near the top of the primary.
        assert_eq!(reg.resolve(Point { x: 10, y: 50 }), Some(1));

        // Primary swaps to the taller display; the conversion reference
        // must follow.
        reg.replace(&[
            info(1, Rect::new(0, 0, 1920, 1080), false),
            info(2, Rect::new(1920, 0, 2560, 1440), true),
        ]);
        assert_eq!(reg.resolve(Point { x: 2000, y: 50 }), Some(2));
    }
}
