//! Per-display monitor settings, with retention across hot-unplug.

use std::collections::{BTreeMap, HashMap};

use screen_ops::DisplayId;

/// Dimming configuration attached to one display identity.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct MonitorSetting {
    /// Whether dimming logic applies to this display at all.
    pub enabled: bool,
    /// Overlay opacity in `[0.0, 1.0]`.
    pub opacity: f64,
    /// True once an explicit per-monitor opacity was set; such displays stop
    /// following the global default.
    pub overridden: bool,
}

impl MonitorSetting {
    fn with_default_opacity(opacity: f64) -> Self {
        Self {
            enabled: true,
            opacity,
            overridden: false,
        }
    }
}

/// Store of active settings plus retained settings for unplugged displays.
///
/// Session display ids are stable across a reattach of the same device (lid
/// close/open, dock replug), so retained settings are keyed by display id
/// and restored when the id reappears.
#[derive(Debug, Default)]
pub(crate) struct SettingsStore {
    active: BTreeMap<DisplayId, MonitorSetting>,
    retained: HashMap<DisplayId, MonitorSetting>,
}

impl SettingsStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Make sure a setting exists for `id`: restore a retained one if the
    /// display was seen before, otherwise create defaults.
    pub(crate) fn ensure(&mut self, id: DisplayId, default_opacity: f64) {
        if self.active.contains_key(&id) {
            return;
        }
        let setting = self
            .retained
            .remove(&id)
            .unwrap_or_else(|| MonitorSetting::with_default_opacity(default_opacity));
        self.active.insert(id, setting);
    }

    /// Move a setting to the retained side when its display goes away.
    pub(crate) fn retire(&mut self, id: DisplayId) {
        if let Some(setting) = self.active.remove(&id) {
            self.retained.insert(id, setting);
        }
    }

    pub(crate) fn get(&self, id: DisplayId) -> Option<MonitorSetting> {
        self.active.get(&id).copied()
    }

    /// Whether dimming applies to `id`. Unknown displays default to enabled.
    pub(crate) fn enabled(&self, id: DisplayId) -> bool {
        self.active.get(&id).map(|s| s.enabled).unwrap_or(true)
    }

    /// Effective opacity for `id`, falling back to the global default.
    pub(crate) fn opacity(&self, id: DisplayId, fallback: f64) -> f64 {
        self.active
            .get(&id)
            .map(|s| s.opacity)
            .unwrap_or(fallback)
    }

    /// Set an explicit per-monitor opacity override.
    pub(crate) fn set_override(&mut self, id: DisplayId, opacity: f64) {
        if let Some(setting) = self.active.get_mut(&id) {
            setting.opacity = opacity;
            setting.overridden = true;
        }
    }

    /// Set the enabled flag for one display.
    pub(crate) fn set_enabled(&mut self, id: DisplayId, enabled: bool) {
        if let Some(setting) = self.active.get_mut(&id) {
            setting.enabled = enabled;
        }
    }

    /// Apply a new global default to every display without an explicit
    /// override. Returns the ids whose effective opacity changed.
    pub(crate) fn apply_global(&mut self, opacity: f64) -> Vec<DisplayId> {
        let mut updated = Vec::new();
        for (id, setting) in &mut self.active {
            if !setting.overridden && setting.opacity != opacity {
                setting.opacity = opacity;
                updated.push(*id);
            }
        }
        updated
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (DisplayId, MonitorSetting)> + '_ {
        self.active.iter().map(|(id, s)| (*id, *s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_on_first_sight() {
        let mut store = SettingsStore::new();
        store.ensure(1, 0.7);
        let s = store.get(1).unwrap();
        assert!(s.enabled);
        assert_eq!(s.opacity, 0.7);
        assert!(!s.overridden);
    }

    #[test]
    fn retire_and_reattach_restores_settings() {
        let mut store = SettingsStore::new();
        store.ensure(2, 0.7);
        store.set_override(2, 0.42);
        store.set_enabled(2, false);

        store.retire(2);
        assert!(store.get(2).is_none());

        // Same id comes back: old settings win over the default.
        store.ensure(2, 0.7);
        let s = store.get(2).unwrap();
        assert_eq!(s.opacity, 0.42);
        assert!(!s.enabled);
        assert!(s.overridden);
    }

    #[test]
    fn global_default_skips_overrides() {
        let mut store = SettingsStore::new();
        store.ensure(1, 0.7);
        store.ensure(2, 0.7);
        store.set_override(2, 0.9);

        let updated = store.apply_global(0.5);
        assert_eq!(updated, vec![1]);
        assert_eq!(store.opacity(1, 0.5), 0.5);
        assert_eq!(store.opacity(2, 0.5), 0.9);
    }

    #[test]
    fn ensure_is_idempotent() {
        let mut store = SettingsStore::new();
        store.ensure(1, 0.7);
        store.set_override(1, 0.3);
        store.ensure(1, 0.7);
        assert_eq!(store.get(1).unwrap().opacity, 0.3);
    }
}
