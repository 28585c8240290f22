//! Human-readable rendering for CLI output.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use umbra_protocol::{DisplayEntry, DisplayId, MonitorStatus, Rect, Status};

fn bounds(r: &Rect) -> String {
    format!("{}x{} at ({}, {})", r.width, r.height, r.x, r.y)
}

fn monitor_state(m: &MonitorStatus) -> &'static str {
    if m.is_focused {
        "focused"
    } else if m.has_overlay {
        "dimmed"
    } else {
        "clear"
    }
}

/// Render the full status snapshot.
pub(crate) fn status(s: &Status) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "dimming:  {}", if s.enabled { "on" } else { "off" });
    let _ = writeln!(out, "opacity:  {:.2}", s.opacity);
    match s.focused_display {
        Some(id) => {
            let _ = writeln!(out, "focused:  display {id}");
        }
        None => {
            let _ = writeln!(out, "focused:  unresolved");
        }
    }
    if s.permission_denied {
        let _ = writeln!(out, "warning:  focus query permission denied");
    }
    out.push_str(&monitors(&s.monitor_settings));
    out
}

/// Render the per-monitor settings map.
pub(crate) fn monitors(map: &BTreeMap<DisplayId, MonitorStatus>) -> String {
    let mut out = String::new();
    for (id, m) in map {
        let _ = writeln!(
            out,
            "display {id}: {:<8} {} opacity {:.2}  {}",
            monitor_state(m),
            if m.enabled { "enabled " } else { "disabled" },
            m.opacity,
            bounds(&m.bounds),
        );
    }
    out
}

/// Render the display list.
pub(crate) fn displays(list: &[DisplayEntry]) -> String {
    let mut out = String::new();
    for d in list {
        let mut tags = Vec::new();
        if d.is_primary {
            tags.push("primary");
        }
        if d.is_builtin {
            tags.push("builtin");
        }
        if d.is_focused {
            tags.push("focused");
        }
        if d.has_overlay {
            tags.push("dimmed");
        }
        let _ = writeln!(
            out,
            "display {}: {}  [{}]",
            d.id,
            bounds(&d.bounds),
            tags.join(", "),
        );
    }
    out
}
