//! Shared protocol types for the umbra dimming engine.
//!
//! Everything that crosses the server/client boundary lives here: status and
//! display snapshots, push messages, RPC method names, and the msgpack codec
//! used by the IPC layer.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub use screen_ops::{DisplayId, Rect};

pub mod rpc;

/// Per-display configuration plus derived state, as reported to observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorStatus {
    /// Whether dimming logic applies to this display at all.
    pub enabled: bool,
    /// Overlay opacity for this display, in `[0.0, 1.0]`.
    pub opacity: f64,
    /// Display bounds in the registry's coordinate space.
    pub bounds: Rect,
    /// True when this display currently holds focus.
    pub is_focused: bool,
    /// True when a dimming overlay currently covers this display.
    pub has_overlay: bool,
}

/// One entry of the `get_displays` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplayEntry {
    /// OS-assigned display identifier.
    pub id: DisplayId,
    /// Display bounds in the registry's coordinate space.
    pub bounds: Rect,
    /// True for the primary display.
    pub is_primary: bool,
    /// True for a built-in panel.
    pub is_builtin: bool,
    /// True when this display currently holds focus.
    pub is_focused: bool,
    /// True when a dimming overlay currently covers this display.
    pub has_overlay: bool,
}

/// Full authoritative engine state.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Status {
    /// Master dimming switch.
    pub enabled: bool,
    /// Global default opacity applied to monitors without an override.
    pub opacity: f64,
    /// Display currently holding focus, if resolved.
    pub focused_display: Option<DisplayId>,
    /// Per-display settings and derived state.
    pub monitor_settings: BTreeMap<DisplayId, MonitorStatus>,
    /// True once the OS has denied the focus query for lack of permission.
    pub permission_denied: bool,
}

/// Messages pushed from the server to subscribed observers.
///
/// Delivery is best-effort and ordered per observer; a disconnected observer
/// misses events and re-enters via a fresh [`Msg::InitialStatus`] snapshot on
/// reconnect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Msg {
    /// Full snapshot sent once to each newly connected observer.
    InitialStatus(Status),
    /// Full snapshot sent in reply to an explicit status request.
    StatusUpdate(Status),
    /// The master dimming switch flipped.
    EnabledChanged {
        /// New switch position.
        enabled: bool,
    },
    /// The global default opacity changed.
    OpacityChanged {
        /// New default opacity.
        opacity: f64,
    },
    /// One display's opacity override changed.
    MonitorOpacityChanged {
        /// Affected display.
        display_id: DisplayId,
        /// New opacity for that display.
        opacity: f64,
    },
    /// One display's enabled flag changed.
    MonitorEnabledChanged {
        /// Affected display.
        display_id: DisplayId,
        /// New enabled flag for that display.
        enabled: bool,
    },
    /// Focus moved to a different display.
    FocusChanged {
        /// Display now holding focus, if resolved.
        display_id: Option<DisplayId>,
    },
    /// The connected display set changed (one aggregated event per hot-plug
    /// sync, never one per display).
    ConfigurationChanged {
        /// Displays that appeared.
        added: Vec<DisplayId>,
        /// Displays that were removed.
        removed: Vec<DisplayId>,
    },
    /// Periodic liveness signal (milliseconds since the Unix epoch).
    Heartbeat(u64),
    /// Reply to a client `ping`.
    Pong,
    /// An error the observer should surface.
    Error {
        /// Human-readable description.
        message: String,
    },
    /// Streaming log line forwarded from the server.
    Log {
        /// Log level name.
        level: String,
        /// Emitting module path.
        target: String,
        /// Rendered message.
        message: String,
    },
}

/// IPC-related helpers: channel aliases, heartbeat cadence, message codec.
pub mod ipc {
    use std::time::Duration;

    use super::Msg;

    /// Bounded sender for push messages.
    pub type MsgTx = tokio::sync::mpsc::Sender<Msg>;
    /// Bounded receiver for push messages.
    pub type MsgRx = tokio::sync::mpsc::Receiver<Msg>;

    /// Capacity of the server-side push pipeline. Observers that cannot keep
    /// up lose messages rather than stalling the engine.
    pub const MSG_CHANNEL_CAPACITY: usize = 256;

    /// Create the standard bounded push channel (sender, receiver).
    pub fn msg_channel() -> (MsgTx, MsgRx) {
        tokio::sync::mpsc::channel::<Msg>(MSG_CHANNEL_CAPACITY)
    }

    /// Heartbeat cadence helpers.
    pub mod heartbeat {
        use super::Duration;

        /// Interval between server heartbeats.
        pub fn interval() -> Duration {
            Duration::from_secs(5)
        }
    }

    /// Codec for encoding/decoding push messages used by the IPC layer.
    pub mod codec;
}
