//! Typed RPC definitions for the umbra protocol.
//!
//! Defines the method names and notification channels used by the umbra
//! server and client. Request payloads are plain `mrpc::Value`s; snapshot
//! responses are msgpack-encoded binary payloads.

/// RPC request methods supported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// Get the full authoritative status snapshot.
    GetStatus,
    /// Get the list of connected displays with derived state.
    GetDisplays,
    /// Get the per-display settings map.
    GetMonitors,
    /// Flip the master dimming switch.
    Toggle,
    /// Set the global default opacity.
    SetOpacity,
    /// Set one display's opacity override.
    SetMonitorOpacity,
    /// Enable or disable dimming for one display.
    SetMonitorEnabled,
    /// Liveness probe; the reply arrives as a `pong` push message.
    Ping,
    /// Request a server shutdown.
    Shutdown,
}

impl Method {
    /// Stable string name for the method when talking to MRPC.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GetStatus => "get_status",
            Self::GetDisplays => "get_displays",
            Self::GetMonitors => "get_monitors",
            Self::Toggle => "toggle",
            Self::SetOpacity => "set_opacity",
            Self::SetMonitorOpacity => "set_monitor_opacity",
            Self::SetMonitorEnabled => "set_monitor_enabled",
            Self::Ping => "ping",
            Self::Shutdown => "shutdown",
        }
    }

    /// Parse a method name received over MRPC.
    pub fn try_from_str(s: &str) -> Option<Self> {
        match s {
            "get_status" => Some(Self::GetStatus),
            "get_displays" => Some(Self::GetDisplays),
            "get_monitors" => Some(Self::GetMonitors),
            "toggle" => Some(Self::Toggle),
            "set_opacity" => Some(Self::SetOpacity),
            "set_monitor_opacity" => Some(Self::SetMonitorOpacity),
            "set_monitor_enabled" => Some(Self::SetMonitorEnabled),
            "ping" => Some(Self::Ping),
            "shutdown" => Some(Self::Shutdown),
            _ => None,
        }
    }
}

/// One-way server→client notification channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notification {
    /// The single push channel carrying [`crate::Msg`] payloads.
    Notify,
}

impl Notification {
    /// Stable string name for the notification channel.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Notify => "notify",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_names_round_trip() {
        let methods = [
            Method::GetStatus,
            Method::GetDisplays,
            Method::GetMonitors,
            Method::Toggle,
            Method::SetOpacity,
            Method::SetMonitorOpacity,
            Method::SetMonitorEnabled,
            Method::Ping,
            Method::Shutdown,
        ];
        for m in methods {
            assert_eq!(Method::try_from_str(m.as_str()), Some(m));
        }
        assert_eq!(Method::try_from_str("no_such_method"), None);
    }
}
