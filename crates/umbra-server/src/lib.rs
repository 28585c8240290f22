//! IPC server/client layer for the umbra dimming engine.
//!
//! This crate wraps the engine in an MRPC server over a per-user Unix
//! socket and provides the matching typed client.
//!
//! Public API (internal stability)
//! - `Server`: spawns the engine and hosts the MRPC IPC server.
//! - `Client`: connects to a server; can auto-spawn a managed one.
//! - `Connection`: typed RPCs and a stream of push messages (`Msg`).
//! - `default_socket_path()`: the per-user socket location.
//!
//! Connection lifecycle and conventions
//! - Per-user socket: one dimming daemon serves all of a user's clients, so
//!   the socket path is derived from the UID alone. CLI invocations find the
//!   running daemon without any discovery step; pass an explicit path to run
//!   side-by-side instances.
//! - Snapshot-then-stream: on connect, each observer receives one
//!   `initial_status` snapshot no older than the last completed
//!   reconciliation, then push messages in emission order. There is no
//!   durable queue; a reconnecting observer re-enters via a fresh snapshot
//!   rather than replaying missed events.
//! - Heartbeat: the server broadcasts a periodic heartbeat so observers can
//!   tell a quiet connection from a dead one; `ping` answers with a `pong`
//!   push message.
//! - Shutdown: RPC `shutdown` or a termination signal stops the server; the
//!   engine destroys every overlay it owns before the process exits.

use std::{env, path::PathBuf, sync::OnceLock};

mod client;
mod error;
mod ipc;
mod process;
mod server;

pub use client::Client;
pub use error::{Error, Result};
pub use ipc::Connection;
pub use server::Server;

/// Return the per-user runtime directory used for IPC socket files.
///
/// Preference order:
/// - `$XDG_RUNTIME_DIR/umbra`
/// - `~/Library/Caches/umbra/run` (macOS user cache)
/// - `/tmp`
fn socket_runtime_dir() -> PathBuf {
    if let Ok(xdg) = env::var("XDG_RUNTIME_DIR")
        && !xdg.is_empty()
    {
        return PathBuf::from(xdg).join("umbra");
    }
    if let Ok(home) = env::var("HOME")
        && !home.is_empty()
    {
        return PathBuf::from(home).join("Library/Caches/umbra/run");
    }
    PathBuf::from("/tmp")
}

/// Get the default socket path for IPC communication.
///
/// The path is per-user (uid-scoped), not per-process: the dimming daemon is
/// a singleton per user and every client should find the same socket.
pub fn default_socket_path() -> &'static str {
    static SOCKET_PATH: OnceLock<String> = OnceLock::new();
    SOCKET_PATH.get_or_init(|| {
        let uid = unsafe { libc::getuid() };
        socket_runtime_dir()
            .join(format!("umbra-{}.sock", uid))
            .to_string_lossy()
            .to_string()
    })
}
