//! Managed overlay helper processes.
//!
//! Each overlay is a child running `umbra overlay ...` with a borderless
//! click-through window covering one display. The child reads `opacity <v>`
//! and `quit` lines on stdin, which is what makes in-place alpha updates
//! possible without tearing the window down.

use std::{
    io::Write as _,
    process::{Child, ChildStdin, Command, Stdio},
    time::{Duration, Instant},
};

use tracing::{debug, info, warn};

use crate::{DisplayId, Error, Rect, Result};

/// Time to wait for graceful exit after `quit`/SIGTERM before escalating.
const TERM_WAIT_TIMEOUT: Duration = Duration::from_millis(300);
/// Poll interval while waiting for the child to exit.
const TERM_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// One running overlay helper.
pub(super) struct OverlayChild {
    child: Child,
    stdin: ChildStdin,
}

impl OverlayChild {
    /// Spawn a helper covering `bounds` (top-left-origin coordinates) on `id`.
    pub(super) fn spawn(id: DisplayId, bounds: Rect, opacity: f64) -> Result<Self> {
        let exe = std::env::current_exe()?;
        let mut child = Command::new(exe)
            .args([
                "overlay",
                "--display",
                &id.to_string(),
                "--x",
                &bounds.x.to_string(),
                "--y",
                &bounds.y.to_string(),
                "--width",
                &bounds.width.to_string(),
                "--height",
                &bounds.height.to_string(),
                "--opacity",
                &opacity.to_string(),
            ])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Overlay(format!("no stdin pipe for overlay on {id}")))?;
        info!(display = id, pid = child.id(), "overlay helper spawned");
        Ok(Self { child, stdin })
    }

    /// True while the helper process has not exited.
    pub(super) fn is_alive(&mut self) -> bool {
        !matches!(self.child.try_wait(), Ok(Some(_)))
    }

    /// Push a new alpha to the running helper.
    pub(super) fn set_opacity(&mut self, opacity: f64) -> Result<()> {
        writeln!(self.stdin, "opacity {opacity}")
            .and_then(|()| self.stdin.flush())
            .map_err(|e| Error::Overlay(format!("overlay stdin write failed: {e}")))
    }

    /// Ask the helper to quit, then escalate to SIGTERM/SIGKILL.
    pub(super) fn terminate(mut self) {
        let pid = self.child.id();
        // Polite first: the helper exits its event loop on `quit`.
        let _ = writeln!(self.stdin, "quit").and_then(|()| self.stdin.flush());
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
        let deadline = Instant::now() + TERM_WAIT_TIMEOUT;
        while Instant::now() < deadline {
            match self.child.try_wait() {
                Ok(Some(_)) => {
                    debug!(pid, "overlay helper exited");
                    return;
                }
                Ok(None) => std::thread::sleep(TERM_POLL_INTERVAL),
                Err(_) => break,
            }
        }
        warn!(pid, "overlay helper did not exit; killing");
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}
