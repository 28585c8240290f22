//! Frontmost-window sampling via System Events.

use std::{
    process::{Command, Stdio},
    time::{Duration, Instant},
};

use tracing::{debug, warn};

use crate::Sample;

/// Hard cap on one `osascript` invocation. Permission dialogs can park the
/// call indefinitely; the engine must never wait that long.
const SAMPLE_TIMEOUT: Duration = Duration::from_secs(2);

/// Poll interval while waiting for the script to finish.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Asks System Events for the frontmost process and its front window's
/// position. Output shape: `AppName|x,y`. Windowless apps report `0,0`.
const FOCUS_SCRIPT: &str = r#"
tell application "System Events"
    set frontApp to first application process whose frontmost is true
    set appName to name of frontApp
    try
        set frontWindow to first window of frontApp
        set {x, y} to position of frontWindow
        return appName & "|" & x & "," & y
    on error
        return appName & "|0,0"
    end try
end tell
"#;

/// Run one focus sample. Never blocks past [`SAMPLE_TIMEOUT`].
pub(super) fn sample() -> Sample {
    let mut child = match Command::new("osascript")
        .arg("-e")
        .arg(FOCUS_SCRIPT)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
    {
        Ok(c) => c,
        Err(e) => {
            warn!("failed to spawn osascript: {e}");
            return Sample::Unknown;
        }
    };

    let deadline = Instant::now() + SAMPLE_TIMEOUT;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {
                if Instant::now() >= deadline {
                    warn!("focus sample timed out; killing osascript");
                    let _ = child.kill();
                    let _ = child.wait();
                    return Sample::Unknown;
                }
                std::thread::sleep(POLL_INTERVAL);
            }
            Err(e) => {
                warn!("failed to wait for osascript: {e}");
                return Sample::Unknown;
            }
        }
    };

    if !status.success() {
        let stderr = child
            .stderr
            .take()
            .and_then(|mut s| {
                use std::io::Read as _;
                let mut buf = String::new();
                s.read_to_string(&mut buf).ok().map(|_| buf)
            })
            .unwrap_or_default();
        // -1743: not authorized to send Apple events; assistive access
        // denials mention "not allowed".
        if stderr.contains("1743") || stderr.contains("not allowed") {
            return Sample::PermissionDenied;
        }
        debug!("osascript failed: {}", stderr.trim());
        return Sample::Unknown;
    }

    let stdout = child
        .stdout
        .take()
        .and_then(|mut s| {
            use std::io::Read as _;
            let mut buf = String::new();
            s.read_to_string(&mut buf).ok().map(|_| buf)
        })
        .unwrap_or_default();

    parse_sample(stdout.trim()).unwrap_or(Sample::Unknown)
}

/// Parse `AppName|x,y` into a sample.
fn parse_sample(line: &str) -> Option<Sample> {
    let (app, coords) = line.split_once('|')?;
    let (x, y) = coords.split_once(',')?;
    Some(Sample::Focused {
        app: app.to_string(),
        x: x.trim().parse().ok()?,
        y: y.trim().parse().ok()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_output() {
        assert_eq!(
            parse_sample("Safari|120,45"),
            Some(Sample::Focused {
                app: "Safari".into(),
                x: 120,
                y: 45
            })
        );
    }

    #[test]
    fn tolerates_negative_coordinates() {
        // Displays left of or above the primary produce negative origins.
        assert_eq!(
            parse_sample("kitty|-1920,-200"),
            Some(Sample::Focused {
                app: "kitty".into(),
                x: -1920,
                y: -200
            })
        );
    }

    #[test]
    fn rejects_malformed_output() {
        assert_eq!(parse_sample(""), None);
        assert_eq!(parse_sample("Safari"), None);
        assert_eq!(parse_sample("Safari|oops"), None);
        assert_eq!(parse_sample("Safari|1;2"), None);
    }
}
