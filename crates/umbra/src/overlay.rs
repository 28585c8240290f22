//! Overlay helper: one borderless, click-through, always-on-top black
//! window covering a display.
//!
//! The daemon spawns one helper process per dimmed display and keeps its
//! stdin open. The helper accepts `opacity <v>` lines (in-place alpha
//! updates, so dimming changes never flicker) and `quit`. When stdin closes
//! the helper exits, so an orphaned helper cannot outlive its daemon.

use std::process::ExitCode;

use crate::OverlayArgs;

/// Parsed control line from the daemon.
#[cfg_attr(not(target_os = "macos"), allow(dead_code))]
#[derive(Debug, Clone, Copy, PartialEq)]
enum Control {
    Opacity(f64),
    Quit,
}

#[cfg_attr(not(target_os = "macos"), allow(dead_code))]
fn parse_control(line: &str) -> Option<Control> {
    let line = line.trim();
    if line == "quit" {
        return Some(Control::Quit);
    }
    let value = line.strip_prefix("opacity ")?.trim().parse::<f64>().ok()?;
    Some(Control::Opacity(value.clamp(0.0, 1.0)))
}

/// Run the overlay window until told to quit. Never returns on macOS.
pub(crate) fn run(args: &OverlayArgs) -> ExitCode {
    #[cfg(target_os = "macos")]
    {
        macos::run(args)
    }
    #[cfg(not(target_os = "macos"))]
    {
        eprintln!(
            "overlay helper is not supported on this platform (display {})",
            args.display
        );
        ExitCode::FAILURE
    }
}

#[cfg(target_os = "macos")]
mod macos {
    use std::{io::BufRead as _, process::ExitCode, sync::mpsc};

    use objc2::rc::autoreleasepool;
    use objc2_app_kit::{NSApplication, NSColor, NSWindow, NSWindowCollectionBehavior};
    use objc2_foundation::MainThreadMarker;
    use tao::{
        dpi::{LogicalPosition, LogicalSize},
        event::{Event, StartCause, WindowEvent},
        event_loop::{ControlFlow, EventLoop},
        platform::macos::{ActivationPolicy, EventLoopExtMacOS},
        window::WindowBuilder,
    };
    use tracing::{error, warn};

    use super::{Control, parse_control};
    use crate::OverlayArgs;

    /// Return true if the window title matches the provided string.
    fn window_title_matches(window: &NSWindow, title_match: &str) -> bool {
        let title = window.title();
        autoreleasepool(|pool| unsafe { title.to_str(pool) == title_match })
    }

    /// Apply the overlay look to the window matching `title_match`: black,
    /// shadowless, click-through, on every Space, at the given alpha.
    fn apply_overlay_style(title_match: &str, opacity: f64) {
        let Some(mtm) = MainThreadMarker::new() else {
            return;
        };
        let app = NSApplication::sharedApplication(mtm);
        let windows = app.windows();
        for w in windows.iter() {
            let window = &*w;
            if window_title_matches(window, title_match) {
                window.setOpaque(false);
                window.setHasShadow(false);
                let black = NSColor::blackColor();
                window.setBackgroundColor(Some(&black));
                window.setAlphaValue(opacity);
                window.setIgnoresMouseEvents(true);
                window.setCollectionBehavior(NSWindowCollectionBehavior::CanJoinAllSpaces);
            }
        }
    }

    /// Update only the alpha of the window matching `title_match`.
    fn set_alpha(title_match: &str, opacity: f64) {
        let Some(mtm) = MainThreadMarker::new() else {
            return;
        };
        let app = NSApplication::sharedApplication(mtm);
        let windows = app.windows();
        for w in windows.iter() {
            let window = &*w;
            if window_title_matches(window, title_match) {
                window.setAlphaValue(opacity);
            }
        }
    }

    pub(super) fn run(args: &OverlayArgs) -> ExitCode {
        let title = format!("umbra-overlay-{}", args.display);
        let opacity = args.opacity.clamp(0.0, 1.0);

        let mut event_loop = EventLoop::new();
        // No dock icon, no menu bar takeover.
        event_loop.set_activation_policy(ActivationPolicy::Accessory);

        let window = match WindowBuilder::new()
            .with_title(&title)
            .with_decorations(false)
            .with_always_on_top(true)
            .with_transparent(true)
            .with_position(LogicalPosition::new(f64::from(args.x), f64::from(args.y)))
            .with_inner_size(LogicalSize::new(
                f64::from(args.width),
                f64::from(args.height),
            ))
            .build(&event_loop)
        {
            Ok(w) => w,
            Err(e) => {
                error!("failed to create overlay window: {e}");
                return ExitCode::FAILURE;
            }
        };
        if let Err(e) = window.set_ignore_cursor_events(true) {
            warn!("failed to enable click-through: {e}");
        }

        // Control lines arrive on stdin; the proxy wakes the event loop.
        let proxy = event_loop.create_proxy();
        let (tx, rx) = mpsc::channel::<Control>();
        std::thread::spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                if let Some(control) = parse_control(&line) {
                    let quit = control == Control::Quit;
                    let _ = tx.send(control);
                    let _ = proxy.send_event(());
                    if quit {
                        return;
                    }
                }
            }
            // stdin closed: the daemon is gone, take the overlay down.
            let _ = tx.send(Control::Quit);
            let _ = proxy.send_event(());
        });

        let window_id = window.id();
        event_loop.run(move |event, _, control_flow| {
            *control_flow = ControlFlow::Wait;
            // Keep the window alive for the whole loop.
            let _ = &window;
            match event {
                Event::NewEvents(StartCause::Init) => {
                    apply_overlay_style(&title, opacity);
                }
                Event::UserEvent(()) => {
                    while let Ok(control) = rx.try_recv() {
                        match control {
                            Control::Opacity(v) => set_alpha(&title, v),
                            Control::Quit => *control_flow = ControlFlow::Exit,
                        }
                    }
                }
                Event::WindowEvent {
                    event: WindowEvent::CloseRequested,
                    window_id: id,
                    ..
                } if id == window_id => {
                    *control_flow = ControlFlow::Exit;
                }
                _ => {}
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_opacity_lines() {
        assert_eq!(parse_control("opacity 0.5"), Some(Control::Opacity(0.5)));
        assert_eq!(parse_control("  opacity 1 "), Some(Control::Opacity(1.0)));
        // Out-of-range values clamp rather than fail.
        assert_eq!(parse_control("opacity 3.0"), Some(Control::Opacity(1.0)));
    }

    #[test]
    fn parses_quit() {
        assert_eq!(parse_control("quit"), Some(Control::Quit));
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(parse_control(""), None);
        assert_eq!(parse_control("opacity"), None);
        assert_eq!(parse_control("opacity x"), None);
        assert_eq!(parse_control("brightness 1"), None);
    }
}
