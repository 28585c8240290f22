//! Binary entrypoint for the umbra dimming daemon and CLI.

use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use tracing::{error, warn};
use tracing_subscriber::{fmt, prelude::*};

use umbra_engine::EngineCfg;
use umbra_server::{Client, Server};

/// Overlay helper window (spawned per dimmed display by the daemon).
mod overlay;
/// Human-readable rendering of status and display snapshots.
mod render;

#[derive(Parser, Debug)]
#[command(name = "umbra", about = "Focus-follows dimming for multi-display setups", version)]
/// Command-line interface for the `umbra` binary.
struct Cli {
    /// Subcommand; defaults to `serve`.
    #[command(subcommand)]
    command: Option<Command>,

    /// Socket path override (default: per-user runtime socket)
    #[arg(long, global = true, value_name = "PATH")]
    socket: Option<String>,

    /// Spawn a daemon if none is running (client subcommands)
    #[arg(long, global = true)]
    spawn: bool,

    /// Logging controls
    #[command(flatten)]
    log: logging::LogArgs,
}

#[derive(Subcommand, Debug)]
/// Top-level CLI subcommands.
enum Command {
    /// Run the dimming daemon in the foreground
    Serve {
        /// Focus poll interval in milliseconds
        #[arg(long, value_name = "MS", default_value_t = 500)]
        poll_ms: u64,

        /// Run the hot-plug check every N focus ticks
        #[arg(long, value_name = "TICKS", default_value_t = 10)]
        hotplug_every: u32,

        /// Default overlay opacity for displays without an override
        #[arg(long, default_value_t = 0.7)]
        opacity: f64,
    },

    /// Print the daemon's status
    Status {
        /// Emit JSON instead of the human-readable form
        #[arg(long)]
        json: bool,
    },

    /// List connected displays
    Displays {
        /// Emit JSON instead of the human-readable form
        #[arg(long)]
        json: bool,
    },

    /// Show per-monitor settings
    Monitors {
        /// Emit JSON instead of the human-readable form
        #[arg(long)]
        json: bool,
    },

    /// Toggle dimming on or off
    Toggle,

    /// Set the global overlay opacity
    Opacity {
        /// Opacity in [0.0, 1.0]
        value: f64,
    },

    /// Per-monitor controls
    Monitor {
        /// What to change on the monitor.
        #[command(subcommand)]
        cmd: MonitorCmd,
    },

    /// Stream state-change events as JSON lines (reconnects with backoff)
    Watch,

    /// Stop a running daemon
    Stop,

    /// Overlay helper window (internal; spawned by the daemon)
    #[command(hide = true)]
    Overlay(OverlayArgs),
}

#[derive(Subcommand, Debug)]
/// Per-monitor subcommands.
enum MonitorCmd {
    /// Set one display's opacity override
    Opacity {
        /// Display id
        display: u32,
        /// Opacity in [0.0, 1.0]
        value: f64,
    },
    /// Enable or disable dimming for one display
    Enabled {
        /// Display id
        display: u32,
        /// true or false
        value: bool,
    },
}

#[derive(Args, Debug)]
/// Geometry and opacity for the overlay helper window.
struct OverlayArgs {
    /// Display id the overlay covers (used for the window title).
    #[arg(long)]
    display: u32,
    /// Window origin x (top-left-origin screen coordinates).
    #[arg(long)]
    x: i32,
    /// Window origin y.
    #[arg(long)]
    y: i32,
    /// Window width in pixels.
    #[arg(long)]
    width: i32,
    /// Window height in pixels.
    #[arg(long)]
    height: i32,
    /// Initial overlay alpha.
    #[arg(long)]
    opacity: f64,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Compute final filter spec via shared helpers
    let final_spec = logging::compute_spec(
        cli.log.trace,
        cli.log.debug,
        cli.log.log_level.as_deref(),
        cli.log.log_filter.as_deref(),
    );
    let env_filter = logging::env_filter_from_spec(&final_spec);

    // One subscriber for all modes: env filter, compact output without
    // timestamps, plus the forward layer that relays daemon logs to
    // connected observers when a sink is bound.
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().without_time().compact())
        .with(logging::forward::layer())
        .init();

    // The overlay helper owns the main thread for its event loop; it must
    // not run inside a tokio runtime.
    if let Some(Command::Overlay(args)) = &cli.command {
        return overlay::run(args);
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!("failed to start runtime: {e}");
            return ExitCode::FAILURE;
        }
    };
    runtime.block_on(dispatch(cli))
}

async fn dispatch(cli: Cli) -> ExitCode {
    let socket = cli.socket.clone();
    let spawn = cli.spawn;
    match cli.command.unwrap_or(Command::Serve {
        poll_ms: 500,
        hotplug_every: 10,
        opacity: 0.7,
    }) {
        Command::Serve {
            poll_ms,
            hotplug_every,
            opacity,
        } => serve(socket, poll_ms, hotplug_every, opacity).await,
        Command::Status { json } => {
            with_client(socket, spawn, move |mut client| async move {
                let status = client.connection()?.get_status().await?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&status)?);
                } else {
                    print!("{}", render::status(&status));
                }
                Ok(())
            })
            .await
        }
        Command::Displays { json } => {
            with_client(socket, spawn, move |mut client| async move {
                let displays = client.connection()?.get_displays().await?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&displays)?);
                } else {
                    print!("{}", render::displays(&displays));
                }
                Ok(())
            })
            .await
        }
        Command::Monitors { json } => {
            with_client(socket, spawn, move |mut client| async move {
                let monitors = client.connection()?.get_monitors().await?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&monitors)?);
                } else {
                    print!("{}", render::monitors(&monitors));
                }
                Ok(())
            })
            .await
        }
        Command::Toggle => {
            with_client(socket, spawn, move |mut client| async move {
                let enabled = client.connection()?.toggle().await?;
                println!("dimming {}", if enabled { "on" } else { "off" });
                Ok(())
            })
            .await
        }
        Command::Opacity { value } => {
            with_client(socket, spawn, move |mut client| async move {
                client.connection()?.set_opacity(value).await?;
                println!("opacity {value}");
                Ok(())
            })
            .await
        }
        Command::Monitor { cmd } => {
            with_client(socket, spawn, move |mut client| async move {
                match cmd {
                    MonitorCmd::Opacity { display, value } => {
                        client.connection()?.set_monitor_opacity(display, value).await?;
                        println!("display {display} opacity {value}");
                    }
                    MonitorCmd::Enabled { display, value } => {
                        client.connection()?.set_monitor_enabled(display, value).await?;
                        println!(
                            "display {display} {}",
                            if value { "enabled" } else { "disabled" }
                        );
                    }
                }
                Ok(())
            })
            .await
        }
        Command::Watch => watch(socket).await,
        Command::Stop => {
            with_client(socket, false, move |mut client| async move {
                client.connection()?.shutdown().await?;
                println!("daemon stopped");
                Ok(())
            })
            .await
        }
        Command::Overlay(_) => unreachable!("handled before runtime start"),
    }
}

async fn serve(socket: Option<String>, poll_ms: u64, hotplug_every: u32, opacity: f64) -> ExitCode {
    let ops = match screen_ops::system() {
        Ok(ops) => ops,
        Err(e) => {
            error!("cannot start dimming daemon: {e}");
            return ExitCode::FAILURE;
        }
    };

    let perms = permissions::check_permissions();
    if !perms.accessibility_ok {
        warn!(
            "Accessibility permission not granted; focus sampling will report \
             permission denials until it is enabled in System Settings"
        );
    }

    let cfg = EngineCfg {
        poll_ms,
        hotplug_every,
        default_opacity: opacity.clamp(0.0, 1.0),
        ..EngineCfg::default()
    };
    let mut server = Server::new().with_engine_cfg(cfg);
    if let Some(path) = socket {
        server = server.with_socket_path(path);
    }
    match server.run(ops).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("server error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Connect (optionally auto-spawning a daemon), run one operation, report.
async fn with_client<F, Fut>(socket: Option<String>, spawn: bool, op: F) -> ExitCode
where
    F: FnOnce(Client) -> Fut,
    Fut: Future<Output = Result<(), Box<dyn std::error::Error>>>,
{
    let client = match socket {
        Some(path) => Client::new_with_socket(path),
        None => Client::new(),
    };
    let client = if spawn {
        client.with_auto_spawn_server()
    } else {
        client
    };
    let client = match client.connect().await {
        Ok(c) => c,
        Err(e) => {
            error!("cannot reach the daemon: {e} (is `umbra serve` running?)");
            return ExitCode::FAILURE;
        }
    };
    match op(client).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

/// Stream push messages as JSON lines, reconnecting with backoff.
async fn watch(socket: Option<String>) -> ExitCode {
    let mut backoff_ms: u64 = 500;
    loop {
        let client = match &socket {
            Some(path) => Client::new_with_socket(path.clone()),
            None => Client::new(),
        };
        match client.connect().await {
            Ok(mut client) => {
                backoff_ms = 500;
                let conn = match client.connection() {
                    Ok(c) => c,
                    Err(e) => {
                        error!("{e}");
                        return ExitCode::FAILURE;
                    }
                };
                loop {
                    match conn.recv_event().await {
                        Ok(msg) => match serde_json::to_string(&msg) {
                            Ok(line) => println!("{line}"),
                            Err(e) => warn!("failed to render event: {e}"),
                        },
                        Err(e) => {
                            warn!("connection lost: {e}; reconnecting");
                            break;
                        }
                    }
                }
            }
            Err(e) => {
                warn!("connect failed: {e}; retrying in {backoff_ms}ms");
            }
        }
        tokio::time::sleep(std::time::Duration::from_millis(backoff_ms)).await;
        backoff_ms = (backoff_ms * 2).min(30_000);
    }
}
