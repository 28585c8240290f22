//! Managed client: connect to a running daemon, optionally spawning one.

use std::{env, time::Duration};

use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use crate::{
    Error, Result, default_socket_path,
    ipc::Connection,
    process::{ProcessConfig, ServerProcess},
};

// Connection timing constants (internal-only; simplified API)
const STARTUP_POLL_TIMEOUT_MS: u64 = 1000;
const CONNECT_TIMEOUT_SECS: u64 = 5;
const CONNECT_MAX_ATTEMPTS: u32 = 5;
const CONNECT_RETRY_DELAY_MS: u64 = 200;

/// A client for connecting to a dimming server.
///
/// By default the client only connects to an already-running daemon at the
/// configured socket path. Call
/// [`with_auto_spawn_server()`](Self::with_auto_spawn_server) to launch one
/// (the current executable in `serve` mode) when none is running.
pub struct Client {
    /// Socket path for IPC communication
    socket_path: String,
    /// Optional server configuration (if None, won't spawn server)
    server_config: Option<ProcessConfig>,
    /// The spawned server process (if any)
    server: Option<ServerProcess>,
    /// The active IPC connection (if connected)
    connection: Option<Connection>,
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

impl Client {
    /// Create a connect-only client against the default per-user socket.
    pub fn new() -> Self {
        Self {
            socket_path: default_socket_path().to_string(),
            server_config: None,
            server: None,
            connection: None,
        }
    }

    /// Create a connect-only client with the given socket path.
    pub fn new_with_socket(socket_path: impl Into<String>) -> Self {
        Self {
            socket_path: socket_path.into(),
            server_config: None,
            server: None,
            connection: None,
        }
    }

    /// Enable automatic server spawning using the default command: the
    /// current executable with `serve --socket <path>`.
    pub fn with_auto_spawn_server(mut self) -> Self {
        if let Ok(current_exe) = env::current_exe() {
            let mut config = ProcessConfig::new(current_exe);
            // Pass the socket path so the server uses the same one we poll.
            config.args = vec![
                "serve".to_string(),
                "--socket".to_string(),
                self.socket_path.clone(),
            ];
            // Propagate the log filter to the spawned daemon.
            config
                .env
                .push(("RUST_LOG".to_string(), logging::log_config_for_child()));
            self.server_config = Some(config);
        }
        self
    }

    /// Connect to the server, optionally spawning it first
    pub async fn connect(mut self) -> Result<Self> {
        if self.connection.is_some() {
            debug!("Already connected to server");
            return Ok(self);
        }

        // Spawn a managed server if configured and nothing is listening yet.
        let mut spawned_server: Option<ServerProcess> = None;
        if let Some(server_config) = &self.server_config
            && self.try_connect().await.is_err()
        {
            info!("Spawning new server at {}", self.socket_path);
            let mut server = ServerProcess::new(server_config.clone());
            server.start().await?;
            spawned_server = Some(server);
        }

        // Unified readiness + retry logic
        let spawned = spawned_server.is_some();
        match self.try_connect_with_retries(spawned).await {
            Ok(conn) => {
                self.connection = Some(conn);
                if let Some(server) = spawned_server {
                    self.server = Some(server);
                }
                Ok(self)
            }
            Err(e) => {
                error!("Failed to connect to server: {}", e);
                if !permissions::accessibility_ok() {
                    warn!("Accessibility not granted; a running daemon cannot sample focus");
                }
                if let Some(mut server) = spawned_server {
                    // Best effort cleanup
                    let _ = server.stop().await;
                }
                Err(e)
            }
        }
    }

    /// Try to connect to the server once
    async fn try_connect(&self) -> Result<Connection> {
        match timeout(
            Duration::from_secs(CONNECT_TIMEOUT_SECS),
            Connection::connect_unix(&self.socket_path),
        )
        .await
        {
            Ok(Ok(connection)) => Ok(connection),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(Error::Ipc(format!(
                "Connection timeout after {:?}",
                Duration::from_secs(CONNECT_TIMEOUT_SECS)
            ))),
        }
    }

    /// Try to connect with retries; includes a fast startup poll if a managed
    /// server has just been spawned.
    async fn try_connect_with_retries(&self, just_spawned: bool) -> Result<Connection> {
        let mut last_error = None;

        // A freshly spawned server gets a fast readiness poll window first.
        if just_spawned {
            debug!(
                "Polling for server readiness (timeout: {:?})",
                Duration::from_millis(STARTUP_POLL_TIMEOUT_MS)
            );
            let start_time = tokio::time::Instant::now();
            let mut poll_interval = Duration::from_millis(10);
            while start_time.elapsed() < Duration::from_millis(STARTUP_POLL_TIMEOUT_MS) {
                match self.try_connect().await {
                    Ok(conn) => {
                        info!("Connected to spawned server in {:?}", start_time.elapsed());
                        return Ok(conn);
                    }
                    Err(e) => {
                        last_error = Some(e);
                        sleep(poll_interval).await;
                        if poll_interval < Duration::from_millis(100) {
                            poll_interval = poll_interval.saturating_add(Duration::from_millis(10));
                        }
                    }
                }
            }
            debug!("Startup poll window elapsed; falling back to standard retries");
        }

        for attempt in 1..=CONNECT_MAX_ATTEMPTS {
            debug!("Connection attempt {}/{}", attempt, CONNECT_MAX_ATTEMPTS);
            match self.try_connect().await {
                Ok(connection) => return Ok(connection),
                Err(e) => {
                    warn!("Connection attempt {} failed: {}", attempt, e);
                    last_error = Some(e);
                    if attempt < CONNECT_MAX_ATTEMPTS {
                        sleep(Duration::from_millis(CONNECT_RETRY_DELAY_MS)).await;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            Error::Ipc("Failed to connect after all retry attempts".to_string())
        }))
    }

    /// Get a reference to the connection
    pub fn connection(&mut self) -> Result<&mut Connection> {
        self.connection
            .as_mut()
            .ok_or_else(|| Error::Ipc("Not connected to server".to_string()))
    }

    /// Check if connected
    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Disconnect from the server and optionally stop it
    pub async fn disconnect(&mut self, stop_server: bool) -> Result<()> {
        if let Some(connection) = self.connection.take() {
            // Dropping the connection closes it; the daemon keeps running
            // for other observers unless `stop_server` is set.
            debug!("Closing connection");
            drop(connection);
        }
        if stop_server && let Some(mut server) = self.server.take() {
            info!("Stopping managed server");
            server.stop().await?;
        }
        Ok(())
    }

    /// Gracefully shut down the server via RPC, then stop the managed
    /// process if still running.
    pub async fn shutdown_server(&mut self) -> Result<()> {
        if let Some(conn) = self.connection.as_mut() {
            info!("Requesting server shutdown via RPC");
            conn.shutdown().await?;
        }
        if let Some(mut server) = self.server.take() {
            info!("Stopping managed server process");
            server.stop().await?;
        }
        Ok(())
    }

    /// Get the PID of the spawned server process, if any.
    pub fn server_pid(&self) -> Option<u32> {
        self.server.as_ref().and_then(|s| s.pid())
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        // Clean disconnect on drop
        if self.is_connected() {
            debug!("Client dropped while still connected");
            // Can't do async in drop; the connection closes when dropped.
        }
        // ServerProcess has its own drop implementation
        if self.server.is_some() {
            debug!("Client dropped with running server");
        }
    }
}
