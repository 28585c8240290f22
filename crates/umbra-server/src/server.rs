//! Server entry point: engine plus IPC listener plus signal handling.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use tokio::signal::unix::{SignalKind, signal};
use tracing::{info, warn};

use screen_ops::ops::ScreenOps;
use umbra_engine::{Engine, EngineCfg};

use crate::{Result, default_socket_path, ipc::IpcServer};

/// A dimming server: owns the engine and the MRPC IPC surface.
pub struct Server {
    socket_path: String,
    engine_cfg: EngineCfg,
}

impl Default for Server {
    fn default() -> Self {
        Self::new()
    }
}

impl Server {
    /// Create a new server with default configuration.
    pub fn new() -> Self {
        Self {
            socket_path: default_socket_path().to_string(),
            engine_cfg: EngineCfg::default(),
        }
    }

    /// Set the socket path for IPC communication.
    pub fn with_socket_path(mut self, path: impl Into<String>) -> Self {
        self.socket_path = path.into();
        self
    }

    /// Override the engine configuration.
    pub fn with_engine_cfg(mut self, cfg: EngineCfg) -> Self {
        self.engine_cfg = cfg;
        self
    }

    /// Run the server until an RPC shutdown, SIGINT, or SIGTERM.
    ///
    /// On every exit path the engine is shut down first, which destroys all
    /// active overlays — an orphaned overlay would keep a display dimmed
    /// after this process is gone.
    pub async fn run(self, ops: Arc<dyn ScreenOps>) -> Result<()> {
        info!("Starting dimming server on socket: {}", self.socket_path);

        let engine = Engine::spawn(ops, self.engine_cfg);
        let shutdown = Arc::new(AtomicBool::new(false));
        let ipc = IpcServer::new(&self.socket_path, engine.clone(), shutdown.clone());

        let mut sigterm = signal(SignalKind::terminate())?;
        let run = ipc.run();
        tokio::pin!(run);

        let result = tokio::select! {
            res = &mut run => res,
            _ = tokio::signal::ctrl_c() => {
                info!("SIGINT received; shutting down");
                Ok(())
            }
            _ = sigterm.recv() => {
                info!("SIGTERM received; shutting down");
                Ok(())
            }
        };

        shutdown.store(true, Ordering::SeqCst);
        if let Err(e) = engine.shutdown().await {
            // Already stopped (e.g. overlay exhaustion); overlays were
            // destroyed on the engine's own exit path.
            warn!("engine shutdown: {e}");
        }
        info!("Shutdown complete");
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_methods_chain() {
        let server = Server::new().with_socket_path("/custom/path.sock");
        assert_eq!(server.socket_path, "/custom/path.sock");

        let server = Server::new()
            .with_socket_path("/initial/path.sock")
            .with_socket_path("/another/path.sock");
        assert_eq!(server.socket_path, "/another/path.sock");
    }

    #[test]
    fn default_uses_default_socket() {
        let server = Server::default();
        assert_eq!(server.socket_path, default_socket_path());
    }
}
