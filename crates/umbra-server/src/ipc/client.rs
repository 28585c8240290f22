//! MRPC connection implementation for the dimming server.

use std::{collections::BTreeMap, result::Result as StdResult, sync::Arc};

use async_trait::async_trait;
use mrpc::{Client as MrpcClient, Connection as MrpcConnection, RpcError, RpcSender, Value};
use serde::de::DeserializeOwned;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, error, info, trace};

use umbra_protocol::{
    DisplayEntry, DisplayId, MonitorStatus, Msg, Status,
    ipc::codec,
    rpc::{Method, Notification},
};

use crate::{Error, Result};

/// Active IPC connection.
///
/// Holds the MRPC client and an unbounded channel that carries
/// server→client push messages: status snapshots, state-change
/// notifications, forwarded logs, and the liveness heartbeat.
pub struct Connection {
    // Drop order matters: `client` must be released before `event_rx` so the
    // MRPC connection closes before we tear down the receive channel.
    // Otherwise in-flight notifications arrive after the receiver disappears,
    // spamming send errors during normal shutdown.
    event_rx: UnboundedReceiver<Msg>,
    client: MrpcClient<ClientHandler>,
}

impl Connection {
    /// Connect to the server and return a connection handle
    pub async fn connect_unix(socket_path: &str) -> Result<Self> {
        debug!("Connecting to MRPC server at: {}", socket_path);

        // Create event channel for receiving push messages from the server
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let handler = ClientHandler {
            event_tx: Arc::new(event_tx),
        };

        let client = MrpcClient::connect_unix(socket_path, handler)
            .await
            .map_err(|e| Error::Ipc(format!("Failed to connect: {}", e)))?;

        info!("IPC client connected");

        Ok(Self { event_rx, client })
    }

    async fn request(&mut self, method: Method, params: &[Value]) -> Result<Value> {
        self.client
            .send_request(method.as_str(), params)
            .await
            .map_err(|e| Error::Ipc(format!("{} request failed: {}", method.as_str(), e)))
    }

    async fn request_ok(&mut self, method: Method, params: &[Value]) -> Result<()> {
        match self.request(method, params).await? {
            Value::Boolean(true) => Ok(()),
            other => Err(Error::Ipc(format!(
                "Unexpected {} response: {:?}",
                method.as_str(),
                other
            ))),
        }
    }

    async fn request_binary<T: DeserializeOwned>(
        &mut self,
        method: Method,
        params: &[Value],
    ) -> Result<T> {
        match self.request(method, params).await? {
            Value::Binary(bytes) => {
                rmp_serde::from_slice::<T>(&bytes).map_err(|e| Error::Serialization(e.to_string()))
            }
            other => Err(Error::Ipc(format!(
                "Unexpected {} response: {:?}",
                method.as_str(),
                other
            ))),
        }
    }

    /// Get the full authoritative status snapshot.
    pub async fn get_status(&mut self) -> Result<Status> {
        self.request_binary(Method::GetStatus, &[]).await
    }

    /// Get the connected displays with derived state.
    pub async fn get_displays(&mut self) -> Result<Vec<DisplayEntry>> {
        self.request_binary(Method::GetDisplays, &[]).await
    }

    /// Get the per-display settings map.
    pub async fn get_monitors(&mut self) -> Result<BTreeMap<DisplayId, MonitorStatus>> {
        self.request_binary(Method::GetMonitors, &[]).await
    }

    /// Flip the master dimming switch; returns the new position.
    pub async fn toggle(&mut self) -> Result<bool> {
        match self.request(Method::Toggle, &[]).await? {
            Value::Boolean(enabled) => Ok(enabled),
            other => Err(Error::Ipc(format!("Unexpected toggle response: {:?}", other))),
        }
    }

    /// Set the global default opacity.
    pub async fn set_opacity(&mut self, opacity: f64) -> Result<()> {
        self.request_ok(Method::SetOpacity, &[Value::F64(opacity)])
            .await
    }

    /// Set one display's opacity override.
    pub async fn set_monitor_opacity(&mut self, display: DisplayId, opacity: f64) -> Result<()> {
        self.request_ok(
            Method::SetMonitorOpacity,
            &[Value::from(display), Value::F64(opacity)],
        )
        .await
    }

    /// Enable or disable dimming for one display.
    pub async fn set_monitor_enabled(&mut self, display: DisplayId, enabled: bool) -> Result<()> {
        self.request_ok(
            Method::SetMonitorEnabled,
            &[Value::from(display), Value::Boolean(enabled)],
        )
        .await
    }

    /// Liveness probe; the `pong` arrives as a push message.
    pub async fn ping(&mut self) -> Result<()> {
        self.request_ok(Method::Ping, &[]).await
    }

    /// Send shutdown request to server (typed convenience method).
    pub async fn shutdown(&mut self) -> Result<()> {
        debug!("Sending shutdown request");
        self.request_ok(Method::Shutdown, &[]).await
    }

    /// Receive the next push message from the server.
    ///
    /// Keep polling this to avoid backpressure on the server's event
    /// forwarder; disconnects are detected when the channel closes.
    pub async fn recv_event(&mut self) -> Result<Msg> {
        self.event_rx
            .recv()
            .await
            .ok_or_else(|| Error::Ipc("Event channel closed".into()))
    }
}

/// Client-side connection handler for receiving push messages
#[derive(Clone)]
struct ClientHandler {
    event_tx: Arc<UnboundedSender<Msg>>,
}

#[async_trait]
impl MrpcConnection for ClientHandler {
    async fn connected(&self, _client: RpcSender) -> StdResult<(), RpcError> {
        trace!("Client handler connected");
        Ok(())
    }

    async fn handle_request(
        &self,
        _client: RpcSender,
        method: &str,
        _params: Vec<Value>,
    ) -> StdResult<Value, RpcError> {
        // Client doesn't handle requests from server
        error!("Unexpected request from server: {}", method);
        Err(RpcError::Service(mrpc::ServiceError {
            name: "not_implemented".into(),
            value: Value::String("Client doesn't handle requests".into()),
        }))
    }

    async fn handle_notification(
        &self,
        _client: RpcSender,
        method: &str,
        params: Vec<Value>,
    ) -> StdResult<(), RpcError> {
        trace!("Received notification: {}", method);

        if method == Notification::Notify.as_str() && !params.is_empty() {
            match codec::value_to_msg(params[0].clone()) {
                Ok(msg) => {
                    if let Err(err) = self.event_tx.send(msg) {
                        if self.event_tx.is_closed() {
                            debug!("Dropping notify: client event receiver already closed");
                        } else {
                            error!("Failed to send event to channel: {}", err);
                        }
                    }
                }
                Err(e) => {
                    error!("Failed to parse push message: {}, raw value: {:?}", e, params[0]);
                }
            }
        }

        Ok(())
    }
}
