//! IPC service implementation for the dimming engine.
//!
//! Read path
//! - The engine actor is authoritative for all dimming state. The service
//!   relays engine events to the push channel with snapshot-on-connect
//!   semantics: every new client receives one `initial_status` before any
//!   streamed message.
//!
//! # Locking Strategy
//!
//! - Prefer Tokio locks inside async paths. The `clients` list uses
//!   `tokio::sync::Mutex` to avoid mixing where we `await` soon after.
//! - Use short-lived sync locks only at the edges (e.g. `event_rx`), and
//!   release them before any `.await` or blocking work.
//! - Never hold any lock across network I/O; clone snapshots first.

use std::{
    collections::BTreeMap,
    result::Result as StdResult,
    slice,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, SystemTime},
};

use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use mrpc::{Connection as MrpcConnection, RpcError, RpcSender, ServiceError, Value};
use parking_lot::Mutex;
use tokio::sync::{
    Mutex as AsyncMutex,
    mpsc::Receiver,
};
use tracing::{debug, info, trace, warn};

use screen_ops::DisplayId;
use umbra_engine::{DisplayState, EngineEvent, EngineHandle, EngineStatus};
use umbra_protocol::{
    DisplayEntry, MonitorStatus, Msg, Status,
    ipc::{MsgTx, codec},
    rpc::{Method, Notification},
};

use crate::error::RpcErrorCode;

/// IPC service that handles dimming engine operations
#[derive(Clone)]
pub(crate) struct DimService {
    /// Handle to the engine actor.
    engine: EngineHandle,
    /// Event sender for push messages (bounded)
    event_tx: MsgTx,
    /// Event receiver (taken when starting the forwarder)
    event_rx: Arc<Mutex<Option<Receiver<Msg>>>>,
    /// Connected clients; use Tokio mutex to reduce sync/async mixing.
    clients: Arc<AsyncMutex<Vec<RpcSender>>>,
    /// When set to true, the outer server loop should exit.
    shutdown: Arc<AtomicBool>,
    /// Ensure we only spawn one heartbeat loop across clones.
    hb_running: Arc<AtomicBool>,
    /// Ensure we only spawn one engine-event forwarder across clones.
    forwarder_running: Arc<AtomicBool>,
}

impl DimService {
    /// Construct a typed `RpcError::Service` with a stable `name` and structured fields.
    fn typed_err(code: RpcErrorCode, fields: &[(&str, Value)]) -> RpcError {
        let map = fields
            .iter()
            .map(|(k, v)| (Value::String((*k).into()), v.clone()))
            .collect::<Vec<_>>();
        RpcError::Service(ServiceError {
            name: code.to_string(),
            value: Value::Map(map),
        })
    }

    pub(crate) fn new(engine: EngineHandle, shutdown: Arc<AtomicBool>) -> Self {
        let (event_tx, event_rx) = umbra_protocol::ipc::msg_channel();
        Self {
            engine,
            event_tx,
            event_rx: Arc::new(Mutex::new(Some(event_rx))),
            clients: Arc::new(AsyncMutex::new(Vec::new())),
            shutdown,
            hb_running: Arc::new(AtomicBool::new(false)),
            forwarder_running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Expose the shutdown flag for coordinated server shutdown.
    pub(crate) fn shutdown_flag(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    /// Forward push messages from the pipeline to all connected clients.
    async fn forward_events(&self, mut event_rx: Receiver<Msg>) {
        while let Some(msg) = event_rx.recv().await {
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }
            self.broadcast(msg).await;
        }
    }

    /// Start relaying engine events into the push pipeline.
    fn start_engine_forwarder(&self) {
        if self.forwarder_running.swap(true, Ordering::SeqCst) {
            return; // already running
        }
        let shutdown = self.shutdown.clone();
        let event_tx = self.event_tx.clone();
        let engine = self.engine.clone();
        tokio::spawn(async move {
            let mut cursor = engine.subscribe();
            loop {
                if shutdown.load(Ordering::SeqCst) {
                    break;
                }
                let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
                let event = match engine.next_event_until(&mut cursor, deadline).await {
                    Some(ev) => ev,
                    None => {
                        if cursor.is_closed() {
                            // Engine stopped on its own (overlay exhaustion);
                            // bring the server down with it.
                            warn!("engine event stream closed; requesting shutdown");
                            shutdown.store(true, Ordering::SeqCst);
                            break;
                        }
                        continue;
                    }
                };
                if cursor.lost_count > 0 {
                    trace!(lost = cursor.lost_count, "event stream lagging");
                }
                // A configuration change invalidates observers' display maps;
                // follow it with a full snapshot.
                let follow_up = if matches!(event, EngineEvent::ConfigurationChanged { .. }) {
                    engine.status().await.ok().map(proto_status)
                } else {
                    None
                };
                match event_tx.try_send(msg_from_event(event)) {
                    Ok(()) => {}
                    Err(tokio::sync::mpsc::error::TrySendError::Full(_)) => {
                        // Push delivery is best-effort; observers resync from
                        // snapshots.
                    }
                    Err(tokio::sync::mpsc::error::TrySendError::Closed(_)) => break,
                }
                if let Some(status) = follow_up {
                    // Same best-effort rules as above.
                    event_tx.try_send(Msg::StatusUpdate(status)).ok();
                }
            }
        });
    }

    /// Start a single heartbeat loop. The loop exits when shutdown is set.
    fn start_heartbeat(&self) {
        if self.hb_running.swap(true, Ordering::SeqCst) {
            return;
        }
        let svc = self.clone();
        tokio::spawn(async move {
            let interval = umbra_protocol::ipc::heartbeat::interval();
            loop {
                if svc.shutdown.load(Ordering::SeqCst) {
                    break;
                }
                let ts = SystemTime::now()
                    .duration_since(SystemTime::UNIX_EPOCH)
                    .map(|d| d.as_millis() as u64)
                    .unwrap_or(0);
                svc.broadcast(Msg::Heartbeat(ts)).await;
                tokio::time::sleep(interval).await;
            }
            svc.hb_running.store(false, Ordering::SeqCst);
        });
    }

    /// Broadcast a push message to all connected clients.
    async fn broadcast(&self, msg: Msg) {
        if self.shutdown.load(Ordering::SeqCst) {
            return;
        }
        // Clone the current client list for sending without holding the lock
        let clients_snapshot = { self.clients.lock().await.clone() };
        if clients_snapshot.is_empty() {
            return;
        }

        let value = match codec::msg_to_value(&msg) {
            Ok(v) => v,
            Err(e) => {
                warn!("Failed to encode push message: {}", e);
                return;
            }
        };

        // Send concurrently; retain only successful clients
        let mut survivors = Vec::with_capacity(clients_snapshot.len());
        let mut futs = FuturesUnordered::new();
        for client in clients_snapshot {
            let v = value.clone();
            futs.push(async move {
                (
                    client.clone(),
                    client
                        .send_notification(Notification::Notify.as_str(), slice::from_ref(&v))
                        .await,
                )
            });
        }
        while let Some((client, res)) = futs.next().await {
            match res {
                Ok(_) => survivors.push(client),
                Err(e) => warn!("Dropping disconnected client (send failed): {:?}", e),
            }
        }

        *self.clients.lock().await = survivors;
    }

    /// Send one push message to a single client.
    async fn send_to(&self, client: &RpcSender, msg: Msg) -> StdResult<(), RpcError> {
        let value = codec::msg_to_value(&msg).map_err(|e| {
            Self::typed_err(
                RpcErrorCode::InvalidType,
                &[("message", Value::String(e.to_string().into()))],
            )
        })?;
        client
            .send_notification(Notification::Notify.as_str(), slice::from_ref(&value))
            .await
            .map_err(|e| {
                Self::typed_err(
                    RpcErrorCode::SendFailed,
                    &[("message", Value::String(format!("{e:?}").into()))],
                )
            })
    }

    async fn status(&self) -> StdResult<Status, RpcError> {
        self.engine
            .status()
            .await
            .map(proto_status)
            .map_err(|e| engine_err(&e))
    }
}

#[async_trait]
impl MrpcConnection for DimService {
    async fn connected(&self, client: RpcSender) -> StdResult<(), RpcError> {
        if self.shutdown.load(Ordering::SeqCst) {
            // Refuse new connections during shutdown
            return Err(Self::typed_err(
                RpcErrorCode::ShuttingDown,
                &[("message", Value::String("Server is shutting down".into()))],
            ));
        }
        debug!("Client connected via MRPC");

        // Snapshot first, then join the broadcast list: every observer sees
        // `initial_status` before any streamed message.
        let status = self.status().await?;
        self.send_to(&client, Msg::InitialStatus(status)).await?;
        self.clients.lock().await.push(client);

        // Start event forwarding if not already started
        let event_rx = { self.event_rx.lock().take() };
        if let Some(event_rx) = event_rx {
            let service_clone = self.clone();
            tokio::spawn(async move {
                service_clone.forward_events(event_rx).await;
            });
        }
        self.start_engine_forwarder();
        self.start_heartbeat();

        // Bind the global log sink to the push pipeline. Logs are then
        // forwarded through the standard event path to all clients.
        logging::forward::set_sink(self.event_tx.clone());

        Ok(())
    }

    async fn handle_request(
        &self,
        client: RpcSender,
        method: &str,
        params: Vec<Value>,
    ) -> StdResult<Value, RpcError> {
        debug!("Handling request: {} with {} params", method, params.len());

        match Method::try_from_str(method) {
            Some(Method::GetStatus) => {
                let status = self.status().await?;
                encode_binary(&status)
            }

            Some(Method::GetDisplays) => {
                let displays: Vec<DisplayEntry> = self
                    .engine
                    .displays()
                    .await
                    .map_err(|e| engine_err(&e))?
                    .into_iter()
                    .map(proto_display)
                    .collect();
                encode_binary(&displays)
            }

            Some(Method::GetMonitors) => {
                let status = self.status().await?;
                let monitors: BTreeMap<DisplayId, MonitorStatus> = status.monitor_settings;
                encode_binary(&monitors)
            }

            Some(Method::Toggle) => {
                let enabled = self.engine.toggle().await.map_err(|e| engine_err(&e))?;
                info!(enabled, "dimming toggled via RPC");
                Ok(Value::Boolean(enabled))
            }

            Some(Method::SetOpacity) => {
                let opacity = opacity_param(&params, 0)?;
                self.engine
                    .set_opacity(opacity)
                    .await
                    .map_err(|e| engine_err(&e))?;
                Ok(Value::Boolean(true))
            }

            Some(Method::SetMonitorOpacity) => {
                let display = display_param(&params, 0)?;
                let opacity = opacity_param(&params, 1)?;
                self.engine
                    .set_monitor_opacity(display, opacity)
                    .await
                    .map_err(|e| engine_err(&e))?;
                Ok(Value::Boolean(true))
            }

            Some(Method::SetMonitorEnabled) => {
                let display = display_param(&params, 0)?;
                let enabled = bool_param(&params, 1)?;
                self.engine
                    .set_monitor_enabled(display, enabled)
                    .await
                    .map_err(|e| engine_err(&e))?;
                Ok(Value::Boolean(true))
            }

            Some(Method::Ping) => {
                // Heartbeat reply goes out on the push channel.
                self.send_to(&client, Msg::Pong).await?;
                Ok(Value::Boolean(true))
            }

            Some(Method::Shutdown) => {
                info!("Shutdown request received");
                // Flip shutdown flag (idempotent)
                self.shutdown.store(true, Ordering::SeqCst);

                // Stop forwarding any further logs to clients
                logging::forward::clear_sink();

                // Drop all clients so no further notifications are attempted
                self.clients.lock().await.clear();

                Ok(Value::Boolean(true))
            }

            None => Err(Self::typed_err(
                RpcErrorCode::MethodNotFound,
                &[("method", Value::String(method.into()))],
            )),
        }
    }

    async fn handle_notification(
        &self,
        _client: RpcSender,
        method: &str,
        _params: Vec<Value>,
    ) -> StdResult<(), RpcError> {
        trace!("Ignoring notification: {}", method);
        Ok(())
    }
}

/// Map an engine event onto the wire message observers receive.
fn msg_from_event(event: EngineEvent) -> Msg {
    match event {
        EngineEvent::EnabledChanged { enabled } => Msg::EnabledChanged { enabled },
        EngineEvent::OpacityChanged { opacity } => Msg::OpacityChanged { opacity },
        EngineEvent::MonitorOpacityChanged { display, opacity } => Msg::MonitorOpacityChanged {
            display_id: display,
            opacity,
        },
        EngineEvent::MonitorEnabledChanged { display, enabled } => Msg::MonitorEnabledChanged {
            display_id: display,
            enabled,
        },
        EngineEvent::FocusChanged { display } => Msg::FocusChanged {
            display_id: display,
        },
        EngineEvent::ConfigurationChanged { added, removed } => {
            Msg::ConfigurationChanged { added, removed }
        }
        EngineEvent::Error { message } => Msg::Error { message },
    }
}

fn proto_status(status: EngineStatus) -> Status {
    Status {
        enabled: status.enabled,
        opacity: status.opacity,
        focused_display: status.focused_display,
        monitor_settings: status
            .monitors
            .into_iter()
            .map(|(id, m)| {
                (
                    id,
                    MonitorStatus {
                        enabled: m.enabled,
                        opacity: m.opacity,
                        bounds: m.bounds,
                        is_focused: m.is_focused,
                        has_overlay: m.has_overlay,
                    },
                )
            })
            .collect(),
        permission_denied: status.permission_denied,
    }
}

fn proto_display(d: DisplayState) -> DisplayEntry {
    DisplayEntry {
        id: d.id,
        bounds: d.bounds,
        is_primary: d.is_primary,
        is_builtin: d.is_builtin,
        is_focused: d.is_focused,
        has_overlay: d.has_overlay,
    }
}

/// Map engine errors onto stable RPC error codes.
fn engine_err(err: &umbra_engine::Error) -> RpcError {
    let code = match err {
        umbra_engine::Error::UnknownDisplay(_) => RpcErrorCode::UnknownDisplay,
        umbra_engine::Error::InvalidOpacity(_) => RpcErrorCode::InvalidOpacity,
        umbra_engine::Error::Stopped => RpcErrorCode::ShuttingDown,
    };
    DimService::typed_err(code, &[("message", Value::String(err.to_string().into()))])
}

fn encode_binary<T: serde::Serialize>(value: &T) -> StdResult<Value, RpcError> {
    let bytes = rmp_serde::to_vec_named(value).map_err(|e| {
        DimService::typed_err(
            RpcErrorCode::InvalidType,
            &[("message", Value::String(e.to_string().into()))],
        )
    })?;
    Ok(Value::Binary(bytes))
}

fn param<'a>(params: &'a [Value], idx: usize) -> StdResult<&'a Value, RpcError> {
    params.get(idx).ok_or_else(|| {
        DimService::typed_err(
            RpcErrorCode::MissingParams,
            &[("expected", Value::String(format!("param {idx}").into()))],
        )
    })
}

/// Decode an opacity parameter and validate it at the API boundary: values
/// outside `[0.0, 1.0]` never reach the engine.
fn opacity_param(params: &[Value], idx: usize) -> StdResult<f64, RpcError> {
    let value = match param(params, idx)? {
        Value::F64(f) => *f,
        Value::F32(f) => f64::from(*f),
        Value::Integer(i) => i.as_f64().ok_or_else(|| {
            DimService::typed_err(
                RpcErrorCode::InvalidType,
                &[("expected", Value::String("number".into()))],
            )
        })?,
        _ => {
            return Err(DimService::typed_err(
                RpcErrorCode::InvalidType,
                &[("expected", Value::String("opacity number".into()))],
            ));
        }
    };
    if !value.is_finite() || !(0.0..=1.0).contains(&value) {
        return Err(DimService::typed_err(
            RpcErrorCode::InvalidOpacity,
            &[("opacity", Value::F64(value))],
        ));
    }
    Ok(value)
}

fn display_param(params: &[Value], idx: usize) -> StdResult<DisplayId, RpcError> {
    match param(params, idx)? {
        Value::Integer(i) => i
            .as_u64()
            .and_then(|v| DisplayId::try_from(v).ok())
            .ok_or_else(|| {
                DimService::typed_err(
                    RpcErrorCode::InvalidType,
                    &[("expected", Value::String("display id".into()))],
                )
            }),
        _ => Err(DimService::typed_err(
            RpcErrorCode::InvalidType,
            &[("expected", Value::String("display id integer".into()))],
        )),
    }
}

fn bool_param(params: &[Value], idx: usize) -> StdResult<bool, RpcError> {
    match param(params, idx)? {
        Value::Boolean(b) => Ok(*b),
        _ => Err(DimService::typed_err(
            RpcErrorCode::InvalidType,
            &[("expected", Value::String("boolean".into()))],
        )),
    }
}
