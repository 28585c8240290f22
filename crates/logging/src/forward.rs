//! Forward tracing events to connected observers.
//!
//! A small tracing [`Layer`] that relays log events over the umbra protocol
//! when a sink is set. The server binds the sink to its push pipeline so
//! observers can stream server logs.
//!
//! Usage:
//! - Call [`set_sink`] with the push-channel sender when a client connects.
//! - Install the [`layer`] in your tracing subscriber. When a sink is
//!   present, events are forwarded as `Msg::Log { level, target, message }`.
//! - Call [`clear_sink`] when shutting the pipeline down.
//!
//! The layer is lightweight and no-ops when no sink is set.

use std::sync::{
    OnceLock,
    atomic::{AtomicU64, Ordering},
};

use parking_lot::Mutex;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer};
use umbra_protocol::{Msg, ipc::MsgTx};

use crate::fmt;

/// A global sink that, when present, forwards server logs to observers.
static LOG_SINK: OnceLock<Mutex<Option<MsgTx>>> = OnceLock::new();

/// Count of log events dropped due to a full push pipeline.
static LOG_DROPS: OnceLock<AtomicU64> = OnceLock::new();

/// Access the global sink.
fn sink() -> &'static Mutex<Option<MsgTx>> {
    LOG_SINK.get_or_init(|| Mutex::new(None))
}

/// Set the forwarding sink (called when a client connects).
pub fn set_sink(tx: MsgTx) {
    let mut guard = sink().lock();
    *guard = Some(tx);
}

/// Clear the forwarding sink (called on shutdown).
pub fn clear_sink() {
    let mut guard = sink().lock();
    *guard = None;
}

/// Tracing layer that forwards events to observers when a sink is set.
pub struct ForwardLayer;

impl<S> Layer<S> for ForwardLayer
where
    S: Subscriber,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        // Early-exit if there is no sink set
        let tx_opt = { sink().lock().clone() };
        let Some(tx) = tx_opt else { return };

        let r = fmt::render_event(event);
        match tx.try_send(Msg::Log {
            level: r.level,
            target: r.target,
            message: r.message,
        }) {
            Ok(()) => {}
            Err(TrySendError::Closed(_)) => {
                // Sink disappeared; clear to avoid repeated work.
                clear_sink();
            }
            Err(TrySendError::Full(_)) => {
                let ctr = LOG_DROPS.get_or_init(|| AtomicU64::new(0));
                let n = ctr.fetch_add(1, Ordering::SeqCst) + 1;
                if n == 1 || n.is_multiple_of(1000) {
                    // Throttled to avoid log storms in the pipeline itself.
                    tracing::debug!(count = n, "observer_log_drop");
                }
            }
        }
    }
}

/// Create the forwarding layer instance to add to your subscriber.
pub fn layer() -> ForwardLayer {
    ForwardLayer
}
