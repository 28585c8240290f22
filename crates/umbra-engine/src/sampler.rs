//! Focus sampling and hot-plug polling loop.
//!
//! One task drives both cadences: every tick samples focus, and every
//! `hotplug_every`-th tick re-enumerates displays first, so a just-removed
//! display cannot win the resolution that follows. OS calls run on blocking
//! threads under a timeout; a stalled query (permission dialog) degrades to
//! an `Unknown` sample instead of stalling the actor or the API.

use std::{sync::Arc, time::Duration};

use tokio::{
    sync::mpsc,
    task,
    time::{self, MissedTickBehavior, timeout},
};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use screen_ops::{Sample, ops::ScreenOps};

use crate::{EngineCfg, reconcile::Command};

pub(crate) async fn run_sampler(
    ops: Arc<dyn ScreenOps>,
    tx: mpsc::UnboundedSender<Command>,
    cfg: EngineCfg,
    cancel: CancellationToken,
) {
    let mut ticker = time::interval(Duration::from_millis(cfg.poll_ms.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut tick: u64 = 0;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }
        tick += 1;

        if cfg.hotplug_every > 0 && tick % u64::from(cfg.hotplug_every) == 0 {
            let ops_for_enum = ops.clone();
            match task::spawn_blocking(move || ops_for_enum.enumerate_displays()).await {
                Ok(Ok(displays)) => {
                    if tx.send(Command::SyncDisplays(displays)).is_err() {
                        return;
                    }
                }
                // Transient enumeration failure is "no change", never
                // "all displays disconnected".
                Ok(Err(e)) => warn!("display enumeration failed: {e}"),
                Err(e) => warn!("display enumeration task failed: {e}"),
            }
        }

        let ops_for_sample = ops.clone();
        let sample = match timeout(
            Duration::from_millis(cfg.sample_timeout_ms),
            task::spawn_blocking(move || ops_for_sample.sample_focus()),
        )
        .await
        {
            Ok(Ok(sample)) => sample,
            Ok(Err(e)) => {
                warn!("focus sample task failed: {e}");
                Sample::Unknown
            }
            Err(_) => {
                warn!("focus sample timed out after {}ms", cfg.sample_timeout_ms);
                Sample::Unknown
            }
        };
        if tx.send(Command::Sample(sample)).is_err() {
            return;
        }
    }
}
