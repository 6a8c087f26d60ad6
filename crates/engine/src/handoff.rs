//! Background task draining the hinted-handoff map.
//!
//! Every tick, hints whose target node is alive again are replayed into the
//! data map and removed; hints for still-dead targets stay put for the next
//! tick. Each tick is its own attempt — no retry storms.

use crate::engine::KvEngine;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{interval, Duration};

/// Default drain interval.
pub const DEFAULT_HANDOFF_INTERVAL: Duration = Duration::from_secs(5);

/// Spawn the periodic drain task. Returns the task's `JoinHandle`.
pub fn spawn_handoff_drainer(
    engine: Arc<Mutex<KvEngine>>,
    handoff_interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = interval(handoff_interval);
        loop {
            timer.tick().await;
            let delivered = {
                let mut engine = engine.lock().await;
                if engine.pending_hints() == 0 {
                    continue;
                }
                engine.drain_hints()
            };
            if delivered > 0 {
                tracing::info!("replayed {} hint(s) this cycle", delivered);
            }
        }
    })
}
