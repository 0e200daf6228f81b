//! Heartbeat - periodic liveness counter for the process collector.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::ports::Metrics;

/// Scoped heartbeat task. Stop it with `stop().await`; it also ends when
/// the handle is dropped.
pub struct Heartbeat {
    stop_tx: watch::Sender<bool>,
    join: JoinHandle<u64>,
}

impl Heartbeat {
    pub fn spawn(interval: Duration, metrics: Arc<dyn Metrics>, name: impl Into<String>) -> Self {
        let name = name.into();
        let (stop_tx, mut stop_rx) = watch::channel(false);

        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut beats = 0u64;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        metrics.incr(&name, 1);
                        beats += 1;
                    }
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::debug!(beats, "heartbeat stopped");
            beats
        });

        Self { stop_tx, join }
    }

    /// Stop and return the number of beats emitted.
    pub async fn stop(self) -> u64 {
        let _ = self.stop_tx.send(true);
        self.join.await.unwrap_or(0)
    }
}
