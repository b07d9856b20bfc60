use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::pool::registry::WorkerPool;

/// Periodically ages out workers that stopped sending heartbeats.
pub struct HeartbeatMonitor {
    pool: Arc<WorkerPool>,
    sweep_interval: Duration,
}

impl HeartbeatMonitor {
    pub fn new(pool: Arc<WorkerPool>, sweep_interval: Duration) -> Self {
        Self {
            pool,
            sweep_interval,
        }
    }

    /// Sweep on every interval until `shutdown` fires. The first sweep
    /// happens one full interval after start.
    pub async fn run(self, shutdown: CancellationToken) {
        let start = tokio::time::Instant::now() + self.sweep_interval;
        let mut interval = tokio::time::interval_at(start, self.sweep_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let evicted = self.pool.sweep_and_evict().await;
                    if !evicted.is_empty() {
                        tracing::info!(evicted = ?evicted, "Evicted inactive workers");
                    }
                }
                _ = shutdown.cancelled() => {
                    tracing::info!("Shutting down heartbeat monitor");
                    return;
                }
            }
        }
    }
}
