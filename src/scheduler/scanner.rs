use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::ScannerConfig;
use crate::error::{FabricError, Result};
use crate::scheduler::dispatcher::Dispatcher;
use crate::store::TaskStore;

/// Outcome of one scan cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Rows locked by this cycle
    pub selected: usize,
    /// Rows forwarded and marked picked
    pub claimed: usize,
    /// Rows skipped because forwarding or marking failed
    pub failed: usize,
}

/// Lifts due rows out of the task store and forwards them to workers.
///
/// Each row is marked picked only after a worker accepted it, and the marks
/// become durable only when the cycle's transaction commits. A crash or a
/// failed commit leaves the rows claimable by the next cycle, so a task may
/// be dispatched twice but is never lost.
pub struct DatabaseScanner {
    store: Arc<dyn TaskStore>,
    dispatcher: Arc<Dispatcher>,
    interval: Duration,
    cycle_timeout: Duration,
    lookahead: Duration,
}

impl DatabaseScanner {
    pub fn new(
        store: Arc<dyn TaskStore>,
        dispatcher: Arc<Dispatcher>,
        config: &ScannerConfig,
    ) -> Self {
        Self {
            store,
            dispatcher,
            interval: config.scan_interval(),
            cycle_timeout: config.scan_timeout(),
            lookahead: config.lookahead(),
        }
    }

    /// Start one cycle per tick until `shutdown` fires. Cycles run on
    /// `tracker` and may overlap; skip-locked claims keep them apart.
    pub async fn run(self: Arc<Self>, tracker: TaskTracker, shutdown: CancellationToken) {
        let start = tokio::time::Instant::now() + self.interval;
        let mut ticker = tokio::time::interval_at(start, self.interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let scanner = self.clone();
                    let shutdown = shutdown.clone();
                    tracker.spawn(async move {
                        scanner.run_bounded_cycle(shutdown).await;
                    });
                }
                _ = shutdown.cancelled() => {
                    tracing::info!("Shutting down database scanner");
                    return;
                }
            }
        }
    }

    async fn run_bounded_cycle(&self, shutdown: CancellationToken) {
        tokio::select! {
            result = self.bounded_scan_cycle() => {
                match result {
                    Ok(report) if report.selected > 0 => {
                        tracing::info!(
                            selected = report.selected,
                            claimed = report.claimed,
                            failed = report.failed,
                            "Scan cycle finished"
                        );
                    }
                    Ok(_) => {}
                    Err(e @ FabricError::ScanTimeout { .. }) => {
                        tracing::warn!(error = %e, "Scan cycle rolled back")
                    }
                    Err(e) => tracing::error!(error = %e, "Scan cycle failed"),
                }
            }
            _ = shutdown.cancelled() => {
                tracing::debug!("Scan cycle abandoned on shutdown");
            }
        }
    }

    /// Run one cycle under the scan timeout. On expiry the cycle is dropped
    /// with its open transaction, which rolls back and releases the rows.
    pub async fn bounded_scan_cycle(&self) -> Result<ScanReport> {
        tokio::time::timeout(self.cycle_timeout, self.scan_cycle())
            .await
            .map_err(|_| FabricError::ScanTimeout {
                timeout_ms: self.cycle_timeout.as_millis() as u64,
            })?
    }

    /// Claim, forward, mark and commit every due row once. A cycle that
    /// claimed nothing rolls back instead of committing.
    pub async fn scan_cycle(&self) -> Result<ScanReport> {
        let mut batch = self.store.claim_due(self.lookahead).await?;
        let tasks = batch.tasks().to_vec();
        let mut report = ScanReport {
            selected: tasks.len(),
            ..ScanReport::default()
        };

        for task in &tasks {
            if let Err(e) = self.dispatcher.forward(task).await {
                tracing::warn!(task_id = %task.id, error = %e, "Failed to submit task");
                report.failed += 1;
                continue;
            }

            if let Err(e) = batch.mark_picked(&task.id).await {
                tracing::warn!(task_id = %task.id, error = %e, "Failed to mark task picked");
                report.failed += 1;
                continue;
            }
            report.claimed += 1;
        }

        if report.claimed == 0 {
            batch.rollback().await?;
            return Ok(report);
        }

        if let Err(e) = batch.commit().await {
            tracing::error!(error = %e, "Failed to commit scan cycle");
            return Err(e);
        }

        Ok(report)
    }
}
