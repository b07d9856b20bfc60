use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tonic::Request;

use crate::config::DispatchConfig;
use crate::error::{FabricError, Result};
use crate::pool::{WorkerHandle, WorkerId, WorkerPool};
use crate::scheduler::queue::TaskQueue;
use crate::scheduler::task::Task;

/// Cap on the doubling of the retry backoff, as a power of two.
const MAX_BACKOFF_SHIFT: u32 = 6;

/// Moves tasks from the queue to workers.
///
/// Delivery is at-least-once: a task leaves the queue before it is forwarded
/// and goes back in after every failed attempt, so it is never in flight to
/// two workers from the same queue entry. A failed task waits out a backoff
/// that doubles with each attempt before it is requeued.
pub struct Dispatcher {
    queue: Arc<TaskQueue>,
    pool: Arc<WorkerPool>,
    tracker: TaskTracker,
    retry_backoff: Duration,
    forward_timeout: Duration,
    max_attempts: Option<u32>,
    dead_letters: Arc<Mutex<Vec<Task>>>,
}

impl Dispatcher {
    pub fn new(
        queue: Arc<TaskQueue>,
        pool: Arc<WorkerPool>,
        tracker: TaskTracker,
        config: &DispatchConfig,
    ) -> Self {
        Self {
            queue,
            pool,
            tracker,
            retry_backoff: config.retry_backoff(),
            forward_timeout: config.forward_timeout(),
            max_attempts: config.max_dispatch_attempts,
            dead_letters: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Drain the queue until `shutdown` fires.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        tracing::info!("Dispatcher started");

        loop {
            let task = match self.queue.dequeue().await {
                Ok(task) => task,
                Err(_) => break,
            };

            let worker = match self.pool.select_worker().await {
                Some(worker) => worker,
                None => {
                    tracing::debug!(task_id = %task.id, "No available workers, re-queueing task");
                    self.queue.requeue(task).await;
                    tokio::select! {
                        _ = tokio::time::sleep(self.retry_backoff) => {}
                        _ = shutdown.cancelled() => break,
                    }
                    continue;
                }
            };

            let dispatcher = self.clone();
            let shutdown = shutdown.clone();
            self.tracker.spawn(async move {
                if let Err(e) = dispatcher.send_to(&worker, &task).await {
                    tracing::warn!(
                        task_id = %task.id,
                        worker_id = worker.id(),
                        error = %e,
                        "Failed to assign task to worker"
                    );
                    dispatcher.retry(task, shutdown).await;
                }
            });
        }

        tracing::info!("Dispatcher stopped");
    }

    /// Select a healthy worker and hand it `task`. Used by paths that bypass
    /// the queue; the caller owns any retry.
    pub async fn forward(&self, task: &Task) -> Result<WorkerId> {
        let worker = self
            .pool
            .select_worker()
            .await
            .ok_or(FabricError::NoWorkersAvailable)?;
        self.send_to(&worker, task).await?;
        Ok(worker.id())
    }

    /// Tasks that exhausted their retry budget.
    pub async fn dead_letters(&self) -> Vec<Task> {
        self.dead_letters.lock().await.clone()
    }

    async fn send_to(&self, worker: &WorkerHandle, task: &Task) -> Result<()> {
        let mut client = worker.client();
        let mut request = Request::new(task.to_proto());
        request.set_timeout(self.forward_timeout);

        let response = tokio::time::timeout(self.forward_timeout, client.submit_task(request))
            .await
            .map_err(|_| FabricError::ForwardTimeout {
                task_id: task.id.clone(),
                worker_id: worker.id(),
            })??
            .into_inner();

        if !response.success {
            return Err(FabricError::WorkerRejected {
                task_id: task.id.clone(),
                worker_id: worker.id(),
                message: response.message,
            });
        }

        tracing::info!(task_id = %task.id, worker_id = worker.id(), "Task assigned");
        Ok(())
    }

    /// Pause before the next forward of a task that failed `attempts` times.
    pub fn retry_delay(&self, attempts: u32) -> Duration {
        let shift = attempts.saturating_sub(1).min(MAX_BACKOFF_SHIFT);
        self.retry_backoff.saturating_mul(1 << shift)
    }

    async fn retry(&self, mut task: Task, shutdown: CancellationToken) {
        task.attempts += 1;
        if let Some(max) = self.max_attempts {
            if task.attempts >= max {
                tracing::error!(
                    task_id = %task.id,
                    attempts = task.attempts,
                    "Task exhausted dispatch attempts, moving to dead letters"
                );
                self.dead_letters.lock().await.push(task);
                return;
            }
        }

        // Shutdown cuts the wait short; the requeue keeps the task visible.
        tokio::select! {
            _ = tokio::time::sleep(self.retry_delay(task.attempts)) => {}
            _ = shutdown.cancelled() => {}
        }
        self.queue.requeue(task).await;
    }
}
