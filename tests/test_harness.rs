//! Shared helpers for coordinator integration tests.
//!
//! Workers are real tonic servers bound to ephemeral ports, so dispatch goes
//! over the wire exactly as in production.

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use task_fabric::config::DispatchConfig;
use task_fabric::pool::WorkerPool;
use task_fabric::scheduler::{Dispatcher, Task, TaskQueue};
use task_fabric::worker;

/// Dispatch settings with short timings for tests
pub fn fast_dispatch_config() -> DispatchConfig {
    DispatchConfig {
        queue_capacity: 100,
        retry_backoff_ms: 10,
        forward_timeout_ms: 1_000,
        max_dispatch_attempts: None,
    }
}

/// A worker endpoint running in the test process
pub struct TestWorker {
    pub id: u32,
    pub addr: SocketAddr,
    pub tasks: mpsc::Receiver<Task>,
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

impl TestWorker {
    /// Start a worker endpoint that accepts every task.
    pub async fn spawn(id: u32) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (task_tx, tasks) = mpsc::channel(64);
        let shutdown = CancellationToken::new();

        let token = shutdown.clone();
        let handle = tokio::spawn(async move {
            let _ = worker::serve(listener, id, task_tx, token).await;
        });

        Self {
            id,
            addr,
            tasks,
            shutdown,
            handle,
        }
    }

    /// Start a worker endpoint whose executor is gone, so it rejects every task.
    pub async fn spawn_rejecting(id: u32) -> Self {
        let mut worker = Self::spawn(id).await;
        worker.tasks.close();
        worker
    }

    pub fn address(&self) -> String {
        self.addr.to_string()
    }

    /// Wait for the next task delivered to this worker.
    pub async fn next_task(&mut self, timeout_duration: Duration) -> Option<Task> {
        tokio::time::timeout(timeout_duration, self.tasks.recv())
            .await
            .ok()
            .flatten()
    }

    /// Drain everything delivered so far without waiting.
    pub fn drain(&mut self) -> Vec<Task> {
        let mut received = Vec::new();
        while let Ok(task) = self.tasks.try_recv() {
            received.push(task);
        }
        received
    }
}

impl Drop for TestWorker {
    fn drop(&mut self) {
        self.shutdown.cancel();
        self.handle.abort();
    }
}

/// An address nothing is listening on.
pub async fn unreachable_address() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr.to_string()
}

/// A TCP endpoint that accepts connections and never answers, so forwards
/// to it hang until their timeout.
pub struct SilentEndpoint {
    pub addr: SocketAddr,
    handle: JoinHandle<()>,
}

impl SilentEndpoint {
    pub async fn spawn() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });
        Self { addr, handle }
    }

    pub fn address(&self) -> String {
        self.addr.to_string()
    }
}

impl Drop for SilentEndpoint {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Queue, pool and dispatcher wired together, with the dispatcher loop running
pub struct DispatchFixture {
    pub queue: Arc<TaskQueue>,
    pub pool: Arc<WorkerPool>,
    pub dispatcher: Arc<Dispatcher>,
    pub tracker: TaskTracker,
    pub shutdown: CancellationToken,
}

impl DispatchFixture {
    pub fn start(config: DispatchConfig, max_heartbeat_misses: u32) -> Self {
        let shutdown = CancellationToken::new();
        let queue = Arc::new(TaskQueue::with_capacity(
            config.queue_capacity,
            shutdown.clone(),
        ));
        let pool = Arc::new(WorkerPool::new(max_heartbeat_misses));
        let tracker = TaskTracker::new();
        let dispatcher = Arc::new(Dispatcher::new(
            queue.clone(),
            pool.clone(),
            tracker.clone(),
            &config,
        ));
        tracker.spawn(dispatcher.clone().run(shutdown.clone()));

        Self {
            queue,
            pool,
            dispatcher,
            tracker,
            shutdown,
        }
    }

    pub async fn stop(self) {
        self.shutdown.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }
}

/// Wait for a condition to become true with timeout
pub async fn wait_for<F, Fut>(
    condition: F,
    timeout_duration: Duration,
    poll_interval: Duration,
) -> bool
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = tokio::time::Instant::now();
    while start.elapsed() < timeout_duration {
        if condition().await {
            return true;
        }
        tokio::time::sleep(poll_interval).await;
    }
    false
}

/// Assert a condition eventually becomes true
pub async fn assert_eventually<F, Fut>(condition: F, timeout_duration: Duration, message: &str)
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let result = wait_for(condition, timeout_duration, Duration::from_millis(20)).await;
    assert!(result, "{}", message);
}
