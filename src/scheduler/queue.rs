use std::cmp::Ordering;
use std::collections::BinaryHeap;

use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;

use crate::error::{FabricError, Result};
use crate::scheduler::task::Task;

const DEFAULT_CAPACITY: usize = 100;

/// Heap entry. Lower priority value wins, then earlier insertion.
#[derive(Debug)]
struct QueuedTask {
    seq: u64,
    task: Task,
}

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.task.priority == other.task.priority && self.seq == other.seq
    }
}

impl Eq for QueuedTask {}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedTask {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap, so invert both keys.
        other
            .task
            .priority
            .cmp(&self.task.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Debug, Default)]
struct QueueState {
    heap: BinaryHeap<QueuedTask>,
    next_seq: u64,
}

impl QueueState {
    fn push(&mut self, task: Task) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(QueuedTask { seq, task });
    }
}

/// Bounded priority queue shared by every enqueue and dequeue path.
///
/// `enqueue` blocks while the queue is full; `dequeue` blocks while it is
/// empty. Both return [`FabricError::QueueClosed`] once the shutdown token
/// fires.
#[derive(Debug)]
pub struct TaskQueue {
    state: Mutex<QueueState>,
    capacity: usize,
    not_empty: Notify,
    not_full: Notify,
    shutdown: CancellationToken,
}

impl TaskQueue {
    pub fn new(shutdown: CancellationToken) -> Self {
        Self::with_capacity(DEFAULT_CAPACITY, shutdown)
    }

    pub fn with_capacity(capacity: usize, shutdown: CancellationToken) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            capacity: capacity.max(1),
            not_empty: Notify::new(),
            not_full: Notify::new(),
            shutdown,
        }
    }

    /// Insert a task, waiting for space if the queue is at capacity.
    pub async fn enqueue(&self, task: Task) -> Result<()> {
        loop {
            if self.shutdown.is_cancelled() {
                return Err(FabricError::QueueClosed);
            }

            let notified = self.not_full.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock().await;
                if state.heap.len() < self.capacity {
                    tracing::debug!(task_id = %task.id, priority = task.priority, "Task enqueued");
                    state.push(task);
                    drop(state);
                    self.not_empty.notify_one();
                    return Ok(());
                }
            }

            tracing::debug!(task_id = %task.id, capacity = self.capacity, "Task queue full, waiting");
            tokio::select! {
                _ = &mut notified => {}
                _ = self.shutdown.cancelled() => return Err(FabricError::QueueClosed),
            }
        }
    }

    /// Put back a task that was dequeued earlier. Never blocks, and may
    /// exceed capacity by the number of tasks currently in flight.
    pub async fn requeue(&self, task: Task) {
        self.state.lock().await.push(task);
        self.not_empty.notify_one();
    }

    /// Wait for the highest priority task.
    pub async fn dequeue(&self) -> Result<Task> {
        loop {
            if self.shutdown.is_cancelled() {
                return Err(FabricError::QueueClosed);
            }

            let notified = self.not_empty.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(task) = self.try_dequeue().await {
                return Ok(task);
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = self.shutdown.cancelled() => return Err(FabricError::QueueClosed),
            }
        }
    }

    /// Pop the highest priority task without waiting.
    pub async fn try_dequeue(&self) -> Option<Task> {
        let task = self.state.lock().await.heap.pop().map(|entry| entry.task);
        if task.is_some() {
            self.not_full.notify_one();
        }
        task
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.heap.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}
