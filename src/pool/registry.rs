use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use tonic::transport::{Channel, Endpoint};

use crate::error::{FabricError, Result};
use crate::proto::worker_service_client::WorkerServiceClient;

pub type WorkerId = u32;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// A registered worker and its outbound connection.
#[derive(Debug)]
pub struct WorkerHandle {
    id: WorkerId,
    address: String,
    client: WorkerServiceClient<Channel>,
    heartbeat_misses: AtomicU32,
}

impl WorkerHandle {
    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Clone of the worker's client. Clones share the underlying channel.
    pub fn client(&self) -> WorkerServiceClient<Channel> {
        self.client.clone()
    }

    pub fn heartbeat_misses(&self) -> u32 {
        self.heartbeat_misses.load(Ordering::Acquire)
    }

    /// A worker is healthy until the first sweep that saw no heartbeat.
    pub fn is_healthy(&self) -> bool {
        self.heartbeat_misses() == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatOutcome {
    Registered,
    Refreshed,
}

/// In-memory table of known workers.
///
/// Membership changes go through `workers` (a mutex). Selection reads a
/// separate snapshot behind its own `RwLock`, republished after every
/// membership change, so readers never see a half-built list. Lock order is
/// always `workers` then `snapshot`.
#[derive(Debug)]
pub struct WorkerPool {
    workers: Mutex<HashMap<WorkerId, Arc<WorkerHandle>>>,
    snapshot: RwLock<Vec<Arc<WorkerHandle>>>,
    round_robin: AtomicUsize,
    max_heartbeat_misses: u32,
    closed: AtomicBool,
}

impl WorkerPool {
    pub fn new(max_heartbeat_misses: u32) -> Self {
        Self {
            workers: Mutex::new(HashMap::new()),
            snapshot: RwLock::new(Vec::new()),
            round_robin: AtomicUsize::new(0),
            max_heartbeat_misses,
            closed: AtomicBool::new(false),
        }
    }

    pub fn max_heartbeat_misses(&self) -> u32 {
        self.max_heartbeat_misses
    }

    /// Record a heartbeat, registering the worker on first contact.
    pub async fn heartbeat(&self, worker_id: WorkerId, address: &str) -> Result<HeartbeatOutcome> {
        let mut workers = self.workers.lock().await;

        if let Some(worker) = workers.get(&worker_id) {
            worker.heartbeat_misses.store(0, Ordering::Release);
            tracing::trace!(worker_id, "Heartbeat received");
            return Ok(HeartbeatOutcome::Refreshed);
        }

        self.ensure_open()?;
        let handle = Self::connect(worker_id, address)?;
        workers.insert(worker_id, handle);
        self.publish(&workers).await;
        tracing::info!(worker_id, address, "Worker registered");
        Ok(HeartbeatOutcome::Registered)
    }

    /// Register a worker explicitly, replacing any previous connection for the id.
    pub async fn register(&self, worker_id: WorkerId, address: &str) -> Result<()> {
        let handle = Self::connect(worker_id, address)?;
        let mut workers = self.workers.lock().await;
        self.ensure_open()?;
        if workers.insert(worker_id, handle).is_some() {
            tracing::info!(worker_id, address, "Worker re-registered");
        } else {
            tracing::info!(worker_id, address, "Worker registered");
        }
        self.publish(&workers).await;
        Ok(())
    }

    /// Age every worker by one sweep, evicting those past the miss limit.
    /// Returns the evicted ids.
    pub async fn sweep_and_evict(&self) -> Vec<WorkerId> {
        let mut workers = self.workers.lock().await;
        let mut evicted = Vec::new();

        workers.retain(|&worker_id, worker| {
            let misses = worker.heartbeat_misses();
            if misses > self.max_heartbeat_misses {
                tracing::warn!(worker_id, misses, "Removing inactive worker");
                evicted.push(worker_id);
                false
            } else {
                worker.heartbeat_misses.store(misses + 1, Ordering::Release);
                true
            }
        });

        if !evicted.is_empty() {
            self.publish(&workers).await;
        }
        evicted
    }

    /// Round-robin over the workers that are currently healthy.
    pub async fn select_worker(&self) -> Option<Arc<WorkerHandle>> {
        let snapshot = self.snapshot.read().await;
        let healthy: Vec<&Arc<WorkerHandle>> =
            snapshot.iter().filter(|w| w.is_healthy()).collect();
        if healthy.is_empty() {
            return None;
        }
        let index = self.round_robin.fetch_add(1, Ordering::Relaxed);
        Some(healthy[index % healthy.len()].clone())
    }

    /// Ids of workers that `select_worker` may currently return, sorted.
    pub async fn eligible_workers(&self) -> Vec<WorkerId> {
        self.snapshot
            .read()
            .await
            .iter()
            .filter(|w| w.is_healthy())
            .map(|w| w.id)
            .collect()
    }

    /// Ids of every registered worker, sorted.
    pub async fn registered_workers(&self) -> Vec<WorkerId> {
        self.snapshot.read().await.iter().map(|w| w.id).collect()
    }

    pub async fn misses(&self, worker_id: WorkerId) -> Option<u32> {
        self.workers
            .lock()
            .await
            .get(&worker_id)
            .map(|w| w.heartbeat_misses())
    }

    pub async fn len(&self) -> usize {
        self.workers.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drop every worker connection and refuse new registrations. Used on
    /// shutdown.
    pub async fn close_all(&self) {
        let mut workers = self.workers.lock().await;
        self.closed.store(true, Ordering::Release);
        let count = workers.len();
        workers.clear();
        self.publish(&workers).await;
        tracing::info!(count, "Closed worker connections");
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(FabricError::InvalidState("worker pool is closed".to_string()));
        }
        Ok(())
    }

    async fn publish(&self, workers: &HashMap<WorkerId, Arc<WorkerHandle>>) {
        let mut list: Vec<Arc<WorkerHandle>> = workers.values().cloned().collect();
        list.sort_by_key(|w| w.id);
        *self.snapshot.write().await = list;
    }

    fn connect(worker_id: WorkerId, address: &str) -> Result<Arc<WorkerHandle>> {
        let uri = if address.starts_with("http://") || address.starts_with("https://") {
            address.to_string()
        } else {
            format!("http://{}", address)
        };
        let channel = Endpoint::from_shared(uri)?
            .connect_timeout(CONNECT_TIMEOUT)
            .connect_lazy();

        Ok(Arc::new(WorkerHandle {
            id: worker_id,
            address: address.to_string(),
            client: WorkerServiceClient::new(channel),
            heartbeat_misses: AtomicU32::new(0),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_heartbeat_registers_then_refreshes() {
        let pool = WorkerPool::new(1);
        assert_eq!(
            pool.heartbeat(1, "127.0.0.1:7001").await.unwrap(),
            HeartbeatOutcome::Registered
        );
        assert_eq!(
            pool.heartbeat(1, "127.0.0.1:7001").await.unwrap(),
            HeartbeatOutcome::Refreshed
        );
        assert_eq!(pool.len().await, 1);
        assert_eq!(pool.registered_workers().await, vec![1]);
    }

    #[tokio::test]
    async fn invalid_address_fails_registration() {
        let pool = WorkerPool::new(1);
        assert!(pool.heartbeat(9, "not a uri").await.is_err());
        assert!(pool.is_empty().await);
    }

    #[tokio::test]
    async fn heartbeat_resets_miss_counter() {
        let pool = WorkerPool::new(3);
        pool.heartbeat(1, "127.0.0.1:7001").await.unwrap();
        pool.sweep_and_evict().await;
        pool.sweep_and_evict().await;
        assert_eq!(pool.misses(1).await, Some(2));

        pool.heartbeat(1, "127.0.0.1:7001").await.unwrap();
        assert_eq!(pool.misses(1).await, Some(0));
    }

    #[tokio::test]
    async fn select_skips_unhealthy_workers() {
        let pool = WorkerPool::new(5);
        pool.heartbeat(1, "127.0.0.1:7001").await.unwrap();
        pool.sweep_and_evict().await;
        pool.heartbeat(2, "127.0.0.1:7002").await.unwrap();

        for _ in 0..4 {
            assert_eq!(pool.select_worker().await.unwrap().id(), 2);
        }
        assert_eq!(pool.eligible_workers().await, vec![2]);
        assert_eq!(pool.registered_workers().await, vec![1, 2]);
    }

    #[tokio::test]
    async fn close_all_empties_pool() {
        let pool = WorkerPool::new(1);
        pool.heartbeat(1, "127.0.0.1:7001").await.unwrap();
        pool.heartbeat(2, "127.0.0.1:7002").await.unwrap();
        pool.close_all().await;
        assert!(pool.is_empty().await);
        assert!(pool.select_worker().await.is_none());
        assert!(pool.heartbeat(3, "127.0.0.1:7003").await.is_err());
    }
}
