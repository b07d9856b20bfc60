//! End-to-end tests for the coordinator lifecycle.
//!
//! A coordinator runs on an ephemeral port with the in-memory store, and
//! test workers register over gRPC exactly as real workers do.

mod test_harness;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tonic::transport::Channel;

use task_fabric::config::{CoordinatorConfig, PoolConfig, ScannerConfig};
use task_fabric::coordinator::{Coordinator, LifecycleState};
use task_fabric::error::FabricError;
use task_fabric::proto::coordinator_service_client::CoordinatorServiceClient;
use task_fabric::proto::{
    ClientTaskRequest, HeartbeatRequest, ScheduleTaskRequest, TaskStatus, UpdateTaskStatusRequest,
};
use task_fabric::store::{MemoryTaskStore, TaskStore};
use task_fabric::worker::HeartbeatSender;
use test_harness::{assert_eventually, fast_dispatch_config, TestWorker};

fn test_config() -> CoordinatorConfig {
    CoordinatorConfig::new("127.0.0.1:0".parse().unwrap())
        .with_pool(PoolConfig {
            heartbeat_interval_ms: 50,
            max_heartbeat_misses: 3,
            sweep_interval_ms: 200,
        })
        .with_dispatch(fast_dispatch_config())
        .with_scanner(ScannerConfig {
            enabled: true,
            scan_interval_ms: 50,
            scan_timeout_ms: 2_000,
            lookahead_secs: 30,
        })
}

async fn connect(addr: SocketAddr) -> CoordinatorServiceClient<Channel> {
    CoordinatorServiceClient::connect(format!("http://{}", addr))
        .await
        .unwrap()
}

#[tokio::test]
async fn test_start_and_stop_transitions() {
    let mut coordinator =
        Coordinator::with_store(test_config(), Arc::new(MemoryTaskStore::new()));
    assert_eq!(coordinator.state(), LifecycleState::Created);
    assert!(coordinator.local_addr().is_none());

    let addr = coordinator.start().await.unwrap();
    assert_eq!(coordinator.state(), LifecycleState::Running);
    assert_eq!(coordinator.local_addr(), Some(addr));
    assert_ne!(addr.port(), 0);

    let second = coordinator.start().await;
    assert!(matches!(second, Err(FabricError::InvalidState(_))));

    tokio::time::timeout(Duration::from_secs(5), coordinator.stop())
        .await
        .expect("Stop should finish")
        .unwrap();
    assert_eq!(coordinator.state(), LifecycleState::Stopped);
    assert!(coordinator.queue().is_closed());

    // Stopping twice is harmless
    coordinator.stop().await.unwrap();
    assert_eq!(coordinator.state(), LifecycleState::Stopped);
}

#[tokio::test]
async fn test_stop_before_start() {
    let mut coordinator = Coordinator::new(test_config());
    coordinator.stop().await.unwrap();
    assert_eq!(coordinator.state(), LifecycleState::Stopped);
    assert!(coordinator.start().await.is_err());
}

#[tokio::test]
async fn test_without_database_url_uses_memory_store() {
    let mut coordinator = Coordinator::new(test_config());
    coordinator.start().await.unwrap();
    assert!(coordinator.store().is_some());
    coordinator.stop().await.unwrap();
}

#[tokio::test]
async fn test_bind_failure_is_fatal() {
    let occupied = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = occupied.local_addr().unwrap();

    let mut config = test_config();
    config.listen_addr = addr;
    let mut coordinator = Coordinator::with_store(config, Arc::new(MemoryTaskStore::new()));

    assert!(coordinator.start().await.is_err());
    assert_eq!(coordinator.state(), LifecycleState::Created);
}

#[tokio::test]
async fn test_sweep_shorter_than_heartbeat_interval_is_rejected() {
    let config = test_config().with_pool(PoolConfig {
        heartbeat_interval_ms: 500,
        max_heartbeat_misses: 1,
        sweep_interval_ms: 100,
    });
    let mut coordinator = Coordinator::with_store(config, Arc::new(MemoryTaskStore::new()));

    let result = coordinator.start().await;
    assert!(matches!(result, Err(FabricError::InvalidConfig(_))));
    assert_eq!(coordinator.state(), LifecycleState::Created);
    assert!(coordinator.local_addr().is_none());
}

#[tokio::test]
async fn test_stop_releases_listener() {
    let mut coordinator =
        Coordinator::with_store(test_config(), Arc::new(MemoryTaskStore::new()));
    let addr = coordinator.start().await.unwrap();
    coordinator.stop().await.unwrap();

    TcpListener::bind(addr)
        .await
        .expect("Listener should be released after stop");
}

#[tokio::test]
async fn test_submitted_and_scheduled_tasks_reach_worker() {
    let store = MemoryTaskStore::new();
    let mut coordinator = Coordinator::with_store(test_config(), Arc::new(store.clone()));
    let addr = coordinator.start().await.unwrap();
    let mut client = connect(addr).await;

    let mut worker = TestWorker::spawn(1).await;
    let heartbeat_shutdown = CancellationToken::new();
    let sender = HeartbeatSender::new(1, worker.address(), 50);
    let heartbeat_client = client.clone();
    let token = heartbeat_shutdown.clone();
    let heartbeat = tokio::spawn(async move { sender.run(heartbeat_client, token).await });

    let pool = coordinator.pool();
    assert_eventually(
        || {
            let pool = pool.clone();
            async move { pool.eligible_workers().await == vec![1] }
        },
        Duration::from_secs(2),
        "Worker should register through heartbeats",
    )
    .await;

    // Immediate path: queue -> dispatcher -> worker
    let submitted = client
        .submit_task(ClientTaskRequest {
            data: "echo now".to_string(),
            priority: 1,
        })
        .await
        .unwrap()
        .into_inner();
    let delivered = worker.next_task(Duration::from_secs(5)).await.unwrap();
    assert_eq!(delivered.id, submitted.task_id);

    // Persisted path: store -> scanner -> worker
    let scheduled = client
        .schedule_task(ScheduleTaskRequest {
            command: "echo scheduled".to_string(),
            scheduled_at: Utc::now().timestamp(),
            priority: 0,
        })
        .await
        .unwrap()
        .into_inner();
    let delivered = worker.next_task(Duration::from_secs(5)).await.unwrap();
    assert_eq!(delivered.id, scheduled.task_id);
    assert_eq!(delivered.payload, "echo scheduled");

    let polled = store.clone();
    assert_eventually(
        || {
            let store = polled.clone();
            async move { store.unpicked().is_empty() }
        },
        Duration::from_secs(2),
        "Scheduled row should be marked picked",
    )
    .await;

    let done = Utc::now().timestamp();
    client
        .update_task_status(UpdateTaskStatusRequest {
            task_id: scheduled.task_id.clone(),
            status: TaskStatus::Complete as i32,
            completed_at: done,
            ..Default::default()
        })
        .await
        .unwrap();
    let stored = store.get_task(&scheduled.task_id).await.unwrap().unwrap();
    assert_eq!(stored.completed_at.unwrap().timestamp(), done);

    heartbeat_shutdown.cancel();
    heartbeat.await.unwrap();
    drop(client);
    coordinator.stop().await.unwrap();
    assert!(coordinator.pool().is_empty().await);
}

#[tokio::test]
async fn test_silent_worker_is_evicted_by_monitor() {
    let mut coordinator =
        Coordinator::with_store(test_config(), Arc::new(MemoryTaskStore::new()));
    let addr = coordinator.start().await.unwrap();
    let mut client = connect(addr).await;

    client
        .send_heartbeat(HeartbeatRequest {
            worker_id: 9,
            address: "127.0.0.1:7009".to_string(),
        })
        .await
        .unwrap();

    let pool = coordinator.pool();
    assert_eventually(
        || {
            let pool = pool.clone();
            async move { pool.is_empty().await }
        },
        Duration::from_secs(5),
        "Worker without heartbeats should be evicted",
    )
    .await;

    drop(client);
    coordinator.stop().await.unwrap();
}
