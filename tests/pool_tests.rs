//! Integration tests for worker registration, liveness and selection.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use task_fabric::pool::{HeartbeatMonitor, HeartbeatOutcome, WorkerPool};
use tokio_util::sync::CancellationToken;

fn addr(port: u16) -> String {
    format!("127.0.0.1:{}", port)
}

/// Worker heartbeats twice and then goes silent: it stops being eligible
/// after max + 1 sweeps and is evicted on the next one.
#[tokio::test]
async fn test_silent_worker_is_evicted() {
    let pool = WorkerPool::new(1);
    pool.heartbeat(1, &addr(7001)).await.unwrap();
    pool.heartbeat(1, &addr(7001)).await.unwrap();
    assert_eq!(pool.eligible_workers().await, vec![1]);

    assert!(pool.sweep_and_evict().await.is_empty());
    assert!(pool.sweep_and_evict().await.is_empty());
    assert!(pool.eligible_workers().await.is_empty());
    assert_eq!(pool.registered_workers().await, vec![1]);
    assert!(pool.select_worker().await.is_none());

    assert_eq!(pool.sweep_and_evict().await, vec![1]);
    assert!(pool.is_empty().await);
    assert_eq!(pool.misses(1).await, None);
}

#[tokio::test]
async fn test_eviction_threshold_follows_max_misses() {
    for max in 0..4u32 {
        let pool = WorkerPool::new(max);
        pool.heartbeat(1, &addr(7001)).await.unwrap();

        for sweep in 0..=max {
            assert!(
                pool.sweep_and_evict().await.is_empty(),
                "max={} sweep={} should not evict",
                max,
                sweep
            );
        }
        assert_eq!(pool.misses(1).await, Some(max + 1));
        assert_eq!(
            pool.sweep_and_evict().await,
            vec![1],
            "max={} should evict on sweep {}",
            max,
            max + 2
        );
    }
}

#[tokio::test]
async fn test_regular_heartbeats_keep_worker_alive() {
    let pool = WorkerPool::new(0);
    pool.heartbeat(1, &addr(7001)).await.unwrap();

    for _ in 0..10 {
        assert!(pool.sweep_and_evict().await.is_empty());
        assert_eq!(
            pool.heartbeat(1, &addr(7001)).await.unwrap(),
            HeartbeatOutcome::Refreshed
        );
    }
    assert_eq!(pool.eligible_workers().await, vec![1]);
}

#[tokio::test]
async fn test_round_robin_hits_every_healthy_worker() {
    let pool = WorkerPool::new(1);
    for id in 1..=4u32 {
        pool.heartbeat(id, &addr(7000 + id as u16)).await.unwrap();
    }

    for round in 0..3 {
        let picked: HashSet<u32> = {
            let mut ids = HashSet::new();
            for _ in 0..4 {
                ids.insert(pool.select_worker().await.unwrap().id());
            }
            ids
        };
        assert_eq!(picked.len(), 4, "round {} should hit 4 distinct workers", round);
    }
}

#[tokio::test]
async fn test_reregister_replaces_address() {
    let pool = WorkerPool::new(1);
    pool.register(1, &addr(7001)).await.unwrap();
    pool.register(1, &addr(7101)).await.unwrap();

    assert_eq!(pool.len().await, 1);
    let worker = pool.select_worker().await.unwrap();
    assert_eq!(worker.address(), addr(7101));
}

#[tokio::test]
async fn test_concurrent_heartbeats_register_each_worker_once() {
    let pool = Arc::new(WorkerPool::new(1));
    let mut handles = Vec::new();
    for i in 0..40u32 {
        let pool = pool.clone();
        handles.push(tokio::spawn(async move {
            let id = i % 8;
            pool.heartbeat(id, &addr(7000 + id as u16)).await.unwrap()
        }));
    }

    let mut registered = 0;
    for handle in handles {
        if handle.await.unwrap() == HeartbeatOutcome::Registered {
            registered += 1;
        }
    }
    assert_eq!(registered, 8);
    assert_eq!(pool.registered_workers().await, (0..8).collect::<Vec<_>>());
}

#[tokio::test(start_paused = true)]
async fn test_monitor_sweeps_on_interval() {
    let pool = Arc::new(WorkerPool::new(0));
    pool.heartbeat(1, &addr(7001)).await.unwrap();

    let shutdown = CancellationToken::new();
    let monitor = HeartbeatMonitor::new(pool.clone(), Duration::from_millis(100));
    let handle = tokio::spawn(monitor.run(shutdown.clone()));

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(pool.misses(1).await, Some(1));
    assert!(pool.eligible_workers().await.is_empty());

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(pool.is_empty().await, "Worker should be evicted on second sweep");

    shutdown.cancel();
    handle.await.unwrap();
}
