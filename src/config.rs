use std::net::SocketAddr;
use std::time::Duration;

use crate::error::{FabricError, Result};
use crate::store::DEFAULT_MAX_CONNECTIONS;

/// Worker pool liveness settings.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Interval at which workers are expected to send heartbeats
    pub heartbeat_interval_ms: u64,
    /// Number of consecutive missed sweeps tolerated before eviction
    pub max_heartbeat_misses: u32,
    /// Period of the eviction sweep. Should span a few heartbeat intervals.
    pub sweep_interval_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 5_000,
            max_heartbeat_misses: 1,
            sweep_interval_ms: 15_000,
        }
    }
}

impl PoolConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

/// Task queue and dispatcher settings.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Maximum number of tasks held by the queue before enqueuers block
    pub queue_capacity: usize,
    /// Pause before retrying a task when no worker was ready. Failed
    /// forwards wait this long, doubled per attempt.
    pub retry_backoff_ms: u64,
    /// Upper bound on a single forward RPC to a worker
    pub forward_timeout_ms: u64,
    /// Failed forwards after which a task is dead-lettered.
    /// `None` retries forever.
    pub max_dispatch_attempts: Option<u32>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 100,
            retry_backoff_ms: 100,
            forward_timeout_ms: 30_000,
            max_dispatch_attempts: None,
        }
    }
}

impl DispatchConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn forward_timeout(&self) -> Duration {
        Duration::from_millis(self.forward_timeout_ms)
    }
}

/// Database scanner settings.
#[derive(Debug, Clone)]
pub struct ScannerConfig {
    pub enabled: bool,
    pub scan_interval_ms: u64,
    /// Bound on one scan cycle, including every forward inside it
    pub scan_timeout_ms: u64,
    /// Rows scheduled up to this far in the future are claimed early
    pub lookahead_secs: u64,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            scan_interval_ms: 10_000,
            scan_timeout_ms: 30_000,
            lookahead_secs: 30,
        }
    }
}

impl ScannerConfig {
    pub fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.scan_interval_ms)
    }

    pub fn scan_timeout(&self) -> Duration {
        Duration::from_millis(self.scan_timeout_ms)
    }

    pub fn lookahead(&self) -> Duration {
        Duration::from_secs(self.lookahead_secs)
    }
}

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub listen_addr: SocketAddr,
    /// Postgres connection string. `None` selects the in-memory store.
    pub database_url: Option<String>,
    /// Size of the Postgres connection pool
    pub database_max_connections: u32,
    /// Bound on the graceful stop of the gRPC server
    pub shutdown_timeout_ms: u64,
    pub pool: PoolConfig,
    pub dispatch: DispatchConfig,
    pub scanner: ScannerConfig,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            database_url: None,
            database_max_connections: DEFAULT_MAX_CONNECTIONS,
            shutdown_timeout_ms: 5_000,
            pool: PoolConfig::default(),
            dispatch: DispatchConfig::default(),
            scanner: ScannerConfig::default(),
        }
    }
}

impl CoordinatorConfig {
    pub fn new(listen_addr: SocketAddr) -> Self {
        Self {
            listen_addr,
            ..Default::default()
        }
    }

    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = Some(url.into());
        self
    }

    pub fn with_pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    pub fn with_dispatch(mut self, dispatch: DispatchConfig) -> Self {
        self.dispatch = dispatch;
        self
    }

    pub fn with_scanner(mut self, scanner: ScannerConfig) -> Self {
        self.scanner = scanner;
        self
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// Reject settings the coordinator cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.pool.sweep_interval() <= self.pool.heartbeat_interval() {
            return Err(FabricError::InvalidConfig(format!(
                "sweep interval ({}ms) must exceed the heartbeat interval ({}ms)",
                self.pool.sweep_interval_ms, self.pool.heartbeat_interval_ms
            )));
        }
        if self.dispatch.queue_capacity == 0 {
            return Err(FabricError::InvalidConfig(
                "queue capacity must be at least 1".to_string(),
            ));
        }
        if self.database_max_connections == 0 {
            return Err(FabricError::InvalidConfig(
                "database pool needs at least one connection".to_string(),
            ));
        }
        Ok(())
    }
}
