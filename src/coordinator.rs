use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::CoordinatorConfig;
use crate::error::{FabricError, Result};
use crate::grpc::GrpcServer;
use crate::pool::{HeartbeatMonitor, WorkerPool};
use crate::scheduler::{DatabaseScanner, Dispatcher, TaskQueue};
use crate::shutdown::install_shutdown_handler;
use crate::store::{MemoryTaskStore, PostgresTaskStore, TaskStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Created,
    Running,
    ShuttingDown,
    Stopped,
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecycleState::Created => write!(f, "created"),
            LifecycleState::Running => write!(f, "running"),
            LifecycleState::ShuttingDown => write!(f, "shutting_down"),
            LifecycleState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Owns every coordinator subsystem and their shutdown order.
///
/// Background loops (heartbeat monitor, dispatcher, scanner and the work
/// they spawn) hang off one root cancellation token and one task tracker.
/// The gRPC server has its own token so it keeps answering until those
/// loops have exited.
pub struct Coordinator {
    config: CoordinatorConfig,
    state: LifecycleState,
    root: CancellationToken,
    server_shutdown: CancellationToken,
    tracker: TaskTracker,
    queue: Arc<TaskQueue>,
    pool: Arc<WorkerPool>,
    store: Option<Arc<dyn TaskStore>>,
    dispatcher: Option<Arc<Dispatcher>>,
    server_handle: Option<JoinHandle<std::result::Result<(), tonic::transport::Error>>>,
    local_addr: Option<SocketAddr>,
}

impl Coordinator {
    /// The store is connected on `start` from `config.database_url`.
    pub fn new(config: CoordinatorConfig) -> Self {
        let root = CancellationToken::new();
        let queue = Arc::new(TaskQueue::with_capacity(
            config.dispatch.queue_capacity,
            root.clone(),
        ));
        let pool = Arc::new(WorkerPool::new(config.pool.max_heartbeat_misses));

        Self {
            config,
            state: LifecycleState::Created,
            root,
            server_shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
            queue,
            pool,
            store: None,
            dispatcher: None,
            server_handle: None,
            local_addr: None,
        }
    }

    /// Use an already-connected store instead of `config.database_url`.
    pub fn with_store(config: CoordinatorConfig, store: Arc<dyn TaskStore>) -> Self {
        let mut coordinator = Self::new(config);
        coordinator.store = Some(store);
        coordinator
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn queue(&self) -> Arc<TaskQueue> {
        self.queue.clone()
    }

    pub fn pool(&self) -> Arc<WorkerPool> {
        self.pool.clone()
    }

    pub fn store(&self) -> Option<Arc<dyn TaskStore>> {
        self.store.clone()
    }

    pub fn dispatcher(&self) -> Option<Arc<Dispatcher>> {
        self.dispatcher.clone()
    }

    /// Address the gRPC listener is bound to, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Bind the listener, connect the store and spawn every subsystem.
    ///
    /// # Errors
    ///
    /// Invalid settings, bind and store connection failures are fatal and
    /// leave the coordinator in `Created`.
    pub async fn start(&mut self) -> Result<SocketAddr> {
        if self.state != LifecycleState::Created {
            return Err(FabricError::InvalidState(format!(
                "cannot start a coordinator that is {}",
                self.state
            )));
        }

        self.config.validate()?;
        let listener = TcpListener::bind(self.config.listen_addr).await?;
        let local_addr = listener.local_addr()?;

        let store = match self.store.clone() {
            Some(store) => store,
            None => self.connect_store().await?,
        };
        self.store = Some(store.clone());

        let server = GrpcServer::new(
            listener,
            self.queue.clone(),
            self.pool.clone(),
            store.clone(),
        );
        let server_token = self.server_shutdown.clone();
        self.server_handle = Some(tokio::spawn(async move {
            server.run(server_token.cancelled_owned()).await
        }));

        let monitor = HeartbeatMonitor::new(self.pool.clone(), self.config.pool.sweep_interval());
        self.tracker.spawn(monitor.run(self.root.clone()));

        let dispatcher = Arc::new(Dispatcher::new(
            self.queue.clone(),
            self.pool.clone(),
            self.tracker.clone(),
            &self.config.dispatch,
        ));
        self.tracker
            .spawn(dispatcher.clone().run(self.root.clone()));
        self.dispatcher = Some(dispatcher.clone());

        if self.config.scanner.enabled {
            let scanner = Arc::new(DatabaseScanner::new(
                store,
                dispatcher,
                &self.config.scanner,
            ));
            self.tracker
                .spawn(scanner.run(self.tracker.clone(), self.root.clone()));
        }

        self.local_addr = Some(local_addr);
        self.state = LifecycleState::Running;
        tracing::info!(
            addr = %local_addr,
            scanner = self.config.scanner.enabled,
            queue_capacity = self.queue.capacity(),
            max_heartbeat_misses = self.pool.max_heartbeat_misses(),
            heartbeat_interval_ms = self.config.pool.heartbeat_interval_ms,
            "Coordinator running"
        );
        Ok(local_addr)
    }

    /// Start, block until SIGINT or SIGTERM, then stop.
    pub async fn run(mut self) -> Result<()> {
        self.start().await?;
        let signal = install_shutdown_handler();
        signal.cancelled().await;
        self.stop().await
    }

    /// Shut down in dependency order: background loops first, then worker
    /// connections, the gRPC server and its listener, and finally the store.
    pub async fn stop(&mut self) -> Result<()> {
        match self.state {
            LifecycleState::Running => {}
            LifecycleState::Created => {
                self.state = LifecycleState::Stopped;
                return Ok(());
            }
            LifecycleState::ShuttingDown | LifecycleState::Stopped => return Ok(()),
        }

        self.state = LifecycleState::ShuttingDown;
        tracing::info!("Coordinator shutting down");

        self.root.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        tracing::info!("Background loops stopped");

        self.pool.close_all().await;

        self.server_shutdown.cancel();
        if let Some(mut handle) = self.server_handle.take() {
            match tokio::time::timeout(self.config.shutdown_timeout(), &mut handle).await {
                Ok(Ok(Ok(()))) => {}
                Ok(Ok(Err(e))) => tracing::error!(error = %e, "gRPC server exited with error"),
                Ok(Err(e)) => tracing::error!(error = %e, "gRPC server task failed"),
                Err(_) => {
                    tracing::warn!("gRPC server did not stop in time, aborting");
                    handle.abort();
                }
            }
        }

        if let Some(store) = &self.store {
            store.close().await;
        }

        self.state = LifecycleState::Stopped;
        tracing::info!("Coordinator stopped");
        Ok(())
    }

    async fn connect_store(&self) -> Result<Arc<dyn TaskStore>> {
        match &self.config.database_url {
            Some(url) => {
                let store =
                    PostgresTaskStore::connect(url, self.config.database_max_connections).await?;
                Ok(Arc::new(store))
            }
            None => {
                tracing::warn!("No database URL configured, using in-memory task store");
                Ok(Arc::new(MemoryTaskStore::new()))
            }
        }
    }
}
