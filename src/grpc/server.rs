use std::future::Future;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;

use crate::grpc::coordinator_service::CoordinatorServiceImpl;
use crate::pool::WorkerPool;
use crate::proto::coordinator_service_server::CoordinatorServiceServer;
use crate::scheduler::TaskQueue;
use crate::store::TaskStore;

pub struct GrpcServer {
    listener: TcpListener,
    queue: Arc<TaskQueue>,
    pool: Arc<WorkerPool>,
    store: Arc<dyn TaskStore>,
}

impl GrpcServer {
    /// Wrap an already-bound listener, so bind errors surface before any
    /// background work starts.
    pub fn new(
        listener: TcpListener,
        queue: Arc<TaskQueue>,
        pool: Arc<WorkerPool>,
        store: Arc<dyn TaskStore>,
    ) -> Self {
        Self {
            listener,
            queue,
            pool,
            store,
        }
    }

    /// Serve until `shutdown` resolves, then finish in-flight calls and
    /// release the listener.
    pub async fn run<F>(self, shutdown: F) -> Result<(), tonic::transport::Error>
    where
        F: Future<Output = ()>,
    {
        let addr = self.listener.local_addr().ok();
        let service = CoordinatorServiceImpl::new(self.queue, self.pool, self.store);

        tracing::info!(addr = ?addr, "Starting gRPC server");

        let result = Server::builder()
            .add_service(CoordinatorServiceServer::new(service))
            .serve_with_incoming_shutdown(TcpListenerStream::new(self.listener), shutdown)
            .await;

        tracing::info!(addr = ?addr, "gRPC server stopped, listener closed");
        result
    }
}
