//! Worker-side plumbing.
//!
//! - [`WorkerServiceImpl`](crate::grpc::WorkerServiceImpl) receives tasks
//!   forwarded by the coordinator
//! - [`HeartbeatSender`]: keeps the worker registered in the coordinator's pool
//!
//! Executing tasks is left to whoever drains the channel passed to [`serve`].

pub mod heartbeat;

pub use heartbeat::HeartbeatSender;

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;

use crate::grpc::WorkerServiceImpl;
use crate::proto::worker_service_server::WorkerServiceServer;
use crate::scheduler::Task;

/// Serve the worker endpoint on `listener` until `shutdown` fires.
pub async fn serve(
    listener: TcpListener,
    worker_id: u32,
    task_tx: mpsc::Sender<Task>,
    shutdown: CancellationToken,
) -> Result<(), tonic::transport::Error> {
    tracing::info!(worker_id, addr = ?listener.local_addr().ok(), "Starting worker endpoint");

    Server::builder()
        .add_service(WorkerServiceServer::new(WorkerServiceImpl::new(
            worker_id, task_tx,
        )))
        .serve_with_incoming_shutdown(TcpListenerStream::new(listener), shutdown.cancelled_owned())
        .await
}
