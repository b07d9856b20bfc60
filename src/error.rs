use thiserror::Error;

#[derive(Error, Debug)]
pub enum FabricError {
    #[error("No workers available")]
    NoWorkersAvailable,

    #[error("Task queue is closed")]
    QueueClosed,

    #[error("Unsupported task status: {0}")]
    UnsupportedStatus(i32),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Task {0} already has a conflicting terminal status")]
    StatusConflict(String),

    #[error("Forwarding task {task_id} to worker {worker_id} timed out")]
    ForwardTimeout { task_id: String, worker_id: u32 },

    #[error("Worker {worker_id} rejected task {task_id}: {message}")]
    WorkerRejected {
        task_id: String,
        worker_id: u32,
        message: String,
    },

    #[error("Scan cycle exceeded {timeout_ms}ms")]
    ScanTimeout { timeout_ms: u64 },

    #[error("Task already exists: {0}")]
    DuplicateTask(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid lifecycle state: {0}")]
    InvalidState(String),

    #[error("gRPC error: {0}")]
    GrpcError(#[from] tonic::Status),

    #[error("Transport error: {0}")]
    TransportError(#[from] tonic::transport::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<FabricError> for tonic::Status {
    fn from(err: FabricError) -> Self {
        let message = err.to_string();
        match err {
            FabricError::UnsupportedStatus(_) => tonic::Status::invalid_argument(message),
            FabricError::TaskNotFound(_) => tonic::Status::not_found(message),
            FabricError::DuplicateTask(_) => tonic::Status::already_exists(message),
            FabricError::StatusConflict(_) | FabricError::InvalidState(_) => {
                tonic::Status::failed_precondition(message)
            }
            FabricError::NoWorkersAvailable => tonic::Status::resource_exhausted(message),
            FabricError::QueueClosed
            | FabricError::ForwardTimeout { .. }
            | FabricError::ScanTimeout { .. }
            | FabricError::WorkerRejected { .. }
            | FabricError::TransportError(_)
            | FabricError::Database(_) => tonic::Status::unavailable(message),
            FabricError::GrpcError(status) => status,
            FabricError::InvalidConfig(_)
            | FabricError::Migration(_)
            | FabricError::Io(_)
            | FabricError::Internal(_) => {
                tonic::Status::internal(message)
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, FabricError>;
