pub mod coordinator_service;
pub mod server;
pub mod worker_service;

pub use coordinator_service::CoordinatorServiceImpl;
pub use server::GrpcServer;
pub use worker_service::WorkerServiceImpl;
