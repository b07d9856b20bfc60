pub mod config;
pub mod coordinator;
pub mod error;
pub mod grpc;
pub mod pool;
pub mod scheduler;
pub mod shutdown;
pub mod store;
pub mod worker;

// Re-export generated protobuf types
pub mod proto {
    tonic::include_proto!("fabric");
}
