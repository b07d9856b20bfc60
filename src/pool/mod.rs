//! Worker pool membership and liveness.
//!
//! - [`WorkerPool`]: registry of workers, their connections and miss counters
//! - [`HeartbeatMonitor`]: periodic sweep that evicts silent workers
//!
//! A worker is registered by its first heartbeat, reset to healthy by every
//! later one, and evicted once it misses more sweeps than the configured
//! maximum. Only healthy workers (no missed sweep) are selected for dispatch.

pub mod monitor;
pub mod registry;

pub use monitor::HeartbeatMonitor;
pub use registry::{HeartbeatOutcome, WorkerHandle, WorkerId, WorkerPool};
