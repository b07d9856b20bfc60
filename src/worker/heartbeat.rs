use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tonic::transport::Channel;

use crate::proto::coordinator_service_client::CoordinatorServiceClient;
use crate::proto::HeartbeatRequest;

/// Keeps a worker registered by heartbeating the coordinator.
pub struct HeartbeatSender {
    worker_id: u32,
    address: String,
    interval: Duration,
}

impl HeartbeatSender {
    /// `address` is where the coordinator reaches this worker's endpoint.
    pub fn new(worker_id: u32, address: impl Into<String>, interval_ms: u64) -> Self {
        Self {
            worker_id,
            address: address.into(),
            interval: Duration::from_millis(interval_ms),
        }
    }

    /// Send a heartbeat every interval until `shutdown` fires. Failed
    /// heartbeats are logged and retried on the next tick.
    pub async fn run(
        &self,
        mut client: CoordinatorServiceClient<Channel>,
        shutdown: CancellationToken,
    ) {
        let mut interval = tokio::time::interval(self.interval);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let request = HeartbeatRequest {
                        worker_id: self.worker_id,
                        address: self.address.clone(),
                    };
                    if let Err(e) = client.send_heartbeat(request).await {
                        tracing::warn!(worker_id = self.worker_id, error = %e, "Heartbeat failed");
                    }
                }
                _ = shutdown.cancelled() => break,
            }
        }
    }
}
