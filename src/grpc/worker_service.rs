use tokio::sync::mpsc;
use tonic::{Request, Response, Status};

use crate::proto::worker_service_server::WorkerService;
use crate::proto::{TaskRequest, TaskResponse};
use crate::scheduler::Task;

/// Worker-side endpoint that receives forwarded tasks.
///
/// Accepted tasks are handed to the worker's executor through a channel.
/// A closed channel is reported to the coordinator as a rejection so the
/// task goes back into its queue.
pub struct WorkerServiceImpl {
    worker_id: u32,
    task_tx: mpsc::Sender<Task>,
}

impl WorkerServiceImpl {
    pub fn new(worker_id: u32, task_tx: mpsc::Sender<Task>) -> Self {
        Self { worker_id, task_tx }
    }
}

#[tonic::async_trait]
impl WorkerService for WorkerServiceImpl {
    async fn submit_task(
        &self,
        request: Request<TaskRequest>,
    ) -> Result<Response<TaskResponse>, Status> {
        let req = request.into_inner();
        let task_id = req.task_id.clone();

        if self.task_tx.send(Task::from(req)).await.is_err() {
            tracing::warn!(worker_id = self.worker_id, task_id = %task_id, "Executor gone, rejecting task");
            return Ok(Response::new(TaskResponse {
                task_id,
                message: "Worker is not accepting tasks".to_string(),
                success: false,
            }));
        }

        tracing::debug!(worker_id = self.worker_id, task_id = %task_id, "Task received");
        Ok(Response::new(TaskResponse {
            task_id,
            message: "Task accepted".to_string(),
            success: true,
        }))
    }
}
