use std::sync::Arc;

use tonic::{Request, Response, Status};

use crate::pool::{HeartbeatOutcome, WorkerPool};
use crate::proto::coordinator_service_server::CoordinatorService;
use crate::proto::{
    ClientTaskRequest, ClientTaskResponse, HeartbeatRequest, HeartbeatResponse,
    RequestTaskRequest, RequestTaskResponse, ScheduleTaskRequest, ScheduleTaskResponse,
    UpdateTaskStatusRequest, UpdateTaskStatusResponse,
};
use crate::scheduler::task::unix_to_datetime;
use crate::scheduler::{Task, TaskQueue, TaskStatus};
use crate::store::TaskStore;

/// gRPC service for clients and workers
pub struct CoordinatorServiceImpl {
    queue: Arc<TaskQueue>,
    pool: Arc<WorkerPool>,
    store: Arc<dyn TaskStore>,
}

impl CoordinatorServiceImpl {
    pub fn new(queue: Arc<TaskQueue>, pool: Arc<WorkerPool>, store: Arc<dyn TaskStore>) -> Self {
        Self { queue, pool, store }
    }
}

#[tonic::async_trait]
impl CoordinatorService for CoordinatorServiceImpl {
    async fn submit_task(
        &self,
        request: Request<ClientTaskRequest>,
    ) -> Result<Response<ClientTaskResponse>, Status> {
        let req = request.into_inner();

        if req.data.trim().is_empty() {
            return Err(Status::invalid_argument("Task data cannot be empty"));
        }

        let task = Task::new(req.data, req.priority);
        let task_id = task.id.clone();

        // Blocks while the queue is full; the caller gets the id once it is queued.
        self.queue.enqueue(task).await?;

        tracing::info!(task_id = %task_id, priority = req.priority, "Task submitted");
        Ok(Response::new(ClientTaskResponse {
            message: "Task submitted successfully and added to queue".to_string(),
            task_id,
        }))
    }

    async fn schedule_task(
        &self,
        request: Request<ScheduleTaskRequest>,
    ) -> Result<Response<ScheduleTaskResponse>, Status> {
        let req = request.into_inner();

        if req.command.trim().is_empty() {
            return Err(Status::invalid_argument("Command cannot be empty"));
        }

        let mut task = Task::new(req.command, req.priority);
        task.scheduled_at = unix_to_datetime(req.scheduled_at);
        self.store.schedule_task(&task).await?;

        tracing::info!(
            task_id = %task.id,
            scheduled_at = %task.scheduled_at,
            "Task scheduled"
        );
        Ok(Response::new(ScheduleTaskResponse {
            task_id: task.id,
            scheduled_at: task.scheduled_at.timestamp(),
        }))
    }

    async fn request_task(
        &self,
        _request: Request<RequestTaskRequest>,
    ) -> Result<Response<RequestTaskResponse>, Status> {
        let task = self.queue.try_dequeue().await;
        if let Some(ref task) = task {
            tracing::info!(task_id = %task.id, "Task pulled by worker");
        }

        Ok(Response::new(RequestTaskResponse {
            task: task.map(|t| t.to_proto()),
        }))
    }

    async fn update_task_status(
        &self,
        request: Request<UpdateTaskStatusRequest>,
    ) -> Result<Response<UpdateTaskStatusResponse>, Status> {
        let req = request.into_inner();

        let status = TaskStatus::from_proto(req.status).map_err(|e| {
            tracing::warn!(task_id = %req.task_id, status = req.status, "Invalid status in update request");
            Status::from(e)
        })?;

        let timestamp = match status {
            TaskStatus::Started => req.started_at,
            TaskStatus::Complete => req.completed_at,
            TaskStatus::Failed => req.failed_at,
        };

        if let Err(e) = self
            .store
            .record_status(&req.task_id, status, unix_to_datetime(timestamp))
            .await
        {
            tracing::warn!(task_id = %req.task_id, status = %status, error = %e, "Could not update task status");
            return Err(e.into());
        }

        tracing::debug!(task_id = %req.task_id, status = %status, "Task status updated");
        Ok(Response::new(UpdateTaskStatusResponse { success: true }))
    }

    async fn send_heartbeat(
        &self,
        request: Request<HeartbeatRequest>,
    ) -> Result<Response<HeartbeatResponse>, Status> {
        let req = request.into_inner();

        match self.pool.heartbeat(req.worker_id, &req.address).await {
            Ok(HeartbeatOutcome::Registered) | Ok(HeartbeatOutcome::Refreshed) => {
                Ok(Response::new(HeartbeatResponse { acknowledged: true }))
            }
            Err(e) => {
                tracing::warn!(worker_id = req.worker_id, address = %req.address, error = %e, "Failed to register worker");
                Err(Status::from(e))
            }
        }
    }
}
