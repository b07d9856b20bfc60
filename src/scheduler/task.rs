use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{FabricError, Result};
use crate::proto;

/// Lifecycle transitions reported by workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    Started,
    Complete,
    Failed,
}

impl TaskStatus {
    /// Persisted column that records this transition.
    pub fn column(&self) -> &'static str {
        match self {
            TaskStatus::Started => "started_at",
            TaskStatus::Complete => "completed_at",
            TaskStatus::Failed => "failed_at",
        }
    }

    /// Decode the wire enum. Unspecified and unknown values are rejected.
    pub fn from_proto(value: i32) -> Result<Self> {
        match proto::TaskStatus::try_from(value) {
            Ok(proto::TaskStatus::Started) => Ok(TaskStatus::Started),
            Ok(proto::TaskStatus::Complete) => Ok(TaskStatus::Complete),
            Ok(proto::TaskStatus::Failed) => Ok(TaskStatus::Failed),
            _ => Err(FabricError::UnsupportedStatus(value)),
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Started => write!(f, "started"),
            TaskStatus::Complete => write!(f, "complete"),
            TaskStatus::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub payload: String,
    /// Lower value is dispatched first
    pub priority: i32,
    pub scheduled_at: DateTime<Utc>,
    pub picked_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    /// Failed forward attempts so far
    pub attempts: u32,
}

impl Task {
    pub fn new(payload: impl Into<String>, priority: i32) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), payload, priority, Utc::now())
    }

    pub fn with_id(
        id: impl Into<String>,
        payload: impl Into<String>,
        priority: i32,
        scheduled_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            payload: payload.into(),
            priority,
            scheduled_at,
            picked_at: None,
            started_at: None,
            completed_at: None,
            failed_at: None,
            attempts: 0,
        }
    }

    pub fn to_proto(&self) -> proto::TaskRequest {
        proto::TaskRequest {
            task_id: self.id.clone(),
            data: self.payload.clone(),
            priority: self.priority,
        }
    }
}

impl From<proto::TaskRequest> for Task {
    fn from(req: proto::TaskRequest) -> Self {
        Task::with_id(req.task_id, req.data, req.priority, Utc::now())
    }
}

/// Convert Unix seconds from the wire. Zero and out-of-range values fall back to now.
pub fn unix_to_datetime(secs: i64) -> DateTime<Utc> {
    if secs == 0 {
        return Utc::now();
    }
    Utc.timestamp_opt(secs, 0).single().unwrap_or_else(Utc::now)
}
