use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{FabricError, Result};
use crate::scheduler::{Task, TaskStatus};
use crate::store::{ClaimBatch, TaskStore};

#[derive(Debug, Default)]
struct MemoryState {
    rows: HashMap<String, Task>,
    /// Rows held by an open claim batch
    locked: HashSet<String>,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<MemoryState>,
    fail_next_commit: AtomicBool,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        // A panic while holding the lock cannot leave the maps half-updated.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// In-process task store with skip-locked claim semantics.
#[derive(Debug, Clone, Default)]
pub struct MemoryTaskStore {
    shared: Arc<Shared>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next commit fail, leaving its rows unclaimed.
    pub fn fail_next_commit(&self) {
        self.shared.fail_next_commit.store(true, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.shared.lock().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ids of rows not yet picked.
    pub fn unpicked(&self) -> Vec<String> {
        let state = self.shared.lock();
        let mut ids: Vec<String> = state
            .rows
            .values()
            .filter(|t| t.picked_at.is_none())
            .map(|t| t.id.clone())
            .collect();
        ids.sort();
        ids
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn schedule_task(&self, task: &Task) -> Result<()> {
        let mut state = self.shared.lock();
        if state.rows.contains_key(&task.id) {
            return Err(FabricError::DuplicateTask(task.id.clone()));
        }
        state.rows.insert(task.id.clone(), task.clone());
        Ok(())
    }

    async fn claim_due(&self, lookahead: Duration) -> Result<Box<dyn ClaimBatch>> {
        let horizon = Utc::now()
            + chrono::Duration::from_std(lookahead)
                .map_err(|e| FabricError::Internal(format!("Invalid lookahead: {}", e)))?;

        let mut state = self.shared.lock();
        let mut due: Vec<Task> = state
            .rows
            .values()
            .filter(|t| {
                t.picked_at.is_none() && t.scheduled_at < horizon && !state.locked.contains(&t.id)
            })
            .cloned()
            .collect();
        due.sort_by(|a, b| a.scheduled_at.cmp(&b.scheduled_at).then_with(|| a.id.cmp(&b.id)));

        for task in &due {
            state.locked.insert(task.id.clone());
        }

        Ok(Box::new(MemoryClaimBatch {
            shared: self.shared.clone(),
            tasks: due,
            picked: Vec::new(),
            finished: false,
        }))
    }

    async fn record_status(
        &self,
        task_id: &str,
        status: TaskStatus,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let mut state = self.shared.lock();
        let task = state
            .rows
            .get_mut(task_id)
            .ok_or_else(|| FabricError::TaskNotFound(task_id.to_string()))?;

        match status {
            TaskStatus::Started => task.started_at = Some(at),
            TaskStatus::Complete => {
                if task.failed_at.is_some() {
                    return Err(FabricError::StatusConflict(task_id.to_string()));
                }
                task.completed_at = Some(at);
            }
            TaskStatus::Failed => {
                if task.completed_at.is_some() {
                    return Err(FabricError::StatusConflict(task_id.to_string()));
                }
                task.failed_at = Some(at);
            }
        }
        Ok(())
    }

    async fn get_task(&self, task_id: &str) -> Result<Option<Task>> {
        Ok(self.shared.lock().rows.get(task_id).cloned())
    }

    async fn close(&self) {}
}

struct MemoryClaimBatch {
    shared: Arc<Shared>,
    tasks: Vec<Task>,
    picked: Vec<(String, DateTime<Utc>)>,
    finished: bool,
}

impl MemoryClaimBatch {
    fn release(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        let mut state = self.shared.lock();
        for task in &self.tasks {
            state.locked.remove(&task.id);
        }
    }
}

#[async_trait]
impl ClaimBatch for MemoryClaimBatch {
    fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    async fn mark_picked(&mut self, task_id: &str) -> Result<()> {
        if !self.tasks.iter().any(|t| t.id == task_id) {
            return Err(FabricError::TaskNotFound(task_id.to_string()));
        }
        self.picked.push((task_id.to_string(), Utc::now()));
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> Result<()> {
        if self.shared.fail_next_commit.swap(false, Ordering::SeqCst) {
            self.release();
            return Err(FabricError::Internal("simulated commit failure".to_string()));
        }

        {
            let mut state = self.shared.lock();
            for (task_id, at) in &self.picked {
                if let Some(task) = state.rows.get_mut(task_id) {
                    task.picked_at = Some(*at);
                }
            }
        }
        self.release();
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> Result<()> {
        self.release();
        Ok(())
    }
}

impl Drop for MemoryClaimBatch {
    fn drop(&mut self) {
        self.release();
    }
}
