//! Persistent task store.
//!
//! The scanner claims due rows through [`TaskStore::claim_due`], which opens
//! a transaction and locks the selected rows, skipping rows another
//! transaction already holds. The returned [`ClaimBatch`] is the open
//! transaction: rows are marked picked inside it and only become claimed on
//! [`ClaimBatch::commit`]. Dropping a batch rolls it back.
//!
//! Two implementations share these semantics:
//! - [`PostgresTaskStore`]: `FOR UPDATE SKIP LOCKED` over the `tasks` table
//! - [`MemoryTaskStore`]: row locks tracked in process, for tests and
//!   storeless runs

mod memory;
mod postgres;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::scheduler::{Task, TaskStatus};

pub use memory::MemoryTaskStore;
pub use postgres::{PostgresTaskStore, DEFAULT_MAX_CONNECTIONS};

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Persist a task for later dispatch.
    async fn schedule_task(&self, task: &Task) -> Result<()>;

    /// Open a transaction holding every unpicked row scheduled before
    /// `now + lookahead`, ordered by scheduled time.
    async fn claim_due(&self, lookahead: Duration) -> Result<Box<dyn ClaimBatch>>;

    /// Write the timestamp column for `status`.
    async fn record_status(
        &self,
        task_id: &str,
        status: TaskStatus,
        at: DateTime<Utc>,
    ) -> Result<()>;

    /// Fetch a persisted task.
    async fn get_task(&self, task_id: &str) -> Result<Option<Task>>;

    /// Release pooled connections.
    async fn close(&self);
}

/// An open claim transaction.
#[async_trait]
pub trait ClaimBatch: Send {
    /// Rows locked by this transaction, in scheduled order.
    fn tasks(&self) -> &[Task];

    /// Set `picked_at` for a row inside the transaction.
    async fn mark_picked(&mut self, task_id: &str) -> Result<()>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}
