use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool, Postgres, Transaction};

use crate::error::{FabricError, Result};
use crate::scheduler::{Task, TaskStatus};
use crate::store::{ClaimBatch, TaskStore};

pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;

#[derive(Debug, FromRow)]
struct TaskRow {
    id: String,
    command: String,
    priority: i32,
    scheduled_at: DateTime<Utc>,
    picked_at: Option<DateTime<Utc>>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    failed_at: Option<DateTime<Utc>>,
}

impl From<TaskRow> for Task {
    fn from(row: TaskRow) -> Self {
        Task {
            id: row.id,
            payload: row.command,
            priority: row.priority,
            scheduled_at: row.scheduled_at,
            picked_at: row.picked_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
            failed_at: row.failed_at,
            attempts: 0,
        }
    }
}

/// Task store over the Postgres `tasks` table.
#[derive(Clone)]
pub struct PostgresTaskStore {
    pool: PgPool,
}

impl PostgresTaskStore {
    /// Connect with a pool of `max_connections` and run migrations.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        tracing::info!(max_connections, "Connected to task store");
        Ok(Self { pool })
    }
}

#[async_trait]
impl TaskStore for PostgresTaskStore {
    async fn schedule_task(&self, task: &Task) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO tasks (id, command, priority, scheduled_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(&task.id)
        .bind(&task.payload)
        .bind(task.priority)
        .bind(task.scheduled_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match e.as_database_error() {
            Some(db) if db.is_unique_violation() => FabricError::DuplicateTask(task.id.clone()),
            _ => FabricError::Database(e),
        })?;
        Ok(())
    }

    async fn claim_due(&self, lookahead: Duration) -> Result<Box<dyn ClaimBatch>> {
        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query_as::<_, TaskRow>(
            r#"
            SELECT id, command, priority, scheduled_at,
                   picked_at, started_at, completed_at, failed_at
            FROM tasks
            WHERE scheduled_at < (NOW() + make_interval(secs => $1))
              AND picked_at IS NULL
            ORDER BY scheduled_at
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(lookahead.as_secs_f64())
        .fetch_all(&mut *tx)
        .await?;

        Ok(Box::new(PostgresClaimBatch {
            tx,
            tasks: rows.into_iter().map(Task::from).collect(),
        }))
    }

    async fn record_status(
        &self,
        task_id: &str,
        status: TaskStatus,
        at: DateTime<Utc>,
    ) -> Result<()> {
        // Completion and failure exclude each other.
        let guard = match status {
            TaskStatus::Started => "",
            TaskStatus::Complete => " AND failed_at IS NULL",
            TaskStatus::Failed => " AND completed_at IS NULL",
        };
        let statement = format!(
            "UPDATE tasks SET {} = $1 WHERE id = $2{}",
            status.column(),
            guard
        );

        let result = sqlx::query(&statement)
            .bind(at)
            .bind(task_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() > 0 {
            return Ok(());
        }

        match self.get_task(task_id).await? {
            Some(_) => Err(FabricError::StatusConflict(task_id.to_string())),
            None => Err(FabricError::TaskNotFound(task_id.to_string())),
        }
    }

    async fn get_task(&self, task_id: &str) -> Result<Option<Task>> {
        let row = sqlx::query_as::<_, TaskRow>(
            r#"
            SELECT id, command, priority, scheduled_at,
                   picked_at, started_at, completed_at, failed_at
            FROM tasks
            WHERE id = $1
            "#,
        )
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Task::from))
    }

    async fn close(&self) {
        self.pool.close().await;
        tracing::info!("Task store connection pool closed");
    }
}

struct PostgresClaimBatch {
    tx: Transaction<'static, Postgres>,
    tasks: Vec<Task>,
}

#[async_trait]
impl ClaimBatch for PostgresClaimBatch {
    fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    async fn mark_picked(&mut self, task_id: &str) -> Result<()> {
        sqlx::query("UPDATE tasks SET picked_at = NOW() WHERE id = $1")
            .bind(task_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
