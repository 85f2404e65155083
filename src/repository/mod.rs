//! Relational task store.

mod database;
mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use crate::error::AppResult;
use crate::models::{NewTask, Page, Task, TaskFilter, TaskStats};

pub use database::{DbPool, create_pool, run_migrations};
pub use sqlite::SqliteTaskRepository;

/// Persistence port for tasks.
///
/// Soft-deleted rows stay in the table with `deleted_at` set; only
/// [`TaskRepository::force_delete`] removes them.
#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn insert(&self, task: NewTask) -> AppResult<Task>;

    async fn find(&self, id: i64, include_trashed: bool) -> AppResult<Option<Task>>;

    async fn list(&self, filter: &TaskFilter) -> AppResult<Page<Task>>;

    /// Persist every mutable column of `task`. `None` when the row is gone.
    async fn update(&self, task: &Task) -> AppResult<Option<Task>>;

    /// Trash a live task. `None` when missing or already trashed.
    async fn soft_delete(&self, id: i64, at: DateTime<Utc>) -> AppResult<Option<Task>>;

    /// Bring a trashed task back. `None` when missing or not trashed.
    async fn restore(&self, id: i64, at: DateTime<Utc>) -> AppResult<Option<Task>>;

    /// Permanently remove a task, trashed or not. `false` when missing.
    async fn force_delete(&self, id: i64) -> AppResult<bool>;

    async fn count_by_status(&self, today: NaiveDate) -> AppResult<TaskStats>;

    async fn ping(&self) -> AppResult<()>;
}
