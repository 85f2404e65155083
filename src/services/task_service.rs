use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use tracing::{debug, info, instrument};

use crate::audit::AuditLogger;
use crate::error::{AppError, AppResult};
use crate::metrics;
use crate::models::{
    AuditContext, CreateTaskRequest, Page, ShowTaskQuery, Task, TaskAction, TaskListQuery, TaskLog,
    TaskLogQuery, TaskStats, UpdateTaskRequest, changed_fields,
};
use crate::repository::TaskRepository;
use crate::validation::{
    validate_create, validate_list_query, validate_log_query, validate_show_query, validate_update,
};

/// Task use cases: validation, persistence, and the audit trail.
///
/// Every successful mutation is committed to the repository first and then
/// recorded through the [`AuditLogger`]. An audit failure is logged but never
/// reported to the caller.
#[derive(Clone)]
pub struct TaskService {
    repo: Arc<dyn TaskRepository>,
    audit: AuditLogger,
    default_per_page: u32,
    max_per_page: u32,
}

fn not_found(id: i64) -> AppError {
    AppError::NotFound(format!("Task {id} not found."))
}

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

impl TaskService {
    pub fn new(
        repo: Arc<dyn TaskRepository>,
        audit: AuditLogger,
        default_per_page: u32,
        max_per_page: u32,
    ) -> Self {
        Self {
            repo,
            audit,
            default_per_page,
            max_per_page,
        }
    }

    pub fn audit(&self) -> &AuditLogger {
        &self.audit
    }

    async fn record(&self, log: AppResult<TaskLog>, action: TaskAction) {
        metrics::record_task_mutation(action);
        match log {
            Ok(log) => {
                self.audit.record(&log).await;
            }
            Err(e) => tracing::warn!(error = %e, %action, "Failed to build audit log"),
        }
    }

    #[instrument(skip(self, request, ctx))]
    pub async fn create(&self, request: CreateTaskRequest, ctx: &AuditContext) -> AppResult<Task> {
        let new_task = validate_create(request, today())?;
        let task = self.repo.insert(new_task).await?;

        info!(task_id = task.id, status = %task.status, "Task created");
        self.record(TaskLog::created(&task, ctx), TaskAction::Created)
            .await;

        Ok(task)
    }

    /// Fetch one task. Trashed tasks are hidden unless `include_trashed`.
    #[instrument(skip(self))]
    pub async fn get(&self, id: i64, include_trashed: bool) -> AppResult<Task> {
        self.repo
            .find(id, include_trashed)
            .await?
            .ok_or_else(|| not_found(id))
    }

    pub async fn show(&self, id: i64, query: &ShowTaskQuery) -> AppResult<Task> {
        let with_trashed = validate_show_query(query)?;
        self.get(id, with_trashed).await
    }

    #[instrument(skip(self, query))]
    pub async fn list(&self, query: &TaskListQuery) -> AppResult<Page<Task>> {
        let filter =
            validate_list_query(query, self.default_per_page, self.max_per_page, today())?;
        let page = self.repo.list(&filter).await?;

        debug!(total = page.total, page = page.page, "Tasks listed");
        Ok(page)
    }

    /// Apply a partial update.
    ///
    /// A request that changes nothing returns the task as stored, without a
    /// write or an audit entry.
    #[instrument(skip(self, request, ctx))]
    pub async fn update(
        &self,
        id: i64,
        request: UpdateTaskRequest,
        ctx: &AuditContext,
    ) -> AppResult<Task> {
        let current = self.get(id, false).await?;
        let changes = validate_update(request)?;

        let next = changes.apply(&current, Utc::now());
        let before = serde_json::to_value(&current)?;
        let after = serde_json::to_value(&next)?;
        if changed_fields(Some(&before), Some(&after)).is_empty() {
            debug!(task_id = id, "Update changed nothing");
            return Ok(current);
        }

        let saved = self.repo.update(&next).await?.ok_or_else(|| not_found(id))?;

        info!(task_id = id, "Task updated");
        self.record(TaskLog::updated(&current, &saved, ctx), TaskAction::Updated)
            .await;

        Ok(saved)
    }

    /// Soft delete. Already-trashed tasks are reported as missing.
    #[instrument(skip(self, ctx))]
    pub async fn delete(&self, id: i64, ctx: &AuditContext) -> AppResult<Task> {
        let current = self.get(id, false).await?;
        let trashed = self
            .repo
            .soft_delete(id, Utc::now())
            .await?
            .ok_or_else(|| not_found(id))?;

        info!(task_id = id, "Task moved to trash");
        self.record(TaskLog::deleted(&current, &trashed, ctx), TaskAction::Deleted)
            .await;

        Ok(trashed)
    }

    #[instrument(skip(self, ctx))]
    pub async fn restore(&self, id: i64, ctx: &AuditContext) -> AppResult<Task> {
        let current = self.get(id, true).await?;
        if !current.is_trashed() {
            return Err(AppError::Conflict(format!("Task {id} is not in the trash.")));
        }

        let restored = self
            .repo
            .restore(id, Utc::now())
            .await?
            .ok_or_else(|| AppError::Conflict(format!("Task {id} is not in the trash.")))?;

        info!(task_id = id, "Task restored");
        self.record(TaskLog::restored(&current, &restored, ctx), TaskAction::Restored)
            .await;

        Ok(restored)
    }

    /// Permanently remove a task, live or trashed. Returns the removed row.
    #[instrument(skip(self, ctx))]
    pub async fn force_delete(&self, id: i64, ctx: &AuditContext) -> AppResult<Task> {
        let current = self.get(id, true).await?;
        if !self.repo.force_delete(id).await? {
            return Err(not_found(id));
        }

        info!(task_id = id, "Task permanently deleted");
        self.record(TaskLog::force_deleted(&current, ctx), TaskAction::ForceDeleted)
            .await;

        Ok(current)
    }

    /// Audit history of one task, newest first. Available after a force delete.
    #[instrument(skip(self, query))]
    pub async fn logs_for(&self, id: i64, query: &TaskLogQuery) -> AppResult<Vec<TaskLog>> {
        let filter = validate_log_query(query)?;
        let store = self.audit.store();

        match filter.action {
            None => store.for_task(id, filter.limit).await,
            Some(action) => {
                let mut logs = store.for_task(id, usize::MAX).await?;
                logs.retain(|log| log.action == action);
                logs.truncate(filter.limit);
                Ok(logs)
            }
        }
    }

    #[instrument(skip(self, query))]
    pub async fn recent_logs(&self, query: &TaskLogQuery) -> AppResult<Vec<TaskLog>> {
        let filter = validate_log_query(query)?;
        self.audit.store().recent(filter.action, filter.limit).await
    }

    pub async fn stats(&self) -> AppResult<TaskStats> {
        self.repo.count_by_status(today()).await
    }

    pub async fn ping(&self) -> AppResult<()> {
        self.repo.ping().await
    }
}
