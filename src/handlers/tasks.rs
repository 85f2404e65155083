//! Task CRUD endpoints.
//!
//! # Endpoints
//!
//! - `GET /api/tasks` - Paginated, filterable list
//! - `POST /api/tasks` - Create
//! - `GET /api/tasks/{id}` - Show (`?with_trashed=true` includes trashed)
//! - `PUT|PATCH /api/tasks/{id}` - Partial update
//! - `DELETE /api/tasks/{id}` - Move to trash
//! - `POST /api/tasks/{id}/restore` - Restore from trash
//! - `DELETE /api/tasks/{id}/force` - Delete permanently
//!
//! Every mutation is written to the audit trail with the caller's request
//! id, IP and user agent.

use axum::extract::State;
use axum::http::StatusCode;
use chrono::Utc;
use tracing::instrument;

use crate::error::AppResult;
use crate::extract::{AppJson, AppPath, AppQuery};
use crate::models::{
    AuditContext, CreateTaskRequest, ShowTaskQuery, TaskListQuery, TaskResource,
    UpdateTaskRequest,
};
use crate::response::ApiResponse;
use crate::state::AppState;

/// List tasks.
///
/// # Query Parameters
///
/// - `status`: pending | in_progress | completed | cancelled
/// - `search`: case-insensitive match on title and description
/// - `overdue`: only open tasks past their due date
/// - `due_before` / `due_after`: inclusive `YYYY-MM-DD` bounds
/// - `trashed`: `with` or `only`
/// - `sort_by`, `sort_direction`, `page`, `per_page`
#[instrument(skip(state, query))]
pub async fn list_tasks(
    State(state): State<AppState>,
    AppQuery(query): AppQuery<TaskListQuery>,
) -> AppResult<ApiResponse<Vec<TaskResource>>> {
    let page = state.tasks.list(&query).await?;
    let today = Utc::now().date_naive();

    Ok(ApiResponse::paginated(
        page.map(|task| TaskResource::new(task, today)),
    ))
}

#[instrument(skip(state, ctx, request))]
pub async fn create_task(
    State(state): State<AppState>,
    ctx: AuditContext,
    AppJson(request): AppJson<CreateTaskRequest>,
) -> AppResult<(StatusCode, ApiResponse<TaskResource>)> {
    let task = state.tasks.create(request, &ctx).await?;

    Ok(ApiResponse::created(
        "Task created successfully.",
        TaskResource::now(task),
    ))
}

#[instrument(skip(state, query))]
pub async fn show_task(
    State(state): State<AppState>,
    AppPath(id): AppPath<i64>,
    AppQuery(query): AppQuery<ShowTaskQuery>,
) -> AppResult<ApiResponse<TaskResource>> {
    let task = state.tasks.show(id, &query).await?;
    Ok(ApiResponse::ok(TaskResource::now(task)))
}

/// Partial update. Absent fields are left alone; `null` clears nullable
/// fields. Sending values identical to the stored ones is a no-op and
/// writes no audit entry.
#[instrument(skip(state, ctx, request))]
pub async fn update_task(
    State(state): State<AppState>,
    AppPath(id): AppPath<i64>,
    ctx: AuditContext,
    AppJson(request): AppJson<UpdateTaskRequest>,
) -> AppResult<ApiResponse<TaskResource>> {
    let task = state.tasks.update(id, request, &ctx).await?;

    Ok(ApiResponse::with_message(
        "Task updated successfully.",
        TaskResource::now(task),
    ))
}

#[instrument(skip(state, ctx))]
pub async fn delete_task(
    State(state): State<AppState>,
    AppPath(id): AppPath<i64>,
    ctx: AuditContext,
) -> AppResult<ApiResponse<TaskResource>> {
    let task = state.tasks.delete(id, &ctx).await?;

    Ok(ApiResponse::with_message(
        "Task moved to trash.",
        TaskResource::now(task),
    ))
}

#[instrument(skip(state, ctx))]
pub async fn restore_task(
    State(state): State<AppState>,
    AppPath(id): AppPath<i64>,
    ctx: AuditContext,
) -> AppResult<ApiResponse<TaskResource>> {
    let task = state.tasks.restore(id, &ctx).await?;

    Ok(ApiResponse::with_message(
        "Task restored successfully.",
        TaskResource::now(task),
    ))
}

/// Permanent delete. The audit history of the task is kept.
#[instrument(skip(state, ctx))]
pub async fn force_delete_task(
    State(state): State<AppState>,
    AppPath(id): AppPath<i64>,
    ctx: AuditContext,
) -> AppResult<ApiResponse<()>> {
    state.tasks.force_delete(id, &ctx).await?;
    Ok(ApiResponse::with_message("Task permanently deleted.", ()))
}
