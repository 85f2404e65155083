//! Audit trail endpoints.
//!
//! - `GET /api/tasks/{id}/logs` - History of one task, newest first
//! - `GET /api/logs` - Latest entries across all tasks
//!
//! Both accept `action` (created | updated | deleted | restored |
//! force_deleted) and `limit` (1..=100, default 50).

use axum::extract::State;
use tracing::instrument;

use crate::error::AppResult;
use crate::extract::{AppPath, AppQuery};
use crate::models::{TaskLog, TaskLogQuery};
use crate::response::ApiResponse;
use crate::state::AppState;

/// History survives deletion, so unknown or purged ids return an empty
/// list rather than 404.
#[instrument(skip(state, query))]
pub async fn task_logs(
    State(state): State<AppState>,
    AppPath(id): AppPath<i64>,
    AppQuery(query): AppQuery<TaskLogQuery>,
) -> AppResult<ApiResponse<Vec<TaskLog>>> {
    let logs = state.tasks.logs_for(id, &query).await?;
    Ok(ApiResponse::ok(logs))
}

#[instrument(skip(state, query))]
pub async fn recent_logs(
    State(state): State<AppState>,
    AppQuery(query): AppQuery<TaskLogQuery>,
) -> AppResult<ApiResponse<Vec<TaskLog>>> {
    let logs = state.tasks.recent_logs(&query).await?;
    Ok(ApiResponse::ok(logs))
}
