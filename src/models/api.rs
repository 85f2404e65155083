use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use super::task::Task;

/// Days ahead that count as "due soon" in task resources.
pub const DUE_SOON_DAYS: u64 = 3;

/// Deserialize a field so that an explicit `null` becomes `Some(None)`.
///
/// Paired with `#[serde(default)]`, a missing field stays `None`.
fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Body of `POST /api/tasks`.
///
/// Every field is optional at the serde level so that missing or invalid
/// values surface as field-level validation errors rather than a parse error.
#[derive(Debug, Default, Deserialize)]
pub struct CreateTaskRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<String>,
    pub due_date: Option<String>,
}

/// Body of `PUT/PATCH /api/tasks/{id}`.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateTaskRequest {
    #[serde(default, deserialize_with = "double_option")]
    pub title: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub description: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub status: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub due_date: Option<Option<String>>,
}

/// Query string of `GET /api/tasks`.
///
/// Values are kept as raw strings and validated into a `TaskFilter`.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct TaskListQuery {
    pub status: Option<String>,
    pub search: Option<String>,
    pub overdue: Option<String>,
    pub due_before: Option<String>,
    pub due_after: Option<String>,
    pub trashed: Option<String>,
    pub sort_by: Option<String>,
    pub sort_direction: Option<String>,
    pub page: Option<String>,
    pub per_page: Option<String>,
}

/// Query string of `GET /api/tasks/{id}`.
#[derive(Debug, Default, Deserialize)]
pub struct ShowTaskQuery {
    pub with_trashed: Option<String>,
}

/// Query string of the audit log endpoints.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct TaskLogQuery {
    pub action: Option<String>,
    pub limit: Option<String>,
}

/// Task as returned by the API, with computed flags.
#[derive(Debug, Clone, Serialize)]
pub struct TaskResource {
    #[serde(flatten)]
    pub task: Task,
    pub is_overdue: bool,
    pub is_due_soon: bool,
    pub is_trashed: bool,
}

impl TaskResource {
    pub fn new(task: Task, today: NaiveDate) -> Self {
        Self {
            is_overdue: task.is_overdue(today),
            is_due_soon: task.is_due_soon(today, DUE_SOON_DAYS),
            is_trashed: task.is_trashed(),
            task,
        }
    }

    pub fn now(task: Task) -> Self {
        Self::new(task, Utc::now().date_naive())
    }
}

/// Task counts used by `/stats`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStats {
    /// Live (not trashed) tasks
    pub total: u64,
    pub pending: u64,
    pub in_progress: u64,
    pub completed: u64,
    pub cancelled: u64,
    /// Live tasks past their due date and still open
    pub overdue: u64,
    /// Soft-deleted tasks
    pub trashed: u64,
}

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// "healthy" when every dependency answers, "degraded" otherwise
    pub status: String,
    /// Task database reachable
    pub database: bool,
    /// Audit log store reachable
    pub audit_store: bool,
    /// Audit store backend ("iggy" or "memory")
    pub audit_backend: String,
    /// Counter store backend ("memory" or "database")
    pub counter_backend: String,
    /// Service version
    pub version: String,
    /// Current timestamp
    pub timestamp: DateTime<Utc>,
}

/// Statistics response.
///
/// Task counts come from a background-refreshed cache; `cache_age_seconds`
/// reports how old they are.
#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub tasks: TaskStats,
    /// Uptime in seconds
    pub uptime_seconds: u64,
    /// Age of cached statistics in seconds (u64::MAX = never refreshed)
    pub cache_age_seconds: u64,
    /// Whether the cache is considered stale (exceeded TTL)
    pub cache_stale: bool,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::models::TaskStatus;

    #[test]
    fn test_update_request_distinguishes_null_from_missing() {
        let request: UpdateTaskRequest =
            serde_json::from_str(r#"{"description": null, "status": "completed"}"#)
                .expect("Deserialization should succeed");

        assert_eq!(request.description, Some(None));
        assert_eq!(request.status, Some(Some("completed".to_string())));
        assert!(request.title.is_none());
        assert!(request.due_date.is_none());
    }

    #[test]
    fn test_create_request_tolerates_missing_fields() {
        let request: CreateTaskRequest =
            serde_json::from_str("{}").expect("Deserialization should succeed");
        assert!(request.title.is_none());
    }

    #[test]
    fn test_task_resource_flattens_task() {
        let now = Utc::now();
        let task = Task {
            id: 1,
            title: "Pay invoice".to_string(),
            description: None,
            status: TaskStatus::Pending,
            due_date: NaiveDate::from_ymd_opt(2020, 1, 1),
            completed_at: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };

        let json = serde_json::to_value(TaskResource::now(task)).unwrap();
        assert_eq!(json["id"], 1);
        assert_eq!(json["status"], "pending");
        assert_eq!(json["due_date"], "2020-01-01");
        assert_eq!(json["is_overdue"], true);
        assert_eq!(json["is_trashed"], false);
    }
}
