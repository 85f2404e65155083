//! Task domain model.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Cancelled,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 4] = [
        TaskStatus::Pending,
        TaskStatus::InProgress,
        TaskStatus::Completed,
        TaskStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    /// Completed and cancelled tasks can no longer become overdue.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Cancelled)
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown task status '{s}'"))
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted task.
///
/// `deleted_at` marks a soft-deleted ("trashed") task. Trashed tasks are
/// hidden from listings unless explicitly requested and can be restored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub due_date: Option<NaiveDate>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn is_trashed(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// A task is overdue when its due date has passed and it is still open.
    pub fn is_overdue(&self, today: NaiveDate) -> bool {
        !self.status.is_terminal() && self.due_date.is_some_and(|due| due < today)
    }

    /// Open task due between today and `days` from now, inclusive.
    pub fn is_due_soon(&self, today: NaiveDate, days: u64) -> bool {
        let Some(due) = self.due_date else {
            return false;
        };
        let horizon = today.checked_add_days(Days::new(days)).unwrap_or(NaiveDate::MAX);
        !self.status.is_terminal() && due >= today && due <= horizon
    }
}

/// Validated input for creating a task.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTask {
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub due_date: Option<NaiveDate>,
}

impl NewTask {
    /// `completed_at` for a task inserted at `now`.
    pub fn completed_at(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        (self.status == TaskStatus::Completed).then_some(now)
    }
}

/// Validated partial update.
///
/// The nested `Option` on nullable fields distinguishes "leave unchanged"
/// (`None`) from "clear the value" (`Some(None)`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskChanges {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub status: Option<TaskStatus>,
    pub due_date: Option<Option<NaiveDate>>,
}

impl TaskChanges {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.status.is_none()
            && self.due_date.is_none()
    }

    /// Apply the changes to a copy of `task`, stamping `updated_at` with `now`.
    ///
    /// `completed_at` is set when the task enters `completed` and cleared
    /// when it leaves it.
    pub fn apply(&self, task: &Task, now: DateTime<Utc>) -> Task {
        let mut next = task.clone();

        if let Some(title) = &self.title {
            next.title = title.clone();
        }
        if let Some(description) = &self.description {
            next.description = description.clone();
        }
        if let Some(due_date) = self.due_date {
            next.due_date = due_date;
        }
        if let Some(status) = self.status {
            next.status = status;
            next.completed_at = match (task.status, status) {
                (TaskStatus::Completed, TaskStatus::Completed) => task.completed_at,
                (_, TaskStatus::Completed) => Some(now),
                _ => None,
            };
        }

        next.updated_at = now;
        next
    }
}
