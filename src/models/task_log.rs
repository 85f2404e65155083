//! Audit trail documents for task mutations.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::task::Task;
use crate::error::AppResult;

/// Snapshot keys that never count as a change on their own.
const IGNORED_DIFF_FIELDS: &[&str] = &["updated_at"];

/// Mutation recorded by a [`TaskLog`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskAction {
    Created,
    Updated,
    Deleted,
    Restored,
    ForceDeleted,
}

impl TaskAction {
    pub const ALL: [TaskAction; 5] = [
        TaskAction::Created,
        TaskAction::Updated,
        TaskAction::Deleted,
        TaskAction::Restored,
        TaskAction::ForceDeleted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskAction::Created => "created",
            TaskAction::Updated => "updated",
            TaskAction::Deleted => "deleted",
            TaskAction::Restored => "restored",
            TaskAction::ForceDeleted => "force_deleted",
        }
    }
}

impl FromStr for TaskAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskAction::ALL
            .into_iter()
            .find(|action| action.as_str() == s)
            .ok_or_else(|| format!("unknown task action '{s}'"))
    }
}

impl fmt::Display for TaskAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who triggered a mutation, as seen from the HTTP layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditContext {
    pub request_id: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// One audit document per task mutation.
///
/// `old_values` / `new_values` are full JSON snapshots of the task before and
/// after the action; `changed_fields` lists the top-level keys that differ.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskLog {
    pub id: Uuid,
    pub task_id: i64,
    pub action: TaskAction,
    pub old_values: Option<Value>,
    pub new_values: Option<Value>,
    #[serde(default)]
    pub changed_fields: Vec<String>,
    pub request_id: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TaskLog {
    fn new(
        task_id: i64,
        action: TaskAction,
        old_values: Option<Value>,
        new_values: Option<Value>,
        context: &AuditContext,
    ) -> Self {
        let changed_fields = changed_fields(old_values.as_ref(), new_values.as_ref());
        Self {
            id: Uuid::new_v4(),
            task_id,
            action,
            old_values,
            new_values,
            changed_fields,
            request_id: context.request_id.clone(),
            ip_address: context.ip_address.clone(),
            user_agent: context.user_agent.clone(),
            created_at: Utc::now(),
        }
    }

    pub fn created(task: &Task, context: &AuditContext) -> AppResult<Self> {
        Ok(Self::new(
            task.id,
            TaskAction::Created,
            None,
            Some(serde_json::to_value(task)?),
            context,
        ))
    }

    pub fn updated(before: &Task, after: &Task, context: &AuditContext) -> AppResult<Self> {
        Ok(Self::new(
            after.id,
            TaskAction::Updated,
            Some(serde_json::to_value(before)?),
            Some(serde_json::to_value(after)?),
            context,
        ))
    }

    pub fn deleted(before: &Task, after: &Task, context: &AuditContext) -> AppResult<Self> {
        Ok(Self::new(
            after.id,
            TaskAction::Deleted,
            Some(serde_json::to_value(before)?),
            Some(serde_json::to_value(after)?),
            context,
        ))
    }

    pub fn restored(before: &Task, after: &Task, context: &AuditContext) -> AppResult<Self> {
        Ok(Self::new(
            after.id,
            TaskAction::Restored,
            Some(serde_json::to_value(before)?),
            Some(serde_json::to_value(after)?),
            context,
        ))
    }

    pub fn force_deleted(task: &Task, context: &AuditContext) -> AppResult<Self> {
        Ok(Self::new(
            task.id,
            TaskAction::ForceDeleted,
            Some(serde_json::to_value(task)?),
            None,
            context,
        ))
    }
}

/// Top-level snapshot keys whose values differ between `old` and `new`.
///
/// A key present on only one side counts as changed. Keys in
/// [`IGNORED_DIFF_FIELDS`] are skipped. The result is sorted.
pub fn changed_fields(old: Option<&Value>, new: Option<&Value>) -> Vec<String> {
    let empty = serde_json::Map::new();
    let old = old.and_then(Value::as_object).unwrap_or(&empty);
    let new = new.and_then(Value::as_object).unwrap_or(&empty);

    let mut fields: Vec<String> = old
        .keys()
        .chain(new.keys().filter(|k| !old.contains_key(*k)))
        .filter(|k| !IGNORED_DIFF_FIELDS.contains(&k.as_str()))
        .filter(|k| old.get(*k) != new.get(*k))
        .cloned()
        .collect();

    fields.sort();
    fields
}
