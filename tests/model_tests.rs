//! Unit tests for domain models and response envelopes.
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]

use chrono::{NaiveDate, TimeZone, Utc};
use serde_json::json;

use taskboard::models::{AuditContext, Task, TaskStatus};

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn task(status: TaskStatus, due_date: Option<NaiveDate>) -> Task {
    let at = Utc.with_ymd_and_hms(2025, 6, 1, 9, 30, 0).unwrap();
    Task {
        id: 42,
        title: "Renew certificate".to_string(),
        description: Some("Expires next week".to_string()),
        status,
        due_date,
        completed_at: None,
        created_at: at,
        updated_at: at,
        deleted_at: None,
    }
}

/// Task status parsing and wire format
mod status_tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_status_round_trips_through_str() {
        for status in TaskStatus::ALL {
            assert_eq!(TaskStatus::from_str(status.as_str()).unwrap(), status);
        }
    }

    #[test]
    fn test_status_rejects_unknown_and_mixed_case() {
        assert!(TaskStatus::from_str("done").is_err());
        assert!(TaskStatus::from_str("Pending").is_err());
        assert!(TaskStatus::from_str("").is_err());
    }

    #[test]
    fn test_status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_value(TaskStatus::InProgress).unwrap(),
            json!("in_progress")
        );
        let parsed: TaskStatus = serde_json::from_value(json!("cancelled")).unwrap();
        assert_eq!(parsed, TaskStatus::Cancelled);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::InProgress.is_terminal());
    }
}

/// Computed flags exposed on task resources
mod resource_tests {
    use super::*;
    use taskboard::models::TaskResource;

    #[test]
    fn test_overdue_open_task() {
        let resource = TaskResource::new(
            task(TaskStatus::Pending, Some(date(2025, 6, 1))),
            date(2025, 6, 2),
        );
        assert!(resource.is_overdue);
        assert!(!resource.is_due_soon);
        assert!(!resource.is_trashed);
    }

    #[test]
    fn test_due_soon_window_is_inclusive() {
        let today = date(2025, 6, 1);
        let due_today = TaskResource::new(task(TaskStatus::Pending, Some(today)), today);
        assert!(due_today.is_due_soon);
        assert!(!due_today.is_overdue);

        let edge = TaskResource::new(
            task(TaskStatus::InProgress, Some(date(2025, 6, 4))),
            today,
        );
        assert!(edge.is_due_soon);

        let later = TaskResource::new(task(TaskStatus::Pending, Some(date(2025, 6, 5))), today);
        assert!(!later.is_due_soon);
    }

    #[test]
    fn test_finished_tasks_are_never_late() {
        let today = date(2025, 6, 10);
        for status in [TaskStatus::Completed, TaskStatus::Cancelled] {
            let resource = TaskResource::new(task(status, Some(date(2025, 6, 1))), today);
            assert!(!resource.is_overdue);
            assert!(!resource.is_due_soon);
        }
    }

    #[test]
    fn test_trashed_flag_and_json_shape() {
        let mut trashed = task(TaskStatus::Pending, None);
        trashed.deleted_at = Some(Utc.with_ymd_and_hms(2025, 6, 2, 0, 0, 0).unwrap());

        let json = serde_json::to_value(TaskResource::new(trashed, date(2025, 6, 3))).unwrap();
        assert_eq!(json["id"], 42);
        assert_eq!(json["is_trashed"], true);
        assert_eq!(json["is_overdue"], false);
        assert!(json["due_date"].is_null());
        assert!(json["deleted_at"].is_string());
    }
}

/// Audit documents built from task snapshots
mod task_log_tests {
    use super::*;
    use taskboard::models::{TaskAction, TaskLog, changed_fields};

    fn context() -> AuditContext {
        AuditContext {
            request_id: Some("req-7".to_string()),
            ip_address: Some("203.0.113.5".to_string()),
            user_agent: Some("curl/8.5".to_string()),
        }
    }

    #[test]
    fn test_created_log_has_only_new_values() {
        let task = task(TaskStatus::Pending, None);
        let log = TaskLog::created(&task, &context()).unwrap();

        assert_eq!(log.action, TaskAction::Created);
        assert_eq!(log.task_id, 42);
        assert!(log.old_values.is_none());
        assert_eq!(log.new_values.as_ref().unwrap()["title"], "Renew certificate");
        assert!(log.changed_fields.contains(&"title".to_string()));
        assert_eq!(log.request_id.as_deref(), Some("req-7"));
        assert_eq!(log.ip_address.as_deref(), Some("203.0.113.5"));
    }

    #[test]
    fn test_updated_log_lists_changed_fields() {
        let before = task(TaskStatus::Pending, None);
        let mut after = before.clone();
        after.status = TaskStatus::Completed;
        after.completed_at = Some(Utc::now());
        after.updated_at = Utc::now();

        let log = TaskLog::updated(&before, &after, &context()).unwrap();
        assert_eq!(log.action, TaskAction::Updated);
        assert_eq!(log.changed_fields, vec!["completed_at", "status"]);
        assert_eq!(log.old_values.as_ref().unwrap()["status"], "pending");
        assert_eq!(log.new_values.as_ref().unwrap()["status"], "completed");
    }

    #[test]
    fn test_force_deleted_log_keeps_last_snapshot() {
        let task = task(TaskStatus::Cancelled, None);
        let log = TaskLog::force_deleted(&task, &context()).unwrap();

        assert_eq!(log.action, TaskAction::ForceDeleted);
        assert!(log.new_values.is_none());
        assert_eq!(log.old_values.as_ref().unwrap()["status"], "cancelled");
    }

    #[test]
    fn test_log_document_round_trip() {
        let log = TaskLog::created(&task(TaskStatus::Pending, None), &context()).unwrap();
        let json = serde_json::to_value(&log).unwrap();
        assert_eq!(json["action"], "created");

        let parsed: TaskLog = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, log);
    }

    #[test]
    fn test_changed_fields_ignores_updated_at() {
        let old = json!({"title": "a", "updated_at": "2025-01-01T00:00:00Z"});
        let new = json!({"title": "a", "updated_at": "2025-01-02T00:00:00Z"});
        assert!(changed_fields(Some(&old), Some(&new)).is_empty());
    }

    #[test]
    fn test_changed_fields_handles_added_and_removed_keys() {
        let old = json!({"title": "a", "legacy": 1});
        let new = json!({"title": "a", "fresh": true});
        assert_eq!(changed_fields(Some(&old), Some(&new)), vec!["fresh", "legacy"]);
        assert!(changed_fields(None, None).is_empty());
    }

    #[test]
    fn test_action_parsing() {
        assert_eq!(
            "force_deleted".parse::<TaskAction>().unwrap(),
            TaskAction::ForceDeleted
        );
        assert!("purged".parse::<TaskAction>().is_err());
    }
}

/// Success envelope and pagination metadata
mod response_tests {
    use super::*;
    use taskboard::models::Page;
    use taskboard::response::{ApiResponse, PaginationMeta};

    #[test]
    fn test_pagination_meta_middle_page() {
        let meta = PaginationMeta::new(2, 15, 40, 15);
        assert_eq!(meta.last_page, 3);
        assert_eq!(meta.from, Some(16));
        assert_eq!(meta.to, Some(30));
    }

    #[test]
    fn test_pagination_meta_partial_last_page() {
        let meta = PaginationMeta::new(3, 15, 40, 10);
        assert_eq!(meta.from, Some(31));
        assert_eq!(meta.to, Some(40));
    }

    #[test]
    fn test_pagination_meta_empty_result() {
        let meta = PaginationMeta::new(1, 15, 0, 0);
        assert_eq!(meta.last_page, 1);
        assert_eq!(meta.from, None);
        assert_eq!(meta.to, None);

        let json = serde_json::to_value(&meta).unwrap();
        assert!(json["from"].is_null());
    }

    #[test]
    fn test_paginated_envelope() {
        let page = Page {
            items: vec!["a", "b"],
            total: 5,
            page: 1,
            per_page: 2,
        };
        let json = serde_json::to_value(ApiResponse::paginated(page)).unwrap();

        assert_eq!(json["success"], true);
        assert_eq!(json["data"], json!(["a", "b"]));
        assert_eq!(json["meta"]["last_page"], 3);
        assert!(json.get("message").is_none());
    }

    #[test]
    fn test_message_envelope_omits_meta() {
        let json = serde_json::to_value(ApiResponse::with_message("Done.", ())).unwrap();
        assert_eq!(json["message"], "Done.");
        assert!(json["data"].is_null());
        assert!(json.get("meta").is_none());
    }
}
