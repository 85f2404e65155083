//! Fuzz testing for request validation.
//!
//! Feeds arbitrary field values through every validator and checks that
//! each one returns a `Result` instead of panicking, and that accepted
//! input respects the documented bounds.
//!
//! # Running the Fuzz Tests
//!
//! ```bash
//! cargo +nightly install cargo-fuzz
//! cargo +nightly fuzz run fuzz_validation -- -max_total_time=60
//! ```

#![no_main]

use arbitrary::Arbitrary;
use chrono::NaiveDate;
use libfuzzer_sys::fuzz_target;
use taskboard::models::{
    CreateTaskRequest, ShowTaskQuery, TaskListQuery, TaskLogQuery, UpdateTaskRequest,
};
use taskboard::validation::{
    MAX_DESCRIPTION_LENGTH, MAX_LOG_LIMIT, MAX_TITLE_LENGTH, parse_bool, validate_create,
    validate_list_query, validate_log_query, validate_show_query, validate_update,
};

#[derive(Debug, Arbitrary)]
struct Input {
    title: Option<String>,
    description: Option<String>,
    status: Option<String>,
    due_date: Option<String>,
    clear_description: bool,
    query: [Option<String>; 10],
    action: Option<String>,
    limit: Option<String>,
}

fuzz_target!(|input: Input| {
    let Some(today) = NaiveDate::from_ymd_opt(2025, 1, 15) else {
        return;
    };

    let create = CreateTaskRequest {
        title: input.title.clone(),
        description: input.description.clone(),
        status: input.status.clone(),
        due_date: input.due_date.clone(),
    };
    if let Ok(task) = validate_create(create, today) {
        assert!(!task.title.trim().is_empty());
        assert!(task.title.chars().count() <= MAX_TITLE_LENGTH);
        if let Some(description) = &task.description {
            assert!(description.chars().count() <= MAX_DESCRIPTION_LENGTH);
        }
        if let Some(due) = task.due_date {
            assert!(due >= today);
        }
    }

    let update = UpdateTaskRequest {
        title: input.title.clone().map(Some),
        description: if input.clear_description {
            Some(None)
        } else {
            input.description.clone().map(Some)
        },
        status: input.status.clone().map(Some),
        due_date: input.due_date.clone().map(Some),
    };
    let _ = validate_update(update);

    let [status, search, overdue, due_before, due_after, trashed, sort_by, sort_direction, page, per_page] =
        input.query;
    let list = TaskListQuery {
        status,
        search,
        overdue: overdue.clone(),
        due_before,
        due_after,
        trashed,
        sort_by,
        sort_direction,
        page,
        per_page,
    };
    if let Ok(filter) = validate_list_query(&list, 15, 100, today) {
        assert!(filter.page >= 1);
        assert!((1..=100).contains(&filter.per_page));
    }

    let logs = TaskLogQuery {
        action: input.action,
        limit: input.limit,
    };
    if let Ok(filter) = validate_log_query(&logs) {
        assert!((1..=MAX_LOG_LIMIT).contains(&filter.limit));
    }

    let _ = validate_show_query(&ShowTaskQuery {
        with_trashed: overdue.clone(),
    });
    if let Some(raw) = overdue {
        let _ = parse_bool(&raw);
    }
});
