//! Request validation.
//!
//! Every rule failure is collected into a [`FieldErrors`] map so a client sees
//! all problems with a request in one 422 response.

use chrono::NaiveDate;

use crate::error::{AppError, AppResult, FieldErrors};
use crate::models::{
    CreateTaskRequest, LogFilter, NewTask, ShowTaskQuery, SortColumn, SortDirection, TaskAction,
    TaskChanges, TaskFilter, TaskListQuery, TaskLogQuery, TaskStatus, TrashedMode,
    UpdateTaskRequest,
};

// =============================================================================
// Validation Constants
// =============================================================================

/// Maximum length of a task title, in characters.
pub const MAX_TITLE_LENGTH: usize = 255;

/// Maximum length of a task description, in characters.
pub const MAX_DESCRIPTION_LENGTH: usize = 5000;

/// Maximum length of the listing search term.
pub const MAX_SEARCH_LENGTH: usize = 255;

pub const DEFAULT_LOG_LIMIT: usize = 50;
pub const MAX_LOG_LIMIT: usize = 100;

/// Wire format for due dates.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Accumulates rule failures per field.
#[derive(Debug, Default)]
struct Validator {
    errors: FieldErrors,
}

impl Validator {
    fn fail(&mut self, field: &str, message: String) {
        self.errors
            .entry(field.to_string())
            .or_default()
            .push(message);
    }

    fn required(&mut self, field: &str) {
        self.fail(field, format!("The {} field is required.", label(field)));
    }

    fn invalid_choice(&mut self, field: &str) {
        self.fail(field, format!("The selected {} is invalid.", label(field)));
    }

    /// Enforce a character (not byte) limit.
    fn max_chars(&mut self, field: &str, value: &str, max: usize) {
        if value.chars().count() > max {
            self.fail(
                field,
                format!(
                    "The {} field must not be greater than {max} characters.",
                    label(field)
                ),
            );
        }
    }

    fn date(&mut self, field: &str, raw: &str) -> Option<NaiveDate> {
        match NaiveDate::parse_from_str(raw, DATE_FORMAT) {
            Ok(date) => Some(date),
            Err(_) => {
                self.fail(
                    field,
                    format!("The {} field must match the format Y-m-d.", label(field)),
                );
                None
            }
        }
    }

    fn status(&mut self, field: &str, raw: &str) -> Option<TaskStatus> {
        let parsed = raw.parse::<TaskStatus>().ok();
        if parsed.is_none() {
            self.invalid_choice(field);
        }
        parsed
    }

    fn boolean(&mut self, field: &str, raw: &str) -> bool {
        parse_bool(raw).unwrap_or_else(|| {
            self.fail(
                field,
                format!("The {} field must be true or false.", label(field)),
            );
            false
        })
    }

    fn integer_between(&mut self, field: &str, raw: &str, min: u64, max: u64) -> Option<u64> {
        let Ok(value) = raw.parse::<u64>() else {
            self.fail(
                field,
                format!("The {} field must be an integer.", label(field)),
            );
            return None;
        };

        if value < min || value > max {
            let message = if max == u64::MAX {
                format!("The {} field must be at least {min}.", label(field))
            } else {
                format!(
                    "The {} field must be between {min} and {max}.",
                    label(field)
                )
            };
            self.fail(field, message);
            return None;
        }

        Some(value)
    }

    fn finish(self) -> AppResult<()> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(AppError::Validation(self.errors))
        }
    }
}

/// Human label for a field name: `due_date` becomes `due date`.
fn label(field: &str) -> String {
    field.replace('_', " ")
}

/// Trimmed value, with blank strings treated as absent.
fn present(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Lenient boolean parsing for query flags.
pub fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Some(true),
        "0" | "false" | "off" | "no" | "" => Some(false),
        _ => None,
    }
}

/// Validate a create request. `today` is the earliest accepted due date.
pub fn validate_create(request: CreateTaskRequest, today: NaiveDate) -> AppResult<NewTask> {
    let mut v = Validator::default();

    let title = match present(request.title.as_deref()) {
        Some(title) => {
            v.max_chars("title", title, MAX_TITLE_LENGTH);
            Some(title.to_string())
        }
        None => {
            v.required("title");
            None
        }
    };

    let description = present(request.description.as_deref()).map(|description| {
        v.max_chars("description", description, MAX_DESCRIPTION_LENGTH);
        description.to_string()
    });

    let status = match present(request.status.as_deref()) {
        Some(raw) => v.status("status", raw).unwrap_or_default(),
        None => TaskStatus::default(),
    };

    let due_date = present(request.due_date.as_deref()).and_then(|raw| v.date("due_date", raw));
    if let Some(due) = due_date
        && due < today
    {
        v.fail(
            "due_date",
            "The due date field must be a date after or equal to today.".to_string(),
        );
    }

    v.finish()?;

    Ok(NewTask {
        title: title.unwrap_or_default(),
        description,
        status,
        due_date,
    })
}

/// Validate a partial update. Absent fields stay untouched; explicit `null`
/// clears nullable fields. Past due dates are accepted here so existing
/// tasks can be edited after their due date.
pub fn validate_update(request: UpdateTaskRequest) -> AppResult<TaskChanges> {
    let mut v = Validator::default();
    let mut changes = TaskChanges::default();

    if let Some(title) = request.title {
        match present(title.as_deref()) {
            Some(title) => {
                v.max_chars("title", title, MAX_TITLE_LENGTH);
                changes.title = Some(title.to_string());
            }
            None => v.required("title"),
        }
    }

    if let Some(description) = request.description {
        changes.description = Some(present(description.as_deref()).map(|description| {
            v.max_chars("description", description, MAX_DESCRIPTION_LENGTH);
            description.to_string()
        }));
    }

    if let Some(status) = request.status {
        match present(status.as_deref()) {
            Some(raw) => changes.status = v.status("status", raw),
            None => v.required("status"),
        }
    }

    if let Some(due_date) = request.due_date {
        changes.due_date = match present(due_date.as_deref()) {
            Some(raw) => v.date("due_date", raw).map(Some),
            None => Some(None),
        };
    }

    v.finish()?;
    Ok(changes)
}

/// Validate listing query parameters into a [`TaskFilter`].
pub fn validate_list_query(
    query: &TaskListQuery,
    default_per_page: u32,
    max_per_page: u32,
    today: NaiveDate,
) -> AppResult<TaskFilter> {
    let mut v = Validator::default();
    let mut filter = TaskFilter::new(default_per_page, today);

    if let Some(raw) = present(query.status.as_deref()) {
        filter.status = v.status("status", raw);
    }

    if let Some(search) = present(query.search.as_deref()) {
        v.max_chars("search", search, MAX_SEARCH_LENGTH);
        filter.search = Some(search.to_string());
    }

    if let Some(raw) = present(query.overdue.as_deref()) {
        filter.overdue = v.boolean("overdue", raw);
    }

    if let Some(raw) = present(query.due_before.as_deref()) {
        filter.due_before = v.date("due_before", raw);
    }

    if let Some(raw) = present(query.due_after.as_deref()) {
        filter.due_after = v.date("due_after", raw);
    }

    if let Some(raw) = present(query.trashed.as_deref()) {
        match raw {
            "exclude" => filter.trashed = TrashedMode::Exclude,
            "with" => filter.trashed = TrashedMode::With,
            "only" => filter.trashed = TrashedMode::Only,
            _ => v.invalid_choice("trashed"),
        }
    }

    if let Some(raw) = present(query.sort_by.as_deref()) {
        match SortColumn::parse(raw) {
            Some(column) => filter.sort = column,
            None => v.invalid_choice("sort_by"),
        }
    }

    if let Some(raw) = present(query.sort_direction.as_deref()) {
        match raw.to_ascii_lowercase().as_str() {
            "asc" => filter.direction = SortDirection::Asc,
            "desc" => filter.direction = SortDirection::Desc,
            _ => v.invalid_choice("sort_direction"),
        }
    }

    if let Some(raw) = present(query.page.as_deref())
        && let Some(page) = v.integer_between("page", raw, 1, u64::from(u32::MAX))
    {
        filter.page = u32::try_from(page).unwrap_or(u32::MAX);
    }

    if let Some(raw) = present(query.per_page.as_deref())
        && let Some(per_page) = v.integer_between("per_page", raw, 1, u64::from(max_per_page))
    {
        filter.per_page = u32::try_from(per_page).unwrap_or(max_per_page);
    }

    v.finish()?;
    Ok(filter)
}

/// Validate audit log query parameters.
pub fn validate_log_query(query: &TaskLogQuery) -> AppResult<LogFilter> {
    let mut v = Validator::default();
    let mut filter = LogFilter::default();

    if let Some(raw) = present(query.action.as_deref()) {
        match raw.parse::<TaskAction>() {
            Ok(action) => filter.action = Some(action),
            Err(_) => v.invalid_choice("action"),
        }
    }

    if let Some(raw) = present(query.limit.as_deref())
        && let Some(limit) = v.integer_between("limit", raw, 1, MAX_LOG_LIMIT as u64)
    {
        filter.limit = usize::try_from(limit).unwrap_or(DEFAULT_LOG_LIMIT);
    }

    v.finish()?;
    Ok(filter)
}

/// `with_trashed` flag of the show endpoint.
pub fn validate_show_query(query: &ShowTaskQuery) -> AppResult<bool> {
    let mut v = Validator::default();
    let with_trashed = present(query.with_trashed.as_deref())
        .map(|raw| v.boolean("with_trashed", raw))
        .unwrap_or(false);
    v.finish()?;
    Ok(with_trashed)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 15).unwrap()
    }

    fn errors(result: AppResult<impl std::fmt::Debug>) -> FieldErrors {
        match result {
            Err(AppError::Validation(errors)) => errors,
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    fn create(title: Option<&str>) -> CreateTaskRequest {
        CreateTaskRequest {
            title: title.map(String::from),
            ..Default::default()
        }
    }

    #[test]
    fn test_create_minimal() {
        let task = validate_create(create(Some("  Buy milk ")), today()).unwrap();
        assert_eq!(task.title, "Buy milk");
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.description.is_none());
        assert!(task.due_date.is_none());
    }

    #[test]
    fn test_create_requires_title() {
        let errors = errors(validate_create(create(None), today()));
        assert_eq!(errors["title"], vec!["The title field is required."]);

        let errors = self::errors(validate_create(create(Some("   ")), today()));
        assert!(errors.contains_key("title"));
    }

    #[test]
    fn test_create_title_limit_counts_characters() {
        let title = "é".repeat(MAX_TITLE_LENGTH);
        assert!(validate_create(create(Some(&title)), today()).is_ok());

        let title = "a".repeat(MAX_TITLE_LENGTH + 1);
        let errors = errors(validate_create(create(Some(&title)), today()));
        assert_eq!(
            errors["title"],
            vec!["The title field must not be greater than 255 characters."]
        );
    }

    #[test]
    fn test_create_collects_every_failure() {
        let request = CreateTaskRequest {
            title: None,
            description: Some("x".repeat(MAX_DESCRIPTION_LENGTH + 1)),
            status: Some("done".to_string()),
            due_date: Some("15/06/2025".to_string()),
        };

        let errors = errors(validate_create(request, today()));
        assert_eq!(errors.len(), 4);
        assert_eq!(errors["status"], vec!["The selected status is invalid."]);
        assert_eq!(
            errors["due_date"],
            vec!["The due date field must match the format Y-m-d."]
        );
    }

    #[test]
    fn test_create_due_date_not_in_past() {
        let mut request = create(Some("Plan"));
        request.due_date = Some("2025-06-14".to_string());
        let errors = errors(validate_create(request, today()));
        assert_eq!(
            errors["due_date"],
            vec!["The due date field must be a date after or equal to today."]
        );

        let mut request = create(Some("Plan"));
        request.due_date = Some("2025-06-15".to_string());
        let task = validate_create(request, today()).unwrap();
        assert_eq!(task.due_date, Some(today()));
    }

    #[test]
    fn test_update_handles_null_and_missing() {
        let request = UpdateTaskRequest {
            description: Some(None),
            due_date: Some(Some("2001-01-01".to_string())),
            ..Default::default()
        };

        let changes = validate_update(request).unwrap();
        assert_eq!(changes.description, Some(None));
        assert_eq!(changes.due_date, NaiveDate::from_ymd_opt(2001, 1, 1).map(Some));
        assert!(changes.title.is_none());
        assert!(changes.status.is_none());
    }

    #[test]
    fn test_update_rejects_null_title() {
        let request = UpdateTaskRequest {
            title: Some(None),
            status: Some(Some("archived".to_string())),
            ..Default::default()
        };

        let errors = errors(validate_update(request));
        assert_eq!(errors["title"], vec!["The title field is required."]);
        assert_eq!(errors["status"], vec!["The selected status is invalid."]);
    }

    #[test]
    fn test_list_query_defaults() {
        let filter = validate_list_query(&TaskListQuery::default(), 15, 100, today()).unwrap();
        assert_eq!(filter, TaskFilter::new(15, today()));
    }

    #[test]
    fn test_list_query_parses_everything() {
        let query = TaskListQuery {
            status: Some("in_progress".into()),
            search: Some(" report ".into()),
            overdue: Some("1".into()),
            due_before: Some("2025-07-01".into()),
            due_after: Some("2025-06-01".into()),
            trashed: Some("only".into()),
            sort_by: Some("due_date".into()),
            sort_direction: Some("ASC".into()),
            page: Some("2".into()),
            per_page: Some("50".into()),
        };

        let filter = validate_list_query(&query, 15, 100, today()).unwrap();
        assert_eq!(filter.status, Some(TaskStatus::InProgress));
        assert_eq!(filter.search.as_deref(), Some("report"));
        assert!(filter.overdue);
        assert_eq!(filter.trashed, TrashedMode::Only);
        assert_eq!(filter.sort, SortColumn::DueDate);
        assert_eq!(filter.direction, SortDirection::Asc);
        assert_eq!(filter.page, 2);
        assert_eq!(filter.per_page, 50);
    }

    #[test]
    fn test_list_query_bounds() {
        let query = TaskListQuery {
            page: Some("0".into()),
            per_page: Some("101".into()),
            sort_by: Some("password".into()),
            trashed: Some("all".into()),
            ..Default::default()
        };

        let errors = errors(validate_list_query(&query, 15, 100, today()));
        assert_eq!(errors["page"], vec!["The page field must be at least 1."]);
        assert_eq!(
            errors["per_page"],
            vec!["The per page field must be between 1 and 100."]
        );
        assert!(errors.contains_key("sort_by"));
        assert!(errors.contains_key("trashed"));
    }

    #[test]
    fn test_list_query_non_numeric_page() {
        let query = TaskListQuery {
            page: Some("two".into()),
            ..Default::default()
        };
        let errors = errors(validate_list_query(&query, 15, 100, today()));
        assert_eq!(errors["page"], vec!["The page field must be an integer."]);
    }

    #[test]
    fn test_log_query() {
        let filter = validate_log_query(&TaskLogQuery::default()).unwrap();
        assert_eq!(filter.limit, DEFAULT_LOG_LIMIT);
        assert!(filter.action.is_none());

        let query = TaskLogQuery {
            action: Some("restored".into()),
            limit: Some("100".into()),
        };
        let filter = validate_log_query(&query).unwrap();
        assert_eq!(filter.action, Some(TaskAction::Restored));
        assert_eq!(filter.limit, 100);

        let query = TaskLogQuery {
            action: Some("exploded".into()),
            limit: Some("101".into()),
        };
        let errors = errors(validate_log_query(&query));
        assert!(errors.contains_key("action"));
        assert!(errors.contains_key("limit"));
    }

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn test_show_query() {
        let query = ShowTaskQuery {
            with_trashed: Some("true".into()),
        };
        assert!(validate_show_query(&query).unwrap());
        assert!(!validate_show_query(&ShowTaskQuery::default()).unwrap());
    }
}
