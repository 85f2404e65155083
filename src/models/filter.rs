//! Validated query scopes for task listings and audit log reads.

use chrono::NaiveDate;

use super::task::TaskStatus;
use super::task_log::TaskAction;

/// How soft-deleted tasks take part in a listing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TrashedMode {
    /// Only live tasks
    #[default]
    Exclude,
    /// Live and trashed tasks
    With,
    /// Only trashed tasks
    Only,
}

/// Sortable columns. The SQL column name comes from this whitelist only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortColumn {
    Id,
    Title,
    Status,
    DueDate,
    #[default]
    CreatedAt,
    UpdatedAt,
}

impl SortColumn {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "id" => Some(Self::Id),
            "title" => Some(Self::Title),
            "status" => Some(Self::Status),
            "due_date" => Some(Self::DueDate),
            "created_at" => Some(Self::CreatedAt),
            "updated_at" => Some(Self::UpdatedAt),
            _ => None,
        }
    }

    pub fn column(&self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::Title => "title",
            Self::Status => "status",
            Self::DueDate => "due_date",
            Self::CreatedAt => "created_at",
            Self::UpdatedAt => "updated_at",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

impl SortDirection {
    pub fn keyword(&self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// Task listing filter built from `GET /api/tasks` query parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    /// Case-insensitive substring of title or description
    pub search: Option<String>,
    /// Only open tasks whose due date is before `today`
    pub overdue: bool,
    pub due_before: Option<NaiveDate>,
    pub due_after: Option<NaiveDate>,
    pub trashed: TrashedMode,
    pub sort: SortColumn,
    pub direction: SortDirection,
    /// 1-based page number
    pub page: u32,
    pub per_page: u32,
    /// Reference date for the overdue scope
    pub today: NaiveDate,
}

impl TaskFilter {
    /// Unfiltered first page.
    pub fn new(per_page: u32, today: NaiveDate) -> Self {
        Self {
            status: None,
            search: None,
            overdue: false,
            due_before: None,
            due_after: None,
            trashed: TrashedMode::Exclude,
            sort: SortColumn::default(),
            direction: SortDirection::default(),
            page: 1,
            per_page,
            today,
        }
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.per_page)
    }
}

/// Audit log read filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogFilter {
    pub action: Option<TaskAction>,
    pub limit: usize,
}

impl Default for LogFilter {
    fn default() -> Self {
        Self {
            action: None,
            limit: 50,
        }
    }
}

/// One page of results plus the total row count.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub per_page: u32,
}

impl<T> Page<T> {
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            page: self.page,
            per_page: self.per_page,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_offset() {
        let today = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        let mut filter = TaskFilter::new(15, today);
        assert_eq!(filter.offset(), 0);

        filter.page = 3;
        assert_eq!(filter.offset(), 30);
    }

    #[test]
    fn test_sort_column_whitelist() {
        assert_eq!(SortColumn::parse("due_date"), Some(SortColumn::DueDate));
        assert_eq!(SortColumn::parse("title; DROP TABLE tasks"), None);
        assert_eq!(SortColumn::default().column(), "created_at");
    }

    #[test]
    fn test_page_map_keeps_counts() {
        let page = Page {
            items: vec![1, 2, 3],
            total: 10,
            page: 2,
            per_page: 3,
        };
        let mapped = page.map(|n| n * 10);
        assert_eq!(mapped.items, vec![10, 20, 30]);
        assert_eq!(mapped.total, 10);
    }
}
