//! SQLite task repository

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use sqlx::{FromRow, QueryBuilder, Sqlite};

use super::{DbPool, TaskRepository};
use crate::error::{AppError, AppResult};
use crate::models::{NewTask, Page, Task, TaskFilter, TaskStats, TaskStatus, TrashedMode};
use crate::validation::DATE_FORMAT;

const TASK_COLUMNS: &str =
    "id, title, description, status, due_date, completed_at, created_at, updated_at, deleted_at";

pub struct SqliteTaskRepository {
    pool: DbPool,
}

impl SqliteTaskRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

/// Timestamps are stored as fixed-width RFC 3339 text so they sort correctly.
fn encode_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn encode_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

fn decode_timestamp(column: &str, raw: &str) -> AppResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| AppError::Internal(format!("corrupt {column} '{raw}': {e}")))
}

fn decode_optional_timestamp(column: &str, raw: Option<String>) -> AppResult<Option<DateTime<Utc>>> {
    raw.map(|raw| decode_timestamp(column, &raw)).transpose()
}

#[derive(FromRow)]
struct TaskRow {
    id: i64,
    title: String,
    description: Option<String>,
    status: String,
    due_date: Option<String>,
    completed_at: Option<String>,
    created_at: String,
    updated_at: String,
    deleted_at: Option<String>,
}

impl TryFrom<TaskRow> for Task {
    type Error = AppError;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        let due_date = row
            .due_date
            .map(|raw| {
                NaiveDate::parse_from_str(&raw, DATE_FORMAT)
                    .map_err(|e| AppError::Internal(format!("corrupt due_date '{raw}': {e}")))
            })
            .transpose()?;

        Ok(Task {
            id: row.id,
            title: row.title,
            description: row.description,
            status: row.status.parse::<TaskStatus>().map_err(AppError::Internal)?,
            due_date,
            completed_at: decode_optional_timestamp("completed_at", row.completed_at)?,
            created_at: decode_timestamp("created_at", &row.created_at)?,
            updated_at: decode_timestamp("updated_at", &row.updated_at)?,
            deleted_at: decode_optional_timestamp("deleted_at", row.deleted_at)?,
        })
    }
}

/// Escape `%`, `_` and the escape character itself for a `LIKE ... ESCAPE '\'`.
fn escape_like(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Append the WHERE clause for `filter`. Shared by the count and page queries.
fn push_filters(qb: &mut QueryBuilder<'_, Sqlite>, filter: &TaskFilter) {
    qb.push(" WHERE 1 = 1");

    match filter.trashed {
        TrashedMode::Exclude => {
            qb.push(" AND deleted_at IS NULL");
        }
        TrashedMode::Only => {
            qb.push(" AND deleted_at IS NOT NULL");
        }
        TrashedMode::With => {}
    }

    if let Some(status) = filter.status {
        qb.push(" AND status = ").push_bind(status.as_str());
    }

    // SQLite's LIKE folds ASCII case only; other characters match exactly
    if let Some(search) = &filter.search {
        let pattern = format!("%{}%", escape_like(search));
        qb.push(" AND (title LIKE ")
            .push_bind(pattern.clone())
            .push(" ESCAPE '\\' OR COALESCE(description, '') LIKE ")
            .push_bind(pattern)
            .push(" ESCAPE '\\')");
    }

    if filter.overdue {
        qb.push(" AND due_date IS NOT NULL AND due_date < ")
            .push_bind(encode_date(filter.today))
            .push(" AND status NOT IN ('completed', 'cancelled')");
    }

    if let Some(before) = filter.due_before {
        qb.push(" AND due_date <= ").push_bind(encode_date(before));
    }

    if let Some(after) = filter.due_after {
        qb.push(" AND due_date >= ").push_bind(encode_date(after));
    }
}

#[async_trait]
impl TaskRepository for SqliteTaskRepository {
    async fn insert(&self, task: NewTask) -> AppResult<Task> {
        let now = Utc::now();
        let now_text = encode_timestamp(now);

        let row: TaskRow = sqlx::query_as(&format!(
            "INSERT INTO tasks (title, description, status, due_date, completed_at, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?) RETURNING {TASK_COLUMNS}"
        ))
        .bind(&task.title)
        .bind(&task.description)
        .bind(task.status.as_str())
        .bind(task.due_date.map(encode_date))
        .bind(task.completed_at(now).map(encode_timestamp))
        .bind(&now_text)
        .bind(&now_text)
        .fetch_one(&self.pool)
        .await?;

        Task::try_from(row)
    }

    async fn find(&self, id: i64, include_trashed: bool) -> AppResult<Option<Task>> {
        let sql = if include_trashed {
            format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?")
        } else {
            format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ? AND deleted_at IS NULL")
        };

        let row: Option<TaskRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Task::try_from).transpose()
    }

    async fn list(&self, filter: &TaskFilter) -> AppResult<Page<Task>> {
        let mut count_query = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM tasks");
        push_filters(&mut count_query, filter);
        let total: i64 = count_query
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await?;

        let mut page_query = QueryBuilder::<Sqlite>::new(format!("SELECT {TASK_COLUMNS} FROM tasks"));
        push_filters(&mut page_query, filter);

        // Column and direction come from whitelisted enums, never from input
        let direction = filter.direction.keyword();
        page_query
            .push(format!(
                " ORDER BY {} {direction}, id {direction}",
                filter.sort.column()
            ))
            .push(" LIMIT ")
            .push_bind(i64::from(filter.per_page))
            .push(" OFFSET ")
            .push_bind(i64::try_from(filter.offset()).unwrap_or(i64::MAX));

        let rows: Vec<TaskRow> = page_query
            .build_query_as()
            .fetch_all(&self.pool)
            .await?;

        let items = rows
            .into_iter()
            .map(Task::try_from)
            .collect::<AppResult<Vec<_>>>()?;

        Ok(Page {
            items,
            total: u64::try_from(total).unwrap_or_default(),
            page: filter.page,
            per_page: filter.per_page,
        })
    }

    async fn update(&self, task: &Task) -> AppResult<Option<Task>> {
        let row: Option<TaskRow> = sqlx::query_as(&format!(
            "UPDATE tasks SET title = ?, description = ?, status = ?, due_date = ?, \
             completed_at = ?, updated_at = ? WHERE id = ? RETURNING {TASK_COLUMNS}"
        ))
        .bind(&task.title)
        .bind(&task.description)
        .bind(task.status.as_str())
        .bind(task.due_date.map(encode_date))
        .bind(task.completed_at.map(encode_timestamp))
        .bind(encode_timestamp(task.updated_at))
        .bind(task.id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Task::try_from).transpose()
    }

    async fn soft_delete(&self, id: i64, at: DateTime<Utc>) -> AppResult<Option<Task>> {
        let at = encode_timestamp(at);
        let row: Option<TaskRow> = sqlx::query_as(&format!(
            "UPDATE tasks SET deleted_at = ?, updated_at = ? \
             WHERE id = ? AND deleted_at IS NULL RETURNING {TASK_COLUMNS}"
        ))
        .bind(&at)
        .bind(&at)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Task::try_from).transpose()
    }

    async fn restore(&self, id: i64, at: DateTime<Utc>) -> AppResult<Option<Task>> {
        let row: Option<TaskRow> = sqlx::query_as(&format!(
            "UPDATE tasks SET deleted_at = NULL, updated_at = ? \
             WHERE id = ? AND deleted_at IS NOT NULL RETURNING {TASK_COLUMNS}"
        ))
        .bind(encode_timestamp(at))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Task::try_from).transpose()
    }

    async fn force_delete(&self, id: i64) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM tasks WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn count_by_status(&self, today: NaiveDate) -> AppResult<TaskStats> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT status, COUNT(*) FROM tasks WHERE deleted_at IS NULL GROUP BY status",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut stats = TaskStats::default();
        for (status, count) in rows {
            let count = u64::try_from(count).unwrap_or_default();
            stats.total += count;
            match status.parse::<TaskStatus>() {
                Ok(TaskStatus::Pending) => stats.pending = count,
                Ok(TaskStatus::InProgress) => stats.in_progress = count,
                Ok(TaskStatus::Completed) => stats.completed = count,
                Ok(TaskStatus::Cancelled) => stats.cancelled = count,
                Err(e) => tracing::warn!(error = %e, "Skipping unknown status in stats"),
            }
        }

        let overdue: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM tasks WHERE deleted_at IS NULL AND due_date IS NOT NULL \
             AND due_date < ? AND status NOT IN ('completed', 'cancelled')",
        )
        .bind(encode_date(today))
        .fetch_one(&self.pool)
        .await?;

        let trashed: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM tasks WHERE deleted_at IS NOT NULL")
                .fetch_one(&self.pool)
                .await?;

        stats.overdue = u64::try_from(overdue).unwrap_or_default();
        stats.trashed = u64::try_from(trashed).unwrap_or_default();

        Ok(stats)
    }

    async fn ping(&self) -> AppResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::models::{SortColumn, SortDirection};
    use crate::repository::{create_pool, run_migrations};

    async fn repository() -> SqliteTaskRepository {
        let pool = create_pool("sqlite::memory:", 1).await.unwrap();
        run_migrations(&pool).await.unwrap();
        SqliteTaskRepository::new(pool)
    }

    fn new_task(title: &str, status: TaskStatus, due: Option<&str>) -> NewTask {
        NewTask {
            title: title.to_string(),
            description: None,
            status,
            due_date: due.map(|d| NaiveDate::parse_from_str(d, DATE_FORMAT).unwrap()),
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 15).unwrap()
    }

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("100%_done\\"), "100\\%\\_done\\\\");
        assert_eq!(escape_like("plain"), "plain");
    }

    #[tokio::test]
    async fn test_insert_and_find() {
        let repo = repository().await;
        let task = repo
            .insert(new_task("Write docs", TaskStatus::Completed, Some("2025-07-01")))
            .await
            .unwrap();

        assert!(task.id > 0);
        assert!(task.completed_at.is_some());
        assert_eq!(task.created_at, task.updated_at);

        let found = repo.find(task.id, false).await.unwrap().unwrap();
        assert_eq!(found, task);
        assert!(repo.find(task.id + 1, true).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_soft_delete_restore_and_force_delete() {
        let repo = repository().await;
        let task = repo
            .insert(new_task("Temp", TaskStatus::Pending, None))
            .await
            .unwrap();

        let trashed = repo.soft_delete(task.id, Utc::now()).await.unwrap().unwrap();
        assert!(trashed.is_trashed());
        assert!(repo.find(task.id, false).await.unwrap().is_none());
        assert!(repo.find(task.id, true).await.unwrap().is_some());
        assert!(repo.soft_delete(task.id, Utc::now()).await.unwrap().is_none());

        let restored = repo.restore(task.id, Utc::now()).await.unwrap().unwrap();
        assert!(!restored.is_trashed());
        assert!(repo.restore(task.id, Utc::now()).await.unwrap().is_none());

        assert!(repo.force_delete(task.id).await.unwrap());
        assert!(!repo.force_delete(task.id).await.unwrap());
        assert!(repo.find(task.id, true).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_search_matches_non_ascii_text_exactly() {
        let repo = repository().await;
        repo.insert(new_task("Réserver le CAFÉ", TaskStatus::Pending, None))
            .await
            .unwrap();

        let mut exact = TaskFilter::new(15, today());
        exact.search = Some("CAFÉ".to_string());
        assert_eq!(repo.list(&exact).await.unwrap().total, 1);

        let mut ascii_folded = TaskFilter::new(15, today());
        ascii_folded.search = Some("réserver".to_string());
        assert_eq!(repo.list(&ascii_folded).await.unwrap().total, 1);
    }

    #[tokio::test]
    async fn test_list_filters_and_pagination() {
        let repo = repository().await;
        repo.insert(new_task("Alpha report", TaskStatus::Pending, Some("2025-06-01")))
            .await
            .unwrap();
        repo.insert(new_task("Beta 50% review", TaskStatus::InProgress, Some("2025-06-20")))
            .await
            .unwrap();
        repo.insert(new_task("Gamma report", TaskStatus::Completed, Some("2025-06-02")))
            .await
            .unwrap();
        let trashed = repo
            .insert(new_task("Delta", TaskStatus::Pending, None))
            .await
            .unwrap();
        repo.soft_delete(trashed.id, Utc::now()).await.unwrap();

        let all = repo.list(&TaskFilter::new(15, today())).await.unwrap();
        assert_eq!(all.total, 3);

        let mut search = TaskFilter::new(15, today());
        search.search = Some("REPORT".to_string());
        assert_eq!(repo.list(&search).await.unwrap().total, 2);

        let mut search = TaskFilter::new(15, today());
        search.search = Some("alpha REPORT".to_string());
        assert_eq!(repo.list(&search).await.unwrap().total, 1);

        let mut literal = TaskFilter::new(15, today());
        literal.search = Some("50%".to_string());
        let page = repo.list(&literal).await.unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].title, "Beta 50% review");

        let mut overdue = TaskFilter::new(15, today());
        overdue.overdue = true;
        let page = repo.list(&overdue).await.unwrap();
        assert_eq!(page.total, 1, "completed tasks are never overdue");
        assert_eq!(page.items[0].title, "Alpha report");

        let mut only_trashed = TaskFilter::new(15, today());
        only_trashed.trashed = TrashedMode::Only;
        assert_eq!(repo.list(&only_trashed).await.unwrap().total, 1);

        let mut with_trashed = TaskFilter::new(15, today());
        with_trashed.trashed = TrashedMode::With;
        assert_eq!(repo.list(&with_trashed).await.unwrap().total, 4);

        let mut sorted = TaskFilter::new(2, today());
        sorted.sort = SortColumn::Title;
        sorted.direction = SortDirection::Asc;
        sorted.page = 2;
        let page = repo.list(&sorted).await.unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].title, "Gamma report");

        let mut window = TaskFilter::new(15, today());
        window.due_after = NaiveDate::from_ymd_opt(2025, 6, 2);
        window.due_before = NaiveDate::from_ymd_opt(2025, 6, 30);
        assert_eq!(repo.list(&window).await.unwrap().total, 2);
    }

    #[tokio::test]
    async fn test_update_persists_changes() {
        let repo = repository().await;
        let task = repo
            .insert(new_task("Draft", TaskStatus::Pending, None))
            .await
            .unwrap();

        let mut changed = task.clone();
        changed.title = "Final".to_string();
        changed.description = Some("ready".to_string());
        changed.updated_at = Utc::now();

        let saved = repo.update(&changed).await.unwrap().unwrap();
        assert_eq!(saved.title, "Final");
        assert_eq!(saved.description.as_deref(), Some("ready"));

        repo.force_delete(task.id).await.unwrap();
        assert!(repo.update(&changed).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_count_by_status() {
        let repo = repository().await;
        repo.insert(new_task("a", TaskStatus::Pending, Some("2025-01-01")))
            .await
            .unwrap();
        repo.insert(new_task("b", TaskStatus::Pending, None))
            .await
            .unwrap();
        repo.insert(new_task("c", TaskStatus::Cancelled, Some("2025-01-01")))
            .await
            .unwrap();
        let gone = repo
            .insert(new_task("d", TaskStatus::Completed, None))
            .await
            .unwrap();
        repo.soft_delete(gone.id, Utc::now()).await.unwrap();

        let stats = repo.count_by_status(today()).await.unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.pending, 2);
        assert_eq!(stats.cancelled, 1);
        assert_eq!(stats.completed, 0);
        assert_eq!(stats.overdue, 1);
        assert_eq!(stats.trashed, 1);

        repo.ping().await.unwrap();
    }
}
