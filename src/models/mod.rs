mod api;
mod filter;
mod task;
mod task_log;

pub use api::{
    CreateTaskRequest, DUE_SOON_DAYS, HealthResponse, ShowTaskQuery, StatsResponse, TaskListQuery,
    TaskLogQuery, TaskResource, TaskStats, UpdateTaskRequest,
};
pub use filter::{LogFilter, Page, SortColumn, SortDirection, TaskFilter, TrashedMode};
pub use task::{NewTask, Task, TaskChanges, TaskStatus};
pub use task_log::{AuditContext, TaskAction, TaskLog, changed_fields};
