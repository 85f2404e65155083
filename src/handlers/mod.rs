mod fallback;
mod health;
mod logs;
mod tasks;

pub use fallback::{method_not_allowed, not_found};
pub use health::{health_check, readiness_check, stats};
pub use logs::{recent_logs, task_logs};
pub use tasks::{
    create_task, delete_task, force_delete_task, list_tasks, restore_task, show_task, update_task,
};
