mod task_service;

pub use task_service::TaskService;
