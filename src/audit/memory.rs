use async_trait::async_trait;
use tokio::sync::RwLock;

use super::AuditLogStore;
use crate::error::AppResult;
use crate::models::{TaskAction, TaskLog};

/// Process-local audit store. Used by the `memory` backend and in tests.
#[derive(Debug, Default)]
pub struct InMemoryAuditLogStore {
    logs: RwLock<Vec<TaskLog>>,
}

impl InMemoryAuditLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.logs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.logs.read().await.is_empty()
    }

    /// Newest-first entries matching `keep`, at most `limit`.
    async fn newest<P>(&self, keep: P, limit: usize) -> Vec<TaskLog>
    where
        P: Fn(&TaskLog) -> bool,
    {
        // Appends are chronological, so reverse insertion order is newest first
        self.logs
            .read()
            .await
            .iter()
            .rev()
            .filter(|log| keep(log))
            .take(limit)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl AuditLogStore for InMemoryAuditLogStore {
    async fn append(&self, log: &TaskLog) -> AppResult<()> {
        self.logs.write().await.push(log.clone());
        Ok(())
    }

    async fn for_task(&self, task_id: i64, limit: usize) -> AppResult<Vec<TaskLog>> {
        Ok(self.newest(|log| log.task_id == task_id, limit).await)
    }

    async fn recent(&self, action: Option<TaskAction>, limit: usize) -> AppResult<Vec<TaskLog>> {
        Ok(self
            .newest(|log| action.is_none_or(|a| log.action == a), limit)
            .await)
    }

    async fn is_healthy(&self) -> bool {
        true
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
