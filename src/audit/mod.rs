//! Audit trail of task mutations.
//!
//! Task rows live in SQLite; their history lives in a separate document
//! store behind [`AuditLogStore`]. Writes go through [`AuditLogger`], which
//! never lets an audit failure undo or fail a committed task mutation.

pub mod iggy_store;
mod memory;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::{AppError, AppResult};
use crate::metrics;
use crate::models::{TaskAction, TaskLog};

pub use iggy_store::{IggyAuditLogStore, IggySettings};
pub use memory::InMemoryAuditLogStore;

/// Append-only store of [`TaskLog`] documents.
#[async_trait]
pub trait AuditLogStore: Send + Sync {
    async fn append(&self, log: &TaskLog) -> AppResult<()>;

    /// History of one task, newest first.
    async fn for_task(&self, task_id: i64, limit: usize) -> AppResult<Vec<TaskLog>>;

    /// Latest entries across all tasks, newest first.
    async fn recent(&self, action: Option<TaskAction>, limit: usize) -> AppResult<Vec<TaskLog>>;

    async fn is_healthy(&self) -> bool;

    fn backend(&self) -> &'static str;
}

/// Best-effort writer in front of an [`AuditLogStore`].
///
/// Each append is capped at `write_timeout`, reconnects included, so a
/// broker outage delays a mutation response by at most that long.
#[derive(Clone)]
pub struct AuditLogger {
    store: Arc<dyn AuditLogStore>,
    write_timeout: Duration,
}

impl AuditLogger {
    pub fn new(store: Arc<dyn AuditLogStore>, write_timeout: Duration) -> Self {
        Self {
            store,
            write_timeout,
        }
    }

    pub fn store(&self) -> &Arc<dyn AuditLogStore> {
        &self.store
    }

    /// Append `log`, logging and counting any failure instead of returning it.
    ///
    /// Returns whether the entry was stored.
    pub async fn record(&self, log: &TaskLog) -> bool {
        let outcome = tokio::time::timeout(self.write_timeout, self.store.append(log))
            .await
            .unwrap_or_else(|_| {
                Err(AppError::OperationTimeout(format!(
                    "audit write exceeded {:?}",
                    self.write_timeout
                )))
            });

        match outcome {
            Ok(()) => {
                metrics::record_audit_write(true);
                debug!(task_id = log.task_id, action = %log.action, "Audit log written");
                true
            }
            Err(e) => {
                metrics::record_audit_write(false);
                warn!(
                    task_id = log.task_id,
                    action = %log.action,
                    log_id = %log.id,
                    backend = self.store.backend(),
                    error = %e,
                    "Failed to write audit log"
                );
                false
            }
        }
    }
}

/// Test store that accepts a write and never completes it.
#[cfg(test)]
pub(crate) struct StalledStore;

#[cfg(test)]
#[async_trait]
impl AuditLogStore for StalledStore {
    async fn append(&self, _log: &TaskLog) -> AppResult<()> {
        std::future::pending().await
    }

    async fn for_task(&self, _task_id: i64, _limit: usize) -> AppResult<Vec<TaskLog>> {
        Ok(Vec::new())
    }

    async fn recent(&self, _action: Option<TaskAction>, _limit: usize) -> AppResult<Vec<TaskLog>> {
        Ok(Vec::new())
    }

    async fn is_healthy(&self) -> bool {
        false
    }

    fn backend(&self) -> &'static str {
        "stalled"
    }
}
