//! Audit log store on an Apache Iggy stream.
//!
//! Each [`TaskLog`] is one JSON message in the configured stream/topic. The
//! task id is the messages key, so every entry for a task lands on the same
//! partition in write order.
//!
//! # Resilience
//!
//! - Every SDK call is bounded by `operation_timeout`
//! - A connection error triggers one reconnect (exponential backoff with
//!   ±20% jitter) and a single retry
//! - Concurrent callers share a single reconnect via [`ConnectionState`]
//!
//! # Reads
//!
//! Iggy has no secondary indexes. Reads scan the newest `read_limit`
//! messages of each partition and filter in memory, which keeps history
//! queries bounded no matter how large the topic grows.

mod connection;
mod helpers;

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use iggy::prelude::*;
use tokio::sync::RwLock;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};

use super::AuditLogStore;
use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::models::{TaskAction, TaskLog};

pub use connection::{ConnectionState, ReconnectGuard};
pub use helpers::{backoff_delay, map_iggy_error, rand_jitter, to_identifier};

/// Consumer id used for history scans. Offsets are never committed.
const READER_CONSUMER_ID: u32 = 1;

/// Messages fetched per poll while scanning a partition.
const SCAN_PAGE_SIZE: u64 = 100;

/// Connection and layout settings, taken from [`Config`].
#[derive(Debug, Clone)]
pub struct IggySettings {
    pub connection_string: String,
    pub stream: String,
    pub topic: String,
    pub partitions: u32,
    /// Newest messages scanned per partition on reads
    pub read_limit: u64,
    /// 0 = retry forever
    pub max_reconnect_attempts: u32,
    pub reconnect_base_delay: Duration,
    pub reconnect_max_delay: Duration,
    pub operation_timeout: Duration,
}

impl From<&Config> for IggySettings {
    fn from(config: &Config) -> Self {
        Self {
            connection_string: config.iggy_connection_string.clone(),
            stream: config.audit_stream.clone(),
            topic: config.audit_topic.clone(),
            partitions: config.audit_partitions,
            read_limit: u64::from(config.audit_read_limit),
            max_reconnect_attempts: config.max_reconnect_attempts,
            reconnect_base_delay: config.reconnect_base_delay,
            reconnect_max_delay: config.reconnect_max_delay,
            operation_timeout: config.operation_timeout,
        }
    }
}

/// [`AuditLogStore`] backed by Iggy. Cheap to clone.
///
/// The client sits behind a `RwLock`: operations share a read lock, and a
/// reconnect swaps in a fresh client under the write lock.
#[derive(Clone)]
pub struct IggyAuditLogStore {
    client: Arc<RwLock<IggyClient>>,
    settings: Arc<IggySettings>,
    state: Arc<ConnectionState>,
}

impl IggyAuditLogStore {
    /// Connect and make sure the stream and topic exist.
    ///
    /// # Errors
    ///
    /// `ConnectionFailed` when the connection string is invalid or the server
    /// is unreachable. No retry happens on this first connection.
    #[instrument(skip(settings), fields(stream = %settings.stream, topic = %settings.topic))]
    pub async fn connect(settings: IggySettings) -> AppResult<Self> {
        info!("Connecting audit log store to Iggy");

        let client = IggyClient::from_connection_string(&settings.connection_string)
            .map_err(|e| AppError::ConnectionFailed(e.to_string()))?;

        let store = Self {
            client: Arc::new(RwLock::new(client)),
            settings: Arc::new(settings),
            state: Arc::new(ConnectionState::new()),
        };

        {
            let client = store.client.read().await;
            client
                .connect()
                .await
                .map_err(|e| AppError::ConnectionFailed(e.to_string()))?;
        }
        store.state.set_connected(true);

        store.initialize().await?;
        info!("Audit log store ready");

        Ok(store)
    }

    pub fn settings(&self) -> &IggySettings {
        &self.settings
    }

    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    // =========================================================================
    // Connection Management
    // =========================================================================

    /// Replace the client with a freshly connected one.
    ///
    /// Only one task reconnects at a time; concurrent callers wait for its
    /// outcome instead of starting their own attempt.
    #[instrument(skip(self))]
    async fn reconnect(&self) -> AppResult<()> {
        let Some(_guard) = self.state.begin_reconnect() else {
            debug!("Reconnection already in progress, waiting for completion");
            self.state.wait_for_reconnect().await;

            return if self.state.is_connected() {
                Ok(())
            } else {
                Err(AppError::ConnectionFailed(
                    "Reconnection failed (attempted by another task)".to_string(),
                ))
            };
        };

        self.state.set_connected(false);
        let max_attempts = self.settings.max_reconnect_attempts;

        loop {
            let attempt = self.state.next_attempt();

            if max_attempts > 0 && attempt > max_attempts {
                error!(attempts = attempt - 1, max_attempts, "Maximum reconnection attempts exceeded");
                return Err(AppError::ConnectionFailed(format!(
                    "Failed to reconnect after {max_attempts} attempts"
                )));
            }

            let delay = backoff_delay(
                attempt,
                self.settings.reconnect_base_delay,
                self.settings.reconnect_max_delay,
                rand_jitter(),
            );
            warn!(attempt, delay_ms = delay.as_millis() as u64, "Reconnecting to Iggy");
            sleep(delay).await;

            let fresh = match IggyClient::from_connection_string(&self.settings.connection_string) {
                Ok(client) => client,
                Err(e) => {
                    warn!(attempt, error = %e, "Failed to create new client");
                    continue;
                }
            };

            if let Err(e) = fresh.connect().await {
                warn!(attempt, error = %e, "Reconnection attempt failed");
                continue;
            }

            *self.client.write().await = fresh;
            self.state.set_connected(true);
            info!(attempt, "Reconnected to Iggy");
            return Ok(());
        }
    }

    fn is_connection_error(error: &AppError) -> bool {
        matches!(
            error,
            AppError::ConnectionFailed(_) | AppError::Disconnected(_)
        )
    }

    /// Run `operation` under the operation timeout, reconnecting and retrying
    /// once on a connection error.
    ///
    /// A timeout only triggers a reconnect when the link is already known to
    /// be down; a slow server is reported as `OperationTimeout`.
    async fn with_reconnect<F, Fut, T>(&self, operation: F) -> AppResult<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = AppResult<T>>,
    {
        let limit = self.settings.operation_timeout;

        match tokio::time::timeout(limit, operation()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) if Self::is_connection_error(&e) => {
                warn!(error = %e, "Audit store operation lost its connection, reconnecting");
            }
            Ok(Err(e)) => return Err(e),
            Err(_) if !self.state.is_connected() => {
                warn!(timeout = ?limit, "Audit store operation timed out while disconnected");
            }
            Err(_) => {
                return Err(AppError::OperationTimeout(format!(
                    "audit store operation exceeded {limit:?}"
                )));
            }
        }

        self.reconnect().await?;

        match tokio::time::timeout(limit, operation()).await {
            Ok(result) => result,
            Err(_) => Err(AppError::OperationTimeout(format!(
                "audit store operation exceeded {limit:?} on retry"
            ))),
        }
    }

    // =========================================================================
    // Stream & Topic Initialization
    // =========================================================================

    /// Create the stream if missing. Idempotent.
    #[instrument(skip(self))]
    pub async fn ensure_stream(&self) -> AppResult<()> {
        let name = self.settings.stream.as_str();
        self.with_reconnect(|| async {
            let client = self.client.read().await;
            let stream_id = to_identifier(name, "stream")?;

            match client.get_stream(&stream_id).await {
                Ok(Some(_)) => {
                    debug!(stream = name, "Stream already exists");
                    Ok(())
                }
                Ok(None) | Err(_) => {
                    info!(stream = name, "Creating stream");
                    client
                        .create_stream(name)
                        .await
                        .map_err(|e| map_iggy_error("create stream", e))?;
                    Ok(())
                }
            }
        })
        .await
    }

    /// Create the topic if missing. Idempotent.
    #[instrument(skip(self))]
    pub async fn ensure_topic(&self) -> AppResult<()> {
        let stream = self.settings.stream.as_str();
        let topic = self.settings.topic.as_str();
        let partitions = self.settings.partitions;

        self.with_reconnect(|| async {
            let client = self.client.read().await;
            let stream_id = to_identifier(stream, "stream")?;
            let topic_id = to_identifier(topic, "topic")?;

            match client.get_topic(&stream_id, &topic_id).await {
                Ok(Some(_)) => {
                    debug!(stream, topic, "Topic already exists");
                    Ok(())
                }
                Ok(None) | Err(_) => {
                    info!(stream, topic, partitions, "Creating topic");
                    client
                        .create_topic(
                            &stream_id,
                            topic,
                            partitions,
                            Default::default(),
                            None,
                            IggyExpiry::NeverExpire,
                            MaxTopicSize::Unlimited,
                        )
                        .await
                        .map_err(|e| map_iggy_error("create topic", e))?;
                    Ok(())
                }
            }
        })
        .await
    }

    pub async fn initialize(&self) -> AppResult<()> {
        self.ensure_stream().await?;
        self.ensure_topic().await
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Newest `read_limit` entries of one partition, oldest first.
    #[instrument(skip(self))]
    async fn scan_partition(&self, partition_id: u32) -> AppResult<Vec<TaskLog>> {
        let read_limit = self.settings.read_limit.max(1);

        self.with_reconnect(|| async move {
            let client = self.client.read().await;
            let stream_id = to_identifier(&self.settings.stream, "stream")?;
            let topic_id = to_identifier(&self.settings.topic, "topic")?;
            let consumer = Consumer::new(
                Identifier::numeric(READER_CONSUMER_ID)
                    .map_err(|e| map_iggy_error("consumer id", e))?,
            );

            // A one-message poll reports the partition's current offset
            let probe = client
                .poll_messages(
                    &stream_id,
                    &topic_id,
                    Some(partition_id),
                    &consumer,
                    &PollingStrategy::offset(0),
                    1,
                    false,
                )
                .await
                .map_err(|e| map_iggy_error("poll audit log", e))?;

            if probe.messages.is_empty() {
                return Ok(Vec::new());
            }

            let last = probe.current_offset;
            let mut offset = (last + 1).saturating_sub(read_limit);
            let mut logs = Vec::new();

            while offset <= last {
                let count = (last - offset + 1).min(SCAN_PAGE_SIZE);
                let batch = client
                    .poll_messages(
                        &stream_id,
                        &topic_id,
                        Some(partition_id),
                        &consumer,
                        &PollingStrategy::offset(offset),
                        u32::try_from(count).unwrap_or(u32::MAX),
                        false,
                    )
                    .await
                    .map_err(|e| map_iggy_error("poll audit log", e))?;

                if batch.messages.is_empty() {
                    break;
                }

                for message in &batch.messages {
                    offset = message.header.offset + 1;
                    match serde_json::from_slice::<TaskLog>(&message.payload) {
                        Ok(log) => logs.push(log),
                        Err(e) => warn!(
                            partition_id,
                            offset = message.header.offset,
                            error = %e,
                            "Skipping undecodable audit message"
                        ),
                    }
                }
            }

            debug!(partition_id, count = logs.len(), "Scanned audit partition");
            Ok(logs)
        })
        .await
    }

    /// Scan every partition, keep entries matching `keep`, newest first.
    async fn scan<P>(&self, keep: P, limit: usize) -> AppResult<Vec<TaskLog>>
    where
        P: Fn(&TaskLog) -> bool,
    {
        let mut logs = Vec::new();
        for partition_id in 0..self.settings.partitions.max(1) {
            logs.extend(
                self.scan_partition(partition_id)
                    .await?
                    .into_iter()
                    .filter(|log| keep(log)),
            );
        }

        logs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        logs.truncate(limit);
        Ok(logs)
    }
}

#[async_trait]
impl AuditLogStore for IggyAuditLogStore {
    #[instrument(skip(self, log), fields(task_id = log.task_id, action = %log.action))]
    async fn append(&self, log: &TaskLog) -> AppResult<()> {
        let payload = serde_json::to_string(log)?;
        let key = log.task_id.to_string();

        self.with_reconnect(|| async {
            let client = self.client.read().await;
            let stream_id = to_identifier(&self.settings.stream, "stream")?;
            let topic_id = to_identifier(&self.settings.topic, "topic")?;

            let message =
                IggyMessage::from_str(&payload).map_err(|e| map_iggy_error("encode audit log", e))?;
            let partitioning = Partitioning::messages_key_str(&key)
                .map_err(|e| map_iggy_error("partition key", e))?;

            let mut messages = vec![message];
            client
                .send_messages(&stream_id, &topic_id, &partitioning, &mut messages)
                .await
                .map_err(|e| map_iggy_error("send audit log", e))?;

            debug!("Audit log appended");
            Ok(())
        })
        .await
    }

    async fn for_task(&self, task_id: i64, limit: usize) -> AppResult<Vec<TaskLog>> {
        self.scan(|log| log.task_id == task_id, limit).await
    }

    async fn recent(&self, action: Option<TaskAction>, limit: usize) -> AppResult<Vec<TaskLog>> {
        self.scan(|log| action.is_none_or(|a| log.action == a), limit)
            .await
    }

    async fn is_healthy(&self) -> bool {
        self.state.is_connected()
    }

    fn backend(&self) -> &'static str {
        "iggy"
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_errors_trigger_reconnect() {
        assert!(IggyAuditLogStore::is_connection_error(&AppError::ConnectionFailed(
            "refused".into()
        )));
        assert!(IggyAuditLogStore::is_connection_error(&AppError::Disconnected(
            "reset".into()
        )));
    }

    #[test]
    fn test_other_errors_do_not_reconnect() {
        for error in [
            AppError::AuditStore("topic missing".into()),
            AppError::OperationTimeout("slow".into()),
            AppError::ConfigError("bad name".into()),
            AppError::Internal("bug".into()),
        ] {
            assert!(
                !IggyAuditLogStore::is_connection_error(&error),
                "{error:?} should not reconnect"
            );
        }
    }

    #[test]
    fn test_settings_from_config() {
        let config = Config {
            audit_stream: "audit".to_string(),
            audit_topic: "logs".to_string(),
            audit_partitions: 3,
            audit_read_limit: 250,
            ..Config::default()
        };

        let settings = IggySettings::from(&config);
        assert_eq!(settings.stream, "audit");
        assert_eq!(settings.topic, "logs");
        assert_eq!(settings.partitions, 3);
        assert_eq!(settings.read_limit, 250);
        assert_eq!(settings.operation_timeout, config.operation_timeout);
    }
}
