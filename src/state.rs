//! Shared application state for Axum handlers and middleware.
//!
//! Holds the task service, the audit and counter stores, the database pool
//! and the configuration. Everything is behind `Arc` so cloning per request
//! is cheap.
//!
//! # Background Tasks
//!
//! Spawned on construction and tracked with `TaskTracker` +
//! `CancellationToken`:
//!
//! - stats refresh every `STATS_CACHE_TTL_SECS` (feeds `/stats`)
//! - expired counter sweep every `CACHE_SWEEP_INTERVAL_SECS`
//! - audit store probe every `HEALTH_CHECK_INTERVAL_SECS` (feeds the
//!   `taskboard_audit_store_up` gauge)
//!
//! Call `shutdown()` before exit to stop and await them.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, trace, warn};

use crate::audit::{AuditLogStore, AuditLogger, IggyAuditLogStore, IggySettings, InMemoryAuditLogStore};
use crate::cache::{CounterStore, InMemoryCounterStore, SqliteCounterStore};
use crate::config::{AuditBackend, CacheBackend, Config};
use crate::error::{AppError, AppResult};
use crate::metrics;
use crate::middleware::{ThreatDetector, TrustedProxyConfig};
use crate::models::TaskStats;
use crate::repository::{DbPool, SqliteTaskRepository, create_pool, run_migrations};
use crate::services::TaskService;

/// Task counts computed in the background for `/stats`.
#[derive(Debug, Clone, Default)]
pub struct CachedStats {
    pub tasks: TaskStats,
    pub last_updated: Option<Instant>,
}

impl CachedStats {
    /// Check if the cache hasn't been updated within `ttl`.
    pub fn is_stale(&self, ttl: Duration) -> bool {
        match self.last_updated {
            Some(updated) => updated.elapsed() > ttl,
            None => true,
        }
    }
}

/// Shared application state.
///
/// ```rust,ignore
/// let state = AppState::from_config(config).await?;
/// // ... serve ...
/// state.shutdown().await;
/// ```
#[derive(Clone)]
pub struct AppState {
    pub tasks: TaskService,
    pub audit: Arc<dyn AuditLogStore>,
    pub counters: Arc<dyn CounterStore>,
    pub pool: DbPool,
    pub trusted_proxies: Arc<TrustedProxyConfig>,
    pub threat_detector: Arc<ThreatDetector>,
    pub started_at: Instant,
    pub config: Arc<Config>,
    stats_cache: Arc<RwLock<CachedStats>>,
    task_tracker: TaskTracker,
    cancellation_token: CancellationToken,
}

impl AppState {
    /// Open the database, run migrations and connect the configured stores.
    ///
    /// # Errors
    ///
    /// Fails if the database cannot be opened or migrated, or if the Iggy
    /// audit backend is selected and unreachable.
    pub async fn from_config(config: Config) -> AppResult<Self> {
        let pool = create_pool(&config.database_url, config.database_max_connections).await?;
        run_migrations(&pool).await?;
        info!(url = %config.database_url, "Task database ready");

        let audit: Arc<dyn AuditLogStore> = match config.audit_backend {
            AuditBackend::Iggy => {
                let store = IggyAuditLogStore::connect(IggySettings::from(&config)).await?;
                info!(
                    stream = %config.audit_stream,
                    topic = %config.audit_topic,
                    "Audit log store connected to Iggy"
                );
                Arc::new(store)
            }
            AuditBackend::Memory => {
                warn!("Using in-memory audit log store; history is lost on restart");
                Arc::new(InMemoryAuditLogStore::new())
            }
        };

        let counters: Arc<dyn CounterStore> = match config.cache_backend {
            CacheBackend::Memory => Arc::new(InMemoryCounterStore::new()),
            CacheBackend::Database => Arc::new(SqliteCounterStore::new(pool.clone())),
        };

        Self::new(config, pool, audit, counters)
    }

    /// Assemble state from already-open stores and start background tasks.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn new(
        config: Config,
        pool: DbPool,
        audit: Arc<dyn AuditLogStore>,
        counters: Arc<dyn CounterStore>,
    ) -> AppResult<Self> {
        let threat_detector = ThreatDetector::new()
            .map_err(|e| AppError::ConfigError(format!("Invalid threat pattern: {e}")))?;

        let tasks = TaskService::new(
            Arc::new(SqliteTaskRepository::new(pool.clone())),
            AuditLogger::new(audit.clone(), config.audit_write_timeout),
            config.default_per_page,
            config.max_per_page,
        );

        let state = Self {
            tasks,
            audit,
            counters,
            pool,
            trusted_proxies: Arc::new(TrustedProxyConfig::new(&config.trusted_proxies)),
            threat_detector: Arc::new(threat_detector),
            started_at: Instant::now(),
            config: Arc::new(config),
            stats_cache: Arc::new(RwLock::new(CachedStats::default())),
            task_tracker: TaskTracker::new(),
            cancellation_token: CancellationToken::new(),
        };

        state.spawn_stats_refresh_task();
        state.spawn_counter_sweep_task();
        state.spawn_audit_probe_task();

        Ok(state)
    }

    pub async fn cached_stats(&self) -> CachedStats {
        self.stats_cache.read().await.clone()
    }

    /// Recompute task counts now.
    pub async fn refresh_stats(&self) {
        if let Err(e) = refresh_stats_impl(&self.tasks, &self.stats_cache).await {
            warn!(error = %e, "Failed to refresh stats cache");
        }
    }

    fn spawn_stats_refresh_task(&self) {
        let tasks = self.tasks.clone();
        let stats_cache = self.stats_cache.clone();
        let ttl = self.config.stats_cache_ttl;
        let cancel = self.cancellation_token.clone();

        self.task_tracker.spawn(async move {
            if let Err(e) = refresh_stats_impl(&tasks, &stats_cache).await {
                warn!(error = %e, "Initial stats refresh failed");
            }

            let mut ticker = interval(ttl);
            ticker.tick().await; // Skip the first immediate tick

            loop {
                tokio::select! {
                    biased;

                    _ = cancel.cancelled() => {
                        debug!("Stats refresh task received cancellation signal");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = refresh_stats_impl(&tasks, &stats_cache).await {
                            warn!(error = %e, "Stats refresh failed");
                        }
                    }
                }
            }

            debug!("Stats refresh task shutting down");
        });
    }

    fn spawn_counter_sweep_task(&self) {
        let counters = self.counters.clone();
        let period = self.config.cache_sweep_interval;
        let cancel = self.cancellation_token.clone();

        self.task_tracker.spawn(async move {
            let mut ticker = interval(period);
            ticker.tick().await;

            loop {
                tokio::select! {
                    biased;

                    _ = cancel.cancelled() => {
                        debug!("Counter sweep task received cancellation signal");
                        break;
                    }
                    _ = ticker.tick() => {
                        match counters.purge_expired().await {
                            Ok(0) => trace!("Counter sweep: nothing expired"),
                            Ok(purged) => debug!(purged, backend = counters.backend(), "Expired counters purged"),
                            Err(e) => warn!(error = %e, "Counter sweep failed"),
                        }
                    }
                }
            }

            debug!("Counter sweep task shutting down");
        });
    }

    fn spawn_audit_probe_task(&self) {
        let audit = self.audit.clone();
        let period = self.config.health_check_interval;
        let cancel = self.cancellation_token.clone();

        self.task_tracker.spawn(async move {
            let mut ticker = interval(period);

            loop {
                tokio::select! {
                    biased;

                    _ = cancel.cancelled() => {
                        debug!("Audit probe task received cancellation signal");
                        break;
                    }
                    _ = ticker.tick() => {
                        let up = audit.is_healthy().await;
                        metrics::set_audit_store_up(up);
                        if up {
                            trace!(backend = audit.backend(), "Audit store probe OK");
                        } else {
                            warn!(backend = audit.backend(), "Audit store probe failed");
                        }
                    }
                }
            }

            debug!("Audit probe task shutting down");
        });
    }

    /// Cancel background tasks and wait for them to finish.
    pub async fn shutdown(&self) {
        info!("Initiating graceful shutdown of background tasks");

        self.cancellation_token.cancel();
        self.task_tracker.close();
        self.task_tracker.wait().await;

        info!("All background tasks have completed");
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

/// Shared by `AppState::refresh_stats` and the background task, which holds
/// only the fields it needs.
async fn refresh_stats_impl(
    tasks: &TaskService,
    stats_cache: &Arc<RwLock<CachedStats>>,
) -> AppResult<()> {
    let counts = tasks.stats().await?;

    let mut cache = stats_cache.write().await;
    *cache = CachedStats {
        tasks: counts,
        last_updated: Some(Instant::now()),
    };
    trace!("Stats cache refreshed successfully");

    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::models::{AuditContext, CreateTaskRequest};

    async fn state() -> AppState {
        let pool = create_pool("sqlite::memory:", 1).await.unwrap();
        run_migrations(&pool).await.unwrap();
        AppState::new(
            Config::default(),
            pool,
            Arc::new(InMemoryAuditLogStore::new()),
            Arc::new(InMemoryCounterStore::new()),
        )
        .unwrap()
    }

    #[test]
    fn test_cached_stats_staleness() {
        let empty = CachedStats::default();
        assert!(empty.is_stale(Duration::from_secs(60)));

        let fresh = CachedStats {
            last_updated: Some(Instant::now()),
            ..CachedStats::default()
        };
        assert!(!fresh.is_stale(Duration::from_secs(60)));
    }

    #[tokio::test]
    async fn test_refresh_stats_counts_tasks() {
        let state = state().await;

        let request = CreateTaskRequest {
            title: Some("Write report".into()),
            ..CreateTaskRequest::default()
        };
        state.tasks.create(request, &AuditContext::default()).await.unwrap();

        state.refresh_stats().await;
        let cached = state.cached_stats().await;
        assert_eq!(cached.tasks.total, 1);
        assert_eq!(cached.tasks.pending, 1);
        assert!(cached.last_updated.is_some());

        state.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_stops_background_tasks() {
        let state = state().await;
        tokio::time::timeout(Duration::from_secs(5), state.shutdown())
            .await
            .unwrap();
    }
}
