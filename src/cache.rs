//! Expiring counters backing the rate limiter and the threat guard.
//!
//! Two backends share the [`CounterStore`] contract:
//!
//! - [`InMemoryCounterStore`]: process-local `DashMap`, expired entries are
//!   dropped lazily on read and by [`CounterStore::purge_expired`].
//! - [`SqliteCounterStore`]: the `cache_counters` table, so counters survive
//!   restarts and are shared by every process using the same database file.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;

use crate::error::{AppError, AppResult};
use crate::repository::DbPool;

#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Current value, `None` when absent or expired.
    async fn get(&self, key: &str) -> AppResult<Option<u64>>;

    /// Add one and return the new value.
    ///
    /// An absent or expired counter restarts at 1 and expires after `ttl`.
    /// A live counter keeps its original expiry.
    async fn increment(&self, key: &str, ttl: Duration) -> AppResult<u64>;

    /// Time left before the counter expires.
    async fn ttl(&self, key: &str) -> AppResult<Option<Duration>>;

    async fn forget(&self, key: &str) -> AppResult<()>;

    /// Drop expired counters, returning how many were removed.
    async fn purge_expired(&self) -> AppResult<usize>;

    fn backend(&self) -> &'static str;
}

#[derive(Debug, Clone, Copy)]
struct CounterEntry {
    value: u64,
    expires_at: Instant,
}

/// Process-local counter store.
#[derive(Debug, Default)]
pub struct InMemoryCounterStore {
    entries: DashMap<String, CounterEntry>,
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live entry for `key`, evicting it if it has expired.
    fn live(&self, key: &str) -> Option<CounterEntry> {
        let now = Instant::now();
        let entry = self.entries.get(key).map(|e| *e)?;
        if entry.expires_at > now {
            Some(entry)
        } else {
            self.entries.remove_if(key, |_, e| e.expires_at <= now);
            None
        }
    }
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn get(&self, key: &str) -> AppResult<Option<u64>> {
        Ok(self.live(key).map(|e| e.value))
    }

    async fn increment(&self, key: &str, ttl: Duration) -> AppResult<u64> {
        let now = Instant::now();
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert(CounterEntry {
                value: 0,
                expires_at: now + ttl,
            });

        if entry.expires_at <= now {
            entry.value = 0;
            entry.expires_at = now + ttl;
        }
        entry.value += 1;

        Ok(entry.value)
    }

    async fn ttl(&self, key: &str) -> AppResult<Option<Duration>> {
        Ok(self
            .live(key)
            .map(|e| e.expires_at.saturating_duration_since(Instant::now())))
    }

    async fn forget(&self, key: &str) -> AppResult<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn purge_expired(&self) -> AppResult<usize> {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, e| e.expires_at > now);
        Ok(before.saturating_sub(self.entries.len()))
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

/// Counter store on the `cache_counters` table.
#[derive(Debug, Clone)]
pub struct SqliteCounterStore {
    pool: DbPool,
}

impl SqliteCounterStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn duration_millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

fn store_error(e: sqlx::Error) -> AppError {
    AppError::CounterStore(e.to_string())
}

#[async_trait]
impl CounterStore for SqliteCounterStore {
    async fn get(&self, key: &str) -> AppResult<Option<u64>> {
        let value: Option<i64> =
            sqlx::query_scalar("SELECT value FROM cache_counters WHERE key = ? AND expires_at > ?")
                .bind(key)
                .bind(now_millis())
                .fetch_optional(&self.pool)
                .await
                .map_err(store_error)?;

        Ok(value.map(|v| u64::try_from(v).unwrap_or_default()))
    }

    async fn increment(&self, key: &str, ttl: Duration) -> AppResult<u64> {
        let now = now_millis();
        let expires_at = now.saturating_add(duration_millis(ttl));

        // SET expressions all see the pre-update row
        let value: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO cache_counters (key, value, expires_at) VALUES (?, 1, ?)
            ON CONFLICT(key) DO UPDATE SET
                value = CASE WHEN cache_counters.expires_at <= ? THEN 1
                             ELSE cache_counters.value + 1 END,
                expires_at = CASE WHEN cache_counters.expires_at <= ? THEN excluded.expires_at
                                  ELSE cache_counters.expires_at END
            RETURNING value
            "#,
        )
        .bind(key)
        .bind(expires_at)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(store_error)?;

        Ok(u64::try_from(value).unwrap_or_default())
    }

    async fn ttl(&self, key: &str) -> AppResult<Option<Duration>> {
        let now = now_millis();
        let expires_at: Option<i64> = sqlx::query_scalar(
            "SELECT expires_at FROM cache_counters WHERE key = ? AND expires_at > ?",
        )
        .bind(key)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error)?;

        Ok(expires_at.map(|at| Duration::from_millis(u64::try_from(at - now).unwrap_or_default())))
    }

    async fn forget(&self, key: &str) -> AppResult<()> {
        sqlx::query("DELETE FROM cache_counters WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(store_error)?;
        Ok(())
    }

    async fn purge_expired(&self) -> AppResult<usize> {
        let result = sqlx::query("DELETE FROM cache_counters WHERE expires_at <= ?")
            .bind(now_millis())
            .execute(&self.pool)
            .await
            .map_err(store_error)?;

        Ok(usize::try_from(result.rows_affected()).unwrap_or(usize::MAX))
    }

    fn backend(&self) -> &'static str {
        "database"
    }
}
