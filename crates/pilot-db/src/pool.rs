//! Bounded database session pool.
//!
//! Two partitions share one set of credentials: the main pool for short
//! operations and a small long-running pool reserved for DDL, so index
//! builds never starve ordinary metadata traffic.

use pilot_config::{PilotConfig, PoolSettings};
use pilot_core::{PilotError, PilotResult};
use rand::Rng;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::pool::PoolConnection;
use sqlx::Postgres;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Acquisition retry attempts before `ConnectionUnavailable` surfaces.
const ACQUIRE_ATTEMPTS: u32 = 3;
/// Base delay for acquisition backoff.
const ACQUIRE_BASE_DELAY: Duration = Duration::from_millis(50);

/// Map a driver error onto the engine taxonomy.
#[must_use]
pub fn map_sqlx_error(error: &sqlx::Error) -> PilotError {
    match error {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
            PilotError::connection_unavailable(error.to_string())
        }
        sqlx::Error::Io(_) => PilotError::database(error.to_string(), true),
        sqlx::Error::Database(db_error) => {
            // Class 40 (transaction rollback) and 57P (operator intervention)
            // are worth a retry; everything else is not.
            let retryable = db_error
                .code()
                .map(|code| code.starts_with("40") || code.starts_with("57P"))
                .unwrap_or(false);
            PilotError::database(db_error.to_string(), retryable)
        }
        other => PilotError::database(other.to_string(), false),
    }
}

/// Health probe result.
#[derive(Debug, Clone)]
pub struct PoolHealth {
    /// Whether the probe round-trip succeeded.
    pub healthy: bool,
    /// Probe round-trip latency.
    pub latency: Duration,
    /// Errors observed since startup.
    pub error_count: u64,
}

/// Point-in-time pool statistics.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PoolStats {
    /// Open sessions in the main partition.
    pub size: u32,
    /// Idle sessions in the main partition.
    pub idle: usize,
    /// Sessions currently checked out.
    pub in_use: usize,
    /// Configured maximum for the main partition.
    pub max: u32,
    /// Open sessions in the long-running partition.
    pub long_running_size: u32,
}

/// The engine's session pool.
pub struct PilotPool {
    pool: PgPool,
    long_pool: PgPool,
    max_connections: u32,
    deadline: Duration,
    error_count: AtomicU64,
}

impl PilotPool {
    /// Connect both partitions.
    ///
    /// # Errors
    /// Returns [`PilotError::ConnectionUnavailable`] when the initial
    /// connection cannot be established.
    pub async fn connect(config: &PilotConfig) -> PilotResult<Self> {
        let url = config.database.connection_url();
        let pool = Self::build_partition(&config.pool, config.pool.max, &url).await?;
        let long_pool =
            Self::build_partition(&config.pool, config.pool.long_running.max(1), &url).await?;

        Ok(Self {
            pool,
            long_pool,
            max_connections: config.pool.max,
            deadline: config.query.timeout,
            error_count: AtomicU64::new(0),
        })
    }

    async fn build_partition(
        settings: &PoolSettings,
        max: u32,
        url: &str,
    ) -> PilotResult<PgPool> {
        PgPoolOptions::new()
            .min_connections(settings.min.min(max))
            .max_connections(max)
            .acquire_timeout(Duration::from_secs(10))
            .test_before_acquire(true)
            .connect(url)
            .await
            .map_err(|e| PilotError::connection_unavailable(e.to_string()))
    }

    /// Wrap existing pools; used by tests and embedding hosts.
    #[must_use]
    pub fn from_pools(pool: PgPool, long_pool: PgPool, deadline: Duration) -> Self {
        Self {
            pool,
            long_pool,
            max_connections: 0,
            deadline,
            error_count: AtomicU64::new(0),
        }
    }

    /// The main partition for short operations.
    #[must_use]
    pub fn inner(&self) -> &PgPool {
        &self.pool
    }

    /// The partition reserved for long-running DDL.
    #[must_use]
    pub fn long_running(&self) -> &PgPool {
        &self.long_pool
    }

    /// Configured per-call deadline.
    #[must_use]
    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Acquire a session from the main partition, retrying transient
    /// failures with bounded backoff.
    ///
    /// # Errors
    /// Returns [`PilotError::ConnectionUnavailable`] once retries are
    /// exhausted.
    pub async fn acquire(&self) -> PilotResult<PoolConnection<Postgres>> {
        self.acquire_from(&self.pool).await
    }

    /// Acquire a session from the long-running partition.
    ///
    /// # Errors
    /// Returns [`PilotError::ConnectionUnavailable`] once retries are
    /// exhausted.
    pub async fn acquire_long(&self) -> PilotResult<PoolConnection<Postgres>> {
        self.acquire_from(&self.long_pool).await
    }

    async fn acquire_from(&self, pool: &PgPool) -> PilotResult<PoolConnection<Postgres>> {
        let mut last: Option<PilotError> = None;
        for attempt in 0..ACQUIRE_ATTEMPTS {
            match pool.acquire().await {
                Ok(conn) => {
                    if attempt > 0 {
                        debug!(attempt = attempt, "pool acquisition succeeded after retry");
                    }
                    return Ok(conn);
                }
                Err(error) => {
                    self.error_count.fetch_add(1, Ordering::Relaxed);
                    let mapped = map_sqlx_error(&error);
                    if !mapped.is_retryable() || attempt + 1 == ACQUIRE_ATTEMPTS {
                        warn!(attempt = attempt, error = %mapped, "pool acquisition failed");
                        return Err(PilotError::connection_unavailable(mapped.to_string()));
                    }
                    let delay = Self::backoff_delay(attempt);
                    warn!(
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis(),
                        "retrying pool acquisition"
                    );
                    tokio::time::sleep(delay).await;
                    last = Some(mapped);
                }
            }
        }
        Err(last.unwrap_or_else(|| PilotError::connection_unavailable("retries exhausted")))
    }

    fn backoff_delay(attempt: u32) -> Duration {
        let base = ACQUIRE_BASE_DELAY.as_millis() as u64 * 2u64.pow(attempt);
        let jitter = rand::thread_rng().gen_range(0..=base / 4 + 1);
        Duration::from_millis(base + jitter)
    }

    /// Run a future under the configured per-call deadline.
    ///
    /// # Errors
    /// Returns [`PilotError::DeadlineExceeded`] when the deadline elapses
    /// before the call completes.
    pub async fn with_deadline<T, F>(&self, operation: &str, future: F) -> PilotResult<T>
    where
        F: Future<Output = PilotResult<T>>,
    {
        match tokio::time::timeout(self.deadline, future).await {
            Ok(result) => result,
            Err(_) => {
                self.error_count.fetch_add(1, Ordering::Relaxed);
                Err(PilotError::DeadlineExceeded {
                    operation: operation.to_string(),
                    deadline: self.deadline,
                })
            }
        }
    }

    /// Record a failed database call against the health counters.
    pub fn record_error(&self) {
        self.error_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Probe the main partition with a round-trip.
    pub async fn health(&self) -> PoolHealth {
        let start = Instant::now();
        let healthy = sqlx::query("SELECT 1").execute(&self.pool).await.is_ok();
        if !healthy {
            self.error_count.fetch_add(1, Ordering::Relaxed);
        }
        PoolHealth {
            healthy,
            latency: start.elapsed(),
            error_count: self.error_count.load(Ordering::Relaxed),
        }
    }

    /// Point-in-time statistics.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let size = self.pool.size();
        let idle = self.pool.num_idle();
        PoolStats {
            size,
            idle,
            in_use: (size as usize).saturating_sub(idle),
            max: self.max_connections,
            long_running_size: self.long_pool.size(),
        }
    }

    /// Close both partitions.
    pub async fn close(&self) {
        self.pool.close().await;
        self.long_pool.close().await;
    }
}

impl std::fmt::Debug for PilotPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PilotPool")
            .field("stats", &self.stats())
            .field("deadline", &self.deadline)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_delay_grows() {
        let first = PilotPool::backoff_delay(0);
        let third = PilotPool::backoff_delay(2);
        // Jitter aside, attempt 2 starts at 200ms while attempt 0 caps at
        // 50ms + 13ms jitter.
        assert!(third > first);
        assert!(first >= ACQUIRE_BASE_DELAY);
    }

    #[test]
    fn test_map_pool_timeout_is_connection_unavailable() {
        let mapped = map_sqlx_error(&sqlx::Error::PoolTimedOut);
        assert!(matches!(mapped, PilotError::ConnectionUnavailable { .. }));
        assert!(mapped.is_retryable());
    }

    #[test]
    fn test_map_row_not_found_is_not_retryable() {
        let mapped = map_sqlx_error(&sqlx::Error::RowNotFound);
        assert!(!mapped.is_retryable());
    }
}
