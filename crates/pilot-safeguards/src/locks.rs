//! Advisory lock manager.
//!
//! Serializes DDL per `(table, field_set)` using session advisory locks.
//! The connection holding a lock is parked here until release, because
//! session locks survive a return to the pool. Locks held longer than the
//! configured maximum are reclaimed by the hourly lifecycle pass.

use dashmap::DashMap;
use pilot_core::{PilotError, PilotResult};
use pilot_db::{advisory_unlock, lock_key, try_advisory_lock, PilotPool};
use sqlx::pool::PoolConnection;
use sqlx::Postgres;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};

struct HeldLock {
    conn: Mutex<Option<PoolConnection<Postgres>>>,
    target: String,
    since: Instant,
}

/// Handle to a held lock; pass back to [`LockManager::release`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LockHandle(i64);

impl LockHandle {
    /// The underlying advisory key.
    #[must_use]
    pub fn key(self) -> i64 {
        self.0
    }
}

/// The lock manager.
pub struct LockManager {
    pool: Arc<PilotPool>,
    held: DashMap<i64, HeldLock>,
    max_age: Duration,
}

impl LockManager {
    /// Create a manager over the shared pool.
    #[must_use]
    pub fn new(pool: Arc<PilotPool>, max_age: Duration) -> Self {
        Self {
            pool,
            held: DashMap::new(),
            max_age,
        }
    }

    /// Acquire the lock for a target without blocking.
    ///
    /// # Errors
    /// [`PilotError::LockBusy`] when this process or another session holds
    /// the lock.
    pub async fn acquire(&self, table: &str, fields: &[&str]) -> PilotResult<LockHandle> {
        let key = lock_key(table, fields);
        let target = format!("{table}:{}", fields.join(","));

        if self.held.contains_key(&key) {
            return Err(PilotError::lock_busy(target));
        }

        let mut conn = self.pool.acquire().await?;
        let locked = try_advisory_lock(&mut conn, key).await?;
        if !locked {
            return Err(PilotError::lock_busy(target));
        }

        // A concurrent acquire that lost the database race cannot reach
        // here with the same key, so insertion is race-free.
        let previous = self.held.insert(
            key,
            HeldLock {
                conn: Mutex::new(Some(conn)),
                target: target.clone(),
                since: Instant::now(),
            },
        );
        debug_assert!(previous.is_none());
        debug!(target = %target, key = key, "advisory lock acquired");
        Ok(LockHandle(key))
    }

    /// Release a held lock.
    ///
    /// # Errors
    /// Surfaces database errors from the unlock call.
    pub async fn release(&self, handle: LockHandle) -> PilotResult<()> {
        let Some((key, held)) = self.held.remove(&handle.0) else {
            return Ok(());
        };
        let mut slot = held.conn.lock().await;
        if let Some(mut conn) = slot.take() {
            let released = advisory_unlock(&mut conn, key).await?;
            if !released {
                warn!(target = %held.target, key = key, "advisory lock was not held at release");
            }
        }
        debug!(target = %held.target, key = key, "advisory lock released");
        Ok(())
    }

    /// Release every lock held longer than the configured maximum.
    /// Returns the reclaimed targets.
    pub async fn reclaim_stale(&self) -> Vec<String> {
        let stale: Vec<(i64, String)> = self
            .held
            .iter()
            .filter(|entry| entry.value().since.elapsed() > self.max_age)
            .map(|entry| (*entry.key(), entry.value().target.clone()))
            .collect();

        let mut reclaimed = Vec::with_capacity(stale.len());
        for (key, target) in stale {
            warn!(target = %target, key = key, "reclaiming stale advisory lock");
            if self.release(LockHandle(key)).await.is_ok() {
                reclaimed.push(target);
            }
        }
        reclaimed
    }

    /// Number of locks currently held by this process.
    #[must_use]
    pub fn held_count(&self) -> usize {
        self.held.len()
    }
}

impl std::fmt::Debug for LockManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockManager")
            .field("held", &self.held.len())
            .field("max_age", &self.max_age)
            .finish()
    }
}
