//! Plan cache with TTL, LRU eviction, and per-key singleflight.

use crate::summary::PlanSummary;
use dashmap::DashMap;
use lru::LruCache;
use parking_lot::Mutex;
use pilot_config::PlanCacheSettings;
use pilot_core::PilotResult;
use serde::Serialize;
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

struct CachedEntry {
    summary: PlanSummary,
    inserted: Instant,
}

/// Cache statistics for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct PlanCacheStats {
    /// Cache hits.
    pub hits: u64,
    /// Cache misses.
    pub misses: u64,
    /// Entries currently cached.
    pub entries: usize,
    /// Configured capacity.
    pub capacity: usize,
}

/// Plan cache keyed by normalized query template.
pub struct PlanCache {
    entries: Mutex<LruCache<String, CachedEntry>>,
    ttl: Duration,
    capacity: usize,
    inflight: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl PlanCache {
    /// Create a cache from the configured bounds.
    #[must_use]
    pub fn new(settings: PlanCacheSettings) -> Self {
        let capacity = settings.size.max(1);
        Self {
            entries: Mutex::new(LruCache::new(
                NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN),
            )),
            ttl: settings.ttl,
            capacity,
            inflight: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Fetch a live entry, expiring it if the TTL has lapsed.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<PlanSummary> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.inserted.elapsed() < self.ttl => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.summary.clone())
            }
            Some(_) => {
                entries.pop(key);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Insert or refresh an entry.
    pub fn put(&self, key: String, summary: PlanSummary) {
        self.entries.lock().put(
            key,
            CachedEntry {
                summary,
                inserted: Instant::now(),
            },
        );
    }

    /// Remove every cached entry.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Fetch or compute under a per-key singleflight: concurrent misses on
    /// the same key share one computation.
    ///
    /// # Errors
    /// Propagates the computation's error; nothing is cached on failure.
    pub async fn get_or_compute<F, Fut>(&self, key: &str, compute: F) -> PilotResult<PlanSummary>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = PilotResult<PlanSummary>>,
    {
        if let Some(summary) = self.get(key) {
            return Ok(summary);
        }

        let flight = self
            .inflight
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        let _guard = flight.lock().await;

        // Whoever held the flight before us may have filled the cache.
        if let Some(summary) = self.get(key) {
            return Ok(summary);
        }

        let result = compute().await;
        if let Ok(ref summary) = result {
            self.put(key.to_string(), summary.clone());
        }
        drop(_guard);
        self.inflight.remove(key);
        result
    }

    /// Point-in-time statistics.
    #[must_use]
    pub fn stats(&self) -> PlanCacheStats {
        PlanCacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.entries.lock().len(),
            capacity: self.capacity,
        }
    }
}

impl std::fmt::Debug for PlanCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlanCache")
            .field("stats", &self.stats())
            .field("ttl", &self.ttl)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::AtomicU32;

    fn summary(cost: f64) -> PlanSummary {
        PlanSummary {
            total_cost: cost,
            startup_cost: 0.0,
            estimated_rows: 1.0,
            actual_rows: None,
            access_nodes: Vec::new(),
            seq_scan_tables: HashSet::new(),
            buffer_hits: None,
            buffer_reads: None,
            bottleneck: None,
            analyzed: false,
            heuristic: false,
        }
    }

    fn settings(size: usize, ttl: Duration) -> PlanCacheSettings {
        PlanCacheSettings { size, ttl }
    }

    #[test]
    fn test_put_and_get() {
        let cache = PlanCache::new(settings(10, Duration::from_secs(60)));
        cache.put("a".into(), summary(5.0));
        assert!((cache.get("a").unwrap().total_cost - 5.0).abs() < 1e-9);
        assert!(cache.get("b").is_none());
    }

    #[test]
    fn test_ttl_expiry() {
        let cache = PlanCache::new(settings(10, Duration::from_millis(10)));
        cache.put("a".into(), summary(5.0));
        std::thread::sleep(Duration::from_millis(25));
        assert!(cache.get("a").is_none());
        assert_eq!(cache.stats().entries, 0);
    }

    #[test]
    fn test_lru_eviction_at_capacity() {
        let cache = PlanCache::new(settings(2, Duration::from_secs(60)));
        cache.put("a".into(), summary(1.0));
        cache.put("b".into(), summary(2.0));
        cache.put("c".into(), summary(3.0));
        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_some());
        assert!(cache.get("c").is_some());
    }

    #[tokio::test]
    async fn test_singleflight_shares_one_computation() {
        let cache = Arc::new(PlanCache::new(settings(10, Duration::from_secs(60))));
        let computations = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            let computations = Arc::clone(&computations);
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_compute("shared", || async move {
                        computations.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok(summary(9.0))
                    })
                    .await
            }));
        }

        for handle in handles {
            let result = handle.await.unwrap().unwrap();
            assert!((result.total_cost - 9.0).abs() < 1e-9);
        }
        assert_eq!(computations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_computation_is_not_cached() {
        let cache = PlanCache::new(settings(10, Duration::from_secs(60)));
        let result = cache
            .get_or_compute("bad", || async {
                Err(pilot_core::PilotError::plan_unavailable("bad", "boom"))
            })
            .await;
        assert!(result.is_err());
        assert!(cache.get("bad").is_none());
    }

    #[test]
    fn test_stats_track_hits_and_misses() {
        let cache = PlanCache::new(settings(10, Duration::from_secs(60)));
        cache.put("a".into(), summary(1.0));
        let _ = cache.get("a");
        let _ = cache.get("missing");
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.capacity, 10);
    }
}
