//! Token-bucket rate limiting per operation class.

use dashmap::DashMap;
use parking_lot::Mutex;
use pilot_core::OperationClass;
use std::time::{Duration, Instant};

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Per-class token buckets. Each class refills independently at the
/// configured rate.
pub struct RateLimiter {
    buckets: DashMap<OperationClass, Mutex<Bucket>>,
    capacity: f64,
    refill_per_sec: f64,
}

impl RateLimiter {
    /// Create a limiter with the given burst capacity and per-minute
    /// refill rate.
    #[must_use]
    pub fn new(burst: u32, per_minute: f64) -> Self {
        Self {
            buckets: DashMap::new(),
            capacity: f64::from(burst.max(1)),
            refill_per_sec: (per_minute / 60.0).max(0.0),
        }
    }

    /// Take one token for the class. On exhaustion returns the wait until
    /// a token becomes available.
    ///
    /// # Errors
    /// Returns the suggested wait as `Err` when the bucket is empty.
    pub fn try_acquire(&self, class: OperationClass) -> Result<(), Duration> {
        let entry = self.buckets.entry(class).or_insert_with(|| {
            Mutex::new(Bucket {
                tokens: self.capacity,
                last_refill: Instant::now(),
            })
        });
        let mut bucket = entry.lock();

        let elapsed = bucket.last_refill.elapsed().as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        bucket.last_refill = Instant::now();

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Ok(())
        } else if self.refill_per_sec > 0.0 {
            let deficit = 1.0 - bucket.tokens;
            Err(Duration::from_secs_f64(deficit / self.refill_per_sec))
        } else {
            Err(Duration::from_secs(60))
        }
    }

    /// Remaining tokens for a class, for status reporting.
    #[must_use]
    pub fn available(&self, class: OperationClass) -> f64 {
        match self.buckets.get(&class) {
            Some(entry) => {
                let bucket = entry.lock();
                let elapsed = bucket.last_refill.elapsed().as_secs_f64();
                (bucket.tokens + elapsed * self.refill_per_sec).min(self.capacity)
            }
            None => self.capacity,
        }
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("capacity", &self.capacity)
            .field("refill_per_sec", &self.refill_per_sec)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_burst_then_exhaustion() {
        let limiter = RateLimiter::new(3, 60.0);
        assert!(limiter.try_acquire(OperationClass::CreateIndex).is_ok());
        assert!(limiter.try_acquire(OperationClass::CreateIndex).is_ok());
        assert!(limiter.try_acquire(OperationClass::CreateIndex).is_ok());

        let wait = limiter
            .try_acquire(OperationClass::CreateIndex)
            .unwrap_err();
        // One token per second refill, so the wait is about a second.
        assert!(wait <= Duration::from_secs(2));
    }

    #[test]
    fn test_classes_are_independent() {
        let limiter = RateLimiter::new(1, 60.0);
        assert!(limiter.try_acquire(OperationClass::CreateIndex).is_ok());
        assert!(limiter.try_acquire(OperationClass::CreateIndex).is_err());
        assert!(limiter.try_acquire(OperationClass::DropIndex).is_ok());
    }

    #[test]
    fn test_refill_restores_tokens() {
        // 600 per minute = 10 per second.
        let limiter = RateLimiter::new(1, 600.0);
        assert!(limiter.try_acquire(OperationClass::Maintenance).is_ok());
        assert!(limiter.try_acquire(OperationClass::Maintenance).is_err());

        std::thread::sleep(Duration::from_millis(150));
        assert!(limiter.try_acquire(OperationClass::Maintenance).is_ok());
    }

    #[test]
    fn test_zero_refill_reports_long_wait() {
        let limiter = RateLimiter::new(1, 0.0);
        assert!(limiter.try_acquire(OperationClass::SchemaSync).is_ok());
        let wait = limiter.try_acquire(OperationClass::SchemaSync).unwrap_err();
        assert_eq!(wait, Duration::from_secs(60));
    }

    #[test]
    fn test_available_without_acquisition() {
        let limiter = RateLimiter::new(5, 60.0);
        assert!((limiter.available(OperationClass::Explain) - 5.0).abs() < 1e-9);
    }
}
