//! CPU throttle gate.
//!
//! Samples host CPU through the OS probe and denies heavy operations while
//! the host is busy. After a breach the gate keeps denying for a cooldown
//! so a momentary dip below the threshold does not immediately re-admit
//! DDL.

use parking_lot::Mutex;
use std::time::{Duration, Instant};
use sysinfo::System;
use tracing::debug;

/// The throttle gate.
pub struct CpuThrottle {
    system: Mutex<System>,
    threshold_pct: f64,
    cooldown: Duration,
    breached_at: Mutex<Option<Instant>>,
}

impl CpuThrottle {
    /// Create a throttle denying at or above `threshold_pct`.
    #[must_use]
    pub fn new(threshold_pct: f64, cooldown: Duration) -> Self {
        Self {
            system: Mutex::new(System::new()),
            threshold_pct,
            cooldown,
            breached_at: Mutex::new(None),
        }
    }

    /// Sample current host CPU usage in percent.
    #[must_use]
    pub fn sample(&self) -> f64 {
        let mut system = self.system.lock();
        system.refresh_cpu_usage();
        f64::from(system.global_cpu_usage())
    }

    /// Check the gate against a fresh sample.
    #[must_use]
    pub fn check(&self) -> Result<(), (f64, Option<Duration>)> {
        let sample = self.sample();
        self.check_with_sample(sample)
    }

    /// Check the gate against a supplied sample. Denies at or above the
    /// threshold, and during the cooldown that follows a breach.
    ///
    /// # Errors
    /// Returns the observed percentage and the remaining cooldown.
    pub fn check_with_sample(&self, cpu_pct: f64) -> Result<(), (f64, Option<Duration>)> {
        let mut breached = self.breached_at.lock();

        if let Some(at) = *breached {
            let elapsed = at.elapsed();
            if elapsed < self.cooldown {
                return Err((cpu_pct, Some(self.cooldown - elapsed)));
            }
            *breached = None;
        }

        if cpu_pct >= self.threshold_pct {
            *breached = Some(Instant::now());
            debug!(cpu_pct = cpu_pct, threshold = self.threshold_pct, "CPU throttle breached");
            return Err((cpu_pct, Some(self.cooldown)));
        }
        Ok(())
    }
}

impl std::fmt::Debug for CpuThrottle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CpuThrottle")
            .field("threshold_pct", &self.threshold_pct)
            .field("cooldown", &self.cooldown)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_below_threshold_allows() {
        let throttle = CpuThrottle::new(80.0, Duration::from_millis(50));
        assert!(throttle.check_with_sample(79.9).is_ok());
    }

    #[test]
    fn test_at_threshold_denies() {
        let throttle = CpuThrottle::new(80.0, Duration::from_millis(50));
        let (observed, retry_after) = throttle.check_with_sample(80.0).unwrap_err();
        assert!((observed - 80.0).abs() < f64::EPSILON);
        assert!(retry_after.is_some());
    }

    #[test]
    fn test_cooldown_denies_even_when_calm() {
        let throttle = CpuThrottle::new(80.0, Duration::from_millis(100));
        assert!(throttle.check_with_sample(95.0).is_err());
        // CPU has dropped, but we are still inside the cooldown.
        assert!(throttle.check_with_sample(10.0).is_err());
    }

    #[test]
    fn test_allows_after_cooldown() {
        let throttle = CpuThrottle::new(80.0, Duration::from_millis(10));
        assert!(throttle.check_with_sample(95.0).is_err());
        std::thread::sleep(Duration::from_millis(25));
        assert!(throttle.check_with_sample(10.0).is_ok());
    }
}
