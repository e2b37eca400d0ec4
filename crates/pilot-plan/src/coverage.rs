//! EXPLAIN coverage tracking.
//!
//! Coverage is the fraction of scoring decisions backed by a real plan
//! rather than the heuristic estimator. Falling below the configured floor
//! produces a warning, once per downward crossing.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::warn;

/// Tracks plan-backed vs heuristic decisions.
#[derive(Debug)]
pub struct CoverageTracker {
    plan_backed: AtomicU64,
    heuristic: AtomicU64,
    min_coverage: f64,
    below_floor: AtomicBool,
}

/// Serializable coverage snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct CoverageSnapshot {
    /// Decisions backed by a real plan.
    pub plan_backed: u64,
    /// Decisions that fell back to heuristics.
    pub heuristic: u64,
    /// Current ratio; 1.0 when no decisions were made yet.
    pub coverage: f64,
    /// Configured warning floor.
    pub min_coverage: f64,
}

impl CoverageTracker {
    /// Create a tracker with the configured floor.
    #[must_use]
    pub fn new(min_coverage: f64) -> Self {
        Self {
            plan_backed: AtomicU64::new(0),
            heuristic: AtomicU64::new(0),
            min_coverage,
            below_floor: AtomicBool::new(false),
        }
    }

    /// Record a decision backed by a real plan.
    pub fn record_plan_backed(&self) {
        self.plan_backed.fetch_add(1, Ordering::Relaxed);
        self.check();
    }

    /// Record a decision that used the heuristic path.
    pub fn record_heuristic(&self) {
        self.heuristic.fetch_add(1, Ordering::Relaxed);
        self.check();
    }

    /// Current coverage; 1.0 before any decision.
    #[must_use]
    pub fn coverage(&self) -> f64 {
        let plan_backed = self.plan_backed.load(Ordering::Relaxed);
        let heuristic = self.heuristic.load(Ordering::Relaxed);
        let total = plan_backed + heuristic;
        if total == 0 {
            1.0
        } else {
            plan_backed as f64 / total as f64
        }
    }

    fn check(&self) {
        let coverage = self.coverage();
        if coverage < self.min_coverage {
            if !self.below_floor.swap(true, Ordering::Relaxed) {
                warn!(
                    coverage = coverage,
                    floor = self.min_coverage,
                    "EXPLAIN coverage dropped below floor"
                );
            }
        } else {
            self.below_floor.store(false, Ordering::Relaxed);
        }
    }

    /// Snapshot for status reporting.
    #[must_use]
    pub fn snapshot(&self) -> CoverageSnapshot {
        CoverageSnapshot {
            plan_backed: self.plan_backed.load(Ordering::Relaxed),
            heuristic: self.heuristic.load(Ordering::Relaxed),
            coverage: self.coverage(),
            min_coverage: self.min_coverage,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_coverage_is_full() {
        let tracker = CoverageTracker::new(0.7);
        assert!((tracker.coverage() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_coverage_ratio() {
        let tracker = CoverageTracker::new(0.7);
        for _ in 0..7 {
            tracker.record_plan_backed();
        }
        for _ in 0..3 {
            tracker.record_heuristic();
        }
        assert!((tracker.coverage() - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_snapshot() {
        let tracker = CoverageTracker::new(0.7);
        tracker.record_plan_backed();
        tracker.record_heuristic();
        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.plan_backed, 1);
        assert_eq!(snapshot.heuristic, 1);
        assert!((snapshot.coverage - 0.5).abs() < 1e-9);
    }
}
