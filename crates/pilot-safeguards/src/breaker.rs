//! Circuit breaker per operation class.
//!
//! Three states: Closed while healthy, Open after `k` consecutive
//! failures, HalfOpen once the cooldown elapses. A single success in
//! HalfOpen closes the breaker; a failure reopens it.

use dashmap::DashMap;
use parking_lot::RwLock;
use pilot_core::OperationClass;
use serde::Serialize;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum BreakerState {
    /// Operations flow normally.
    Closed = 0,
    /// Operations are denied.
    Open = 1,
    /// One probe operation is allowed through.
    HalfOpen = 2,
}

impl From<u8> for BreakerState {
    fn from(value: u8) -> Self {
        match value {
            1 => Self::Open,
            2 => Self::HalfOpen,
            _ => Self::Closed,
        }
    }
}

/// Circuit breaker for one operation class.
pub struct CircuitBreaker {
    class: OperationClass,
    failure_threshold: u32,
    cooldown: Duration,
    state: AtomicU8,
    consecutive_failures: AtomicU32,
    opened_at_ms: AtomicU64,
    transition_lock: RwLock<()>,
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

impl CircuitBreaker {
    /// Create a breaker for an operation class.
    #[must_use]
    pub fn new(class: OperationClass, failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            class,
            failure_threshold: failure_threshold.max(1),
            cooldown,
            state: AtomicU8::new(BreakerState::Closed as u8),
            consecutive_failures: AtomicU32::new(0),
            opened_at_ms: AtomicU64::new(0),
            transition_lock: RwLock::new(()),
        }
    }

    /// The operation class this breaker guards.
    #[must_use]
    pub fn class(&self) -> OperationClass {
        self.class
    }

    /// Current state, transitioning Open to HalfOpen when the cooldown
    /// has elapsed.
    #[must_use]
    pub fn state(&self) -> BreakerState {
        let state = BreakerState::from(self.state.load(Ordering::Acquire));
        if state == BreakerState::Open && self.cooldown_elapsed() {
            self.transition_to_half_open();
            return BreakerState::HalfOpen;
        }
        state
    }

    /// Whether an operation may proceed.
    #[must_use]
    pub fn allows(&self) -> bool {
        self.state() != BreakerState::Open
    }

    /// Record a successful operation.
    pub fn record_success(&self) {
        match BreakerState::from(self.state.load(Ordering::Acquire)) {
            BreakerState::Closed => {
                self.consecutive_failures.store(0, Ordering::Relaxed);
            }
            BreakerState::HalfOpen => {
                self.transition_to_closed();
            }
            BreakerState::Open => {}
        }
    }

    /// Record a failed operation.
    pub fn record_failure(&self) {
        match BreakerState::from(self.state.load(Ordering::Acquire)) {
            BreakerState::Closed => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
                debug!(
                    class = %self.class,
                    failures = failures,
                    threshold = self.failure_threshold,
                    "breaker failure recorded"
                );
                if failures >= self.failure_threshold {
                    self.transition_to_open();
                }
            }
            BreakerState::HalfOpen => {
                warn!(class = %self.class, "probe failed, breaker reopening");
                self.transition_to_open();
            }
            BreakerState::Open => {}
        }
    }

    fn cooldown_elapsed(&self) -> bool {
        let opened = self.opened_at_ms.load(Ordering::Acquire);
        opened != 0 && now_ms().saturating_sub(opened) >= self.cooldown.as_millis() as u64
    }

    fn transition_to_open(&self) {
        let _guard = self.transition_lock.write();
        let previous = self.state.swap(BreakerState::Open as u8, Ordering::Release);
        if previous != BreakerState::Open as u8 {
            self.opened_at_ms.store(now_ms(), Ordering::Release);
            warn!(class = %self.class, "circuit breaker opened");
        }
    }

    fn transition_to_half_open(&self) {
        let _guard = self.transition_lock.write();
        let previous = self
            .state
            .swap(BreakerState::HalfOpen as u8, Ordering::Release);
        if previous == BreakerState::Open as u8 {
            info!(class = %self.class, "circuit breaker half-open");
        }
    }

    fn transition_to_closed(&self) {
        let _guard = self.transition_lock.write();
        self.state
            .store(BreakerState::Closed as u8, Ordering::Release);
        self.consecutive_failures.store(0, Ordering::Relaxed);
        self.opened_at_ms.store(0, Ordering::Release);
        info!(class = %self.class, "circuit breaker closed");
    }

    /// Force-close, used by lifecycle bookkeeping after manual recovery.
    pub fn reset(&self) {
        self.transition_to_closed();
    }
}

/// All breakers, one per operation class.
pub struct BreakerRegistry {
    breakers: DashMap<OperationClass, Arc<CircuitBreaker>>,
    failure_threshold: u32,
    cooldown: Duration,
}

impl BreakerRegistry {
    /// Create a registry with shared parameters.
    #[must_use]
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            breakers: DashMap::new(),
            failure_threshold,
            cooldown,
        }
    }

    /// The breaker for a class, created on first use.
    #[must_use]
    pub fn breaker(&self, class: OperationClass) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(class)
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(
                    class,
                    self.failure_threshold,
                    self.cooldown,
                ))
            })
            .clone()
    }

    /// States of every instantiated breaker, for status reporting.
    #[must_use]
    pub fn states(&self) -> Vec<(OperationClass, BreakerState)> {
        self.breakers
            .iter()
            .map(|entry| (*entry.key(), entry.value().state()))
            .collect()
    }
}

impl std::fmt::Debug for BreakerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BreakerRegistry")
            .field("states", &self.states())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32, cooldown: Duration) -> CircuitBreaker {
        CircuitBreaker::new(OperationClass::CreateIndex, threshold, cooldown)
    }

    #[test]
    fn test_initial_state_allows() {
        let cb = breaker(5, Duration::from_secs(60));
        assert_eq!(cb.state(), BreakerState::Closed);
        assert!(cb.allows());
    }

    #[test]
    fn test_opens_after_consecutive_failures() {
        let cb = breaker(3, Duration::from_secs(60));
        cb.record_failure();
        cb.record_failure();
        assert!(cb.allows());
        cb.record_failure();
        assert_eq!(cb.state(), BreakerState::Open);
        assert!(!cb.allows());
    }

    #[test]
    fn test_success_resets_consecutive_count() {
        let cb = breaker(3, Duration::from_secs(60));
        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        cb.record_failure();
        cb.record_failure();
        // Still below threshold because the success reset the streak.
        assert!(cb.allows());
    }

    #[test]
    fn test_half_open_after_cooldown_then_closes_on_success() {
        let cb = breaker(1, Duration::from_millis(10));
        cb.record_failure();
        assert!(!cb.allows());

        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(cb.state(), BreakerState::HalfOpen);
        assert!(cb.allows());

        cb.record_success();
        assert_eq!(cb.state(), BreakerState::Closed);
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let cb = breaker(1, Duration::from_millis(10));
        cb.record_failure();
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(cb.state(), BreakerState::HalfOpen);

        cb.record_failure();
        assert_eq!(
            BreakerState::from(cb.state.load(Ordering::Acquire)),
            BreakerState::Open
        );
    }

    #[test]
    fn test_registry_returns_same_breaker() {
        let registry = BreakerRegistry::new(5, Duration::from_secs(60));
        let a = registry.breaker(OperationClass::CreateIndex);
        let b = registry.breaker(OperationClass::CreateIndex);
        a.record_failure();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.states().len(), 1);
    }
}
