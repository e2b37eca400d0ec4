//! The ordered gate stack.
//!
//! The lock manager is gate one and is exercised by the orchestrator at
//! execution time, because the lock must stay held through the DDL. The
//! stack evaluates the remaining gates in order; the first deny wins.

use crate::breaker::BreakerRegistry;
use crate::cpu::CpuThrottle;
use crate::rate::RateLimiter;
use crate::window::MaintenanceWindow;
use crate::write_guard::WriteOverheadGuard;
use pilot_config::{IndexerSettings, SafeguardSettings};
use pilot_core::{OperationClass, PilotError, PilotResult};
use serde::Serialize;
use std::time::Duration;

/// Gates in stack order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Gate {
    /// Advisory lock per `(table, field_set)`.
    LockManager,
    /// Token bucket per operation class.
    RateLimiter,
    /// Host CPU sample.
    CpuThrottle,
    /// Wall-clock window.
    MaintenanceWindow,
    /// Per-table index budget.
    WriteOverheadGuard,
    /// Per-class failure detector.
    CircuitBreaker,
}

impl Gate {
    /// Stable lowercase name used in audit payloads.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LockManager => "lock_manager",
            Self::RateLimiter => "rate_limiter",
            Self::CpuThrottle => "cpu_throttle",
            Self::MaintenanceWindow => "maintenance_window",
            Self::WriteOverheadGuard => "write_overhead_guard",
            Self::CircuitBreaker => "circuit_breaker",
        }
    }
}

/// What the stack needs to know about the proposed operation.
#[derive(Debug, Clone)]
pub struct GateRequest {
    /// Operation class for rate limiting and circuit breaking.
    pub class: OperationClass,
    /// Target table.
    pub table: String,
    /// Indexes currently present on the table.
    pub existing_index_count: usize,
}

/// Outcome of a stack evaluation.
#[derive(Debug, Clone, Serialize)]
pub struct GateDecision {
    /// Whether the operation may proceed.
    pub allow: bool,
    /// The denying gate, when denied.
    pub gate: Option<Gate>,
    /// Denial reason, when denied.
    pub reason: Option<String>,
    /// Suggested wait before retrying, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<Duration>,
}

impl GateDecision {
    /// An allow decision.
    #[must_use]
    pub fn allowed() -> Self {
        Self {
            allow: true,
            gate: None,
            reason: None,
            retry_after: None,
        }
    }

    /// A deny decision.
    #[must_use]
    pub fn denied(gate: Gate, reason: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self {
            allow: false,
            gate: Some(gate),
            reason: Some(reason.into()),
            retry_after,
        }
    }

    /// Convert a denial into the matching error.
    ///
    /// # Errors
    /// Always returns an error for a denied decision; `Ok` otherwise.
    pub fn into_result(self, class: OperationClass) -> PilotResult<()> {
        if self.allow {
            return Ok(());
        }
        let reason = self.reason.unwrap_or_default();
        Err(match self.gate {
            Some(Gate::RateLimiter) => {
                PilotError::rate_limited(class.as_str(), self.retry_after)
            }
            Some(Gate::CircuitBreaker) => PilotError::breaker_open(class.as_str()),
            Some(Gate::MaintenanceWindow) => PilotError::OutsideMaintenanceWindow {
                window: reason,
            },
            Some(Gate::WriteOverheadGuard) => PilotError::BudgetExceeded { message: reason },
            Some(Gate::LockManager) => PilotError::lock_busy(reason),
            Some(Gate::CpuThrottle) | None => PilotError::RateLimited {
                class: class.as_str().to_string(),
                retry_after: self.retry_after,
            },
        })
    }
}

/// The assembled stack.
pub struct SafeguardStack {
    rate: RateLimiter,
    cpu: CpuThrottle,
    window: MaintenanceWindow,
    write_guard: WriteOverheadGuard,
    breakers: BreakerRegistry,
}

impl SafeguardStack {
    /// Assemble the stack from configuration.
    ///
    /// # Errors
    /// Surfaces a malformed maintenance window.
    pub fn from_settings(
        safeguards: &SafeguardSettings,
        indexer: &IndexerSettings,
    ) -> PilotResult<Self> {
        Ok(Self {
            rate: RateLimiter::new(safeguards.rate_burst, safeguards.rate_per_minute),
            cpu: CpuThrottle::new(safeguards.cpu_max_pct, safeguards.cooldown),
            window: MaintenanceWindow::from_settings(&safeguards.maintenance)?,
            write_guard: WriteOverheadGuard::new(safeguards, indexer.max_indexes_per_table),
            breakers: BreakerRegistry::new(
                safeguards.breaker_failure_threshold,
                safeguards.breaker_cooldown,
            ),
        })
    }

    /// The breaker registry, shared with operation outcome recording.
    #[must_use]
    pub fn breakers(&self) -> &BreakerRegistry {
        &self.breakers
    }

    /// The maintenance window, for status reporting.
    #[must_use]
    pub fn window(&self) -> &MaintenanceWindow {
        &self.window
    }

    /// Evaluate gates two through six in order.
    #[must_use]
    pub fn evaluate(&self, request: &GateRequest) -> GateDecision {
        self.evaluate_with_cpu(request, None)
    }

    /// Evaluate with an injected CPU sample; `None` samples the host.
    #[must_use]
    pub fn evaluate_with_cpu(
        &self,
        request: &GateRequest,
        cpu_sample: Option<f64>,
    ) -> GateDecision {
        if let Err(retry_after) = self.rate.try_acquire(request.class) {
            return GateDecision::denied(
                Gate::RateLimiter,
                format!("token bucket exhausted for {}", request.class),
                Some(retry_after),
            );
        }

        let cpu_result = match cpu_sample {
            Some(sample) => self.cpu.check_with_sample(sample),
            None => self.cpu.check(),
        };
        if let Err((observed, retry_after)) = cpu_result {
            return GateDecision::denied(
                Gate::CpuThrottle,
                format!("host CPU at {observed:.1}%"),
                retry_after,
            );
        }

        if !self.window.allows_now() {
            return GateDecision::denied(
                Gate::MaintenanceWindow,
                self.window.description().to_string(),
                None,
            );
        }

        if let Err(reason) = self
            .write_guard
            .check(&request.table, request.existing_index_count)
        {
            return GateDecision::denied(Gate::WriteOverheadGuard, reason, None);
        }

        let breaker = self.breakers.breaker(request.class);
        if !breaker.allows() {
            return GateDecision::denied(
                Gate::CircuitBreaker,
                format!("breaker open for {}", request.class),
                None,
            );
        }

        GateDecision::allowed()
    }
}

impl std::fmt::Debug for SafeguardStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SafeguardStack")
            .field("breakers", &self.breakers)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pilot_config::PilotConfig;

    fn stack() -> SafeguardStack {
        let config = PilotConfig::default();
        SafeguardStack::from_settings(&config.safeguards, &config.indexer).unwrap()
    }

    fn request() -> GateRequest {
        GateRequest {
            class: OperationClass::CreateIndex,
            table: "users".to_string(),
            existing_index_count: 2,
        }
    }

    #[test]
    fn test_permissive_stack_allows() {
        let decision = stack().evaluate_with_cpu(&request(), Some(10.0));
        assert!(decision.allow);
        assert!(decision.gate.is_none());
    }

    #[test]
    fn test_cpu_breach_denies_with_gate_name() {
        let decision = stack().evaluate_with_cpu(&request(), Some(80.0));
        assert!(!decision.allow);
        assert_eq!(decision.gate, Some(Gate::CpuThrottle));
        assert!(decision.reason.unwrap().contains("80.0%"));
    }

    #[test]
    fn test_cpu_just_below_threshold_allows() {
        let decision = stack().evaluate_with_cpu(&request(), Some(79.9));
        assert!(decision.allow);
    }

    #[test]
    fn test_write_budget_denies() {
        let mut req = request();
        req.existing_index_count = 10;
        let decision = stack().evaluate_with_cpu(&req, Some(10.0));
        assert!(!decision.allow);
        assert_eq!(decision.gate, Some(Gate::WriteOverheadGuard));
    }

    #[test]
    fn test_open_breaker_denies() {
        let stack = stack();
        let breaker = stack.breakers().breaker(OperationClass::CreateIndex);
        for _ in 0..5 {
            breaker.record_failure();
        }
        let decision = stack.evaluate_with_cpu(&request(), Some(10.0));
        assert!(!decision.allow);
        assert_eq!(decision.gate, Some(Gate::CircuitBreaker));

        let err = decision
            .into_result(OperationClass::CreateIndex)
            .unwrap_err();
        assert!(matches!(err, PilotError::BreakerOpen { .. }));
    }

    #[test]
    fn test_rate_exhaustion_denies_with_retry_after() {
        let stack = stack();
        // Default burst is 3.
        for _ in 0..3 {
            let decision = stack.evaluate_with_cpu(&request(), Some(10.0));
            assert!(decision.allow);
        }
        let decision = stack.evaluate_with_cpu(&request(), Some(10.0));
        assert!(!decision.allow);
        assert_eq!(decision.gate, Some(Gate::RateLimiter));
        assert!(decision.retry_after.is_some());
    }

    #[test]
    fn test_deny_short_circuits_before_breaker() {
        let stack = stack();
        let mut req = request();
        req.existing_index_count = 50;
        let decision = stack.evaluate_with_cpu(&req, Some(10.0));
        // Write guard fires before the breaker is even consulted.
        assert_eq!(decision.gate, Some(Gate::WriteOverheadGuard));
    }

    #[test]
    fn test_gate_names() {
        assert_eq!(Gate::CircuitBreaker.as_str(), "circuit_breaker");
        assert_eq!(Gate::LockManager.as_str(), "lock_manager");
    }
}
