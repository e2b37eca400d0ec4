//! The status snapshot exposed to the host control plane.

use crate::interceptor::InterceptorCounters;
use pilot_config::{BypassLayer, BypassState, IndexerMode};
use pilot_core::BypassScope;
use pilot_db::PoolStats;
use pilot_plan::{CoverageSnapshot, PlanCacheStats};
use pilot_safeguards::BreakerState;
use pilot_telemetry::TelemetrySnapshot;
use serde::Serialize;

/// One feature's effective state.
#[derive(Debug, Clone, Serialize)]
pub struct FeatureStatus {
    /// Feature name.
    pub name: String,
    /// Whether it is currently allowed to run.
    pub enabled: bool,
}

/// One active or shadowed bypass entry.
#[derive(Debug, Clone, Serialize)]
pub struct BypassStatus {
    /// Scope of the entry.
    pub scope: BypassScope,
    /// The entry itself.
    pub state: BypassState,
    /// Layer that currently wins for this scope.
    pub layer: BypassLayer,
}

/// One breaker's state.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerStatus {
    /// Operation class.
    pub class: String,
    /// Current state.
    pub state: BreakerState,
}

/// Everything `status()` reports.
#[derive(Debug, Clone, Serialize)]
pub struct SystemStatus {
    /// Operating mode of the auto-indexer.
    pub mode: IndexerMode,
    /// Effective feature states.
    pub features: Vec<FeatureStatus>,
    /// Every bypass entry with its winning layer.
    pub bypasses: Vec<BypassStatus>,
    /// Circuit breaker states.
    pub breakers: Vec<BreakerStatus>,
    /// EXPLAIN coverage.
    pub coverage: CoverageSnapshot,
    /// Telemetry buffer counters.
    pub telemetry: TelemetrySnapshot,
    /// Plan cache statistics.
    pub plan_cache: PlanCacheStats,
    /// Pool statistics.
    pub pool: PoolStats,
    /// Whether the wall clock is inside the maintenance window; absent
    /// when the window gate is disabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maintenance_window: Option<bool>,
    /// Interceptor counters.
    pub interceptor: InterceptorCounters,
    /// Advisory locks currently held by this process.
    pub held_locks: usize,
}
