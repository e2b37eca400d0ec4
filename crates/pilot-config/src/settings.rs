//! Configuration structs mirroring the recognized key set.

use pilot_core::{PilotError, PilotResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Complete engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PilotConfig {
    /// Database connection settings.
    pub database: DatabaseSettings,
    /// Connection pool bounds.
    pub pool: PoolSettings,
    /// Per-call query deadlines.
    pub query: QuerySettings,
    /// Telemetry buffer behavior.
    pub telemetry: TelemetrySettings,
    /// Auto-indexer orchestrator behavior.
    pub indexer: IndexerSettings,
    /// Plan cache bounds.
    pub plan_cache: PlanCacheSettings,
    /// EXPLAIN coverage monitoring.
    pub explain: ExplainSettings,
    /// Safeguard gate parameters.
    pub safeguards: SafeguardSettings,
    /// Query interceptor parameters.
    pub interceptor: InterceptorSettings,
    /// Cost/benefit scorer parameters.
    pub scoring: ScoringSettings,
    /// Lifecycle cadences.
    pub lifecycle: LifecycleSettings,
    /// Feature group toggles.
    pub features: FeatureToggles,
}

impl PilotConfig {
    /// Validate cross-field constraints.
    ///
    /// # Errors
    /// Returns [`PilotError::Configuration`] on an inconsistent setting.
    pub fn validate(&self) -> PilotResult<()> {
        if self.pool.min > self.pool.max {
            return Err(PilotError::configuration(format!(
                "pool.min ({}) exceeds pool.max ({})",
                self.pool.min, self.pool.max
            )));
        }
        if self.pool.max == 0 {
            return Err(PilotError::configuration("pool.max must be at least 1"));
        }
        if self.telemetry.batch_size == 0 {
            return Err(PilotError::configuration(
                "telemetry.batch_size must be at least 1",
            ));
        }
        if self.telemetry.batch_size > self.telemetry.max_buffer {
            return Err(PilotError::configuration(format!(
                "telemetry.batch_size ({}) exceeds telemetry.max_buffer ({})",
                self.telemetry.batch_size, self.telemetry.max_buffer
            )));
        }
        if !(0.0..=1.0).contains(&self.explain.min_coverage) {
            return Err(PilotError::configuration(
                "explain.min_coverage must be within [0, 1]",
            ));
        }
        if !(0.0..=1.0).contains(&self.interceptor.min_safety) {
            return Err(PilotError::configuration(
                "interceptor.min_safety must be within [0, 1]",
            ));
        }
        if !(0.0..=100.0).contains(&self.safeguards.cpu_max_pct) {
            return Err(PilotError::configuration(
                "safeguards.cpu_max_pct must be within [0, 100]",
            ));
        }
        if self.safeguards.maintenance.enabled {
            MaintenanceWindowSettings::parse_window(&self.safeguards.maintenance.window)?;
        }
        if !(0.0..=1.0).contains(&self.scoring.min_confidence) {
            return Err(PilotError::configuration(
                "scoring.min_confidence must be within [0, 1]",
            ));
        }
        Ok(())
    }
}

/// Database connection settings. The password is never read from
/// configuration files; it comes from the environment only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// Database host.
    pub host: String,
    /// Database port.
    pub port: u16,
    /// Database name.
    pub database: String,
    /// Login role.
    pub user: String,
    /// Password, populated from the environment.
    #[serde(skip_serializing, default)]
    pub password: String,
    /// SSL mode passed to the driver (`disable`, `prefer`, `require`).
    pub ssl_mode: String,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            database: "postgres".to_string(),
            user: "postgres".to_string(),
            password: String::new(),
            ssl_mode: "prefer".to_string(),
        }
    }
}

impl DatabaseSettings {
    /// Build a connection URL for the driver. The password is URL-escaped
    /// minimally (percent and at-sign), which covers the characters that
    /// would break the authority section.
    #[must_use]
    pub fn connection_url(&self) -> String {
        let password = self.password.replace('%', "%25").replace('@', "%40");
        format!(
            "postgres://{}:{}@{}:{}/{}?sslmode={}",
            self.user, password, self.host, self.port, self.database, self.ssl_mode
        )
    }
}

/// Connection pool bounds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    /// Minimum pooled sessions.
    pub min: u32,
    /// Maximum pooled sessions.
    pub max: u32,
    /// Sessions reserved for long-running DDL.
    pub long_running: u32,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            min: 2,
            max: 20,
            long_running: 2,
        }
    }
}

/// Per-call deadlines.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct QuerySettings {
    /// Deadline applied to every database call.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for QuerySettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
        }
    }
}

/// Telemetry buffer behavior.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetrySettings {
    /// Flush when this many events are buffered.
    pub batch_size: usize,
    /// Flush at least this often.
    #[serde(with = "humantime_serde")]
    pub flush_interval: Duration,
    /// Hard cap; oldest events are dropped beyond this.
    pub max_buffer: usize,
    /// Events older than this are pruned by lifecycle passes.
    #[serde(with = "humantime_serde")]
    pub retention: Duration,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            batch_size: 100,
            flush_interval: Duration::from_secs(5),
            max_buffer: 10_000,
            retention: Duration::from_secs(14 * 24 * 3600),
        }
    }
}

/// Operating mode of the auto-indexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexerMode {
    /// Record what would be done; never issue DDL.
    Advisory,
    /// Record the exact DDL with plan-impact prediction; never execute.
    DryRun,
    /// Execute DDL.
    Apply,
}

impl IndexerMode {
    /// Stable lowercase name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Advisory => "advisory",
            Self::DryRun => "dry_run",
            Self::Apply => "apply",
        }
    }
}

/// Auto-indexer orchestrator behavior.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerSettings {
    /// Cadence of periodic passes.
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    /// Operating mode.
    pub mode: IndexerMode,
    /// Eligibility floor for candidates.
    pub min_queries_per_hour: u64,
    /// Scales the decision threshold.
    pub threshold_multiplier: f64,
    /// Hard cap on indexes per table.
    pub max_indexes_per_table: usize,
    /// Post-creation cost regression beyond this triggers rollback.
    pub rollback_threshold_pct: f64,
    /// Latency regression beyond this also triggers rollback.
    pub rollback_latency_pct: f64,
    /// DDL retry attempts before the failure is recorded.
    pub ddl_retries: u32,
    /// Upper bound on a single orchestrator pass.
    #[serde(with = "humantime_serde")]
    pub pass_deadline: Duration,
    /// Enable staged canary rollout for new indexes.
    pub canary_enabled: bool,
}

impl Default for IndexerSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
            mode: IndexerMode::Advisory,
            min_queries_per_hour: 100,
            threshold_multiplier: 1.0,
            max_indexes_per_table: 10,
            rollback_threshold_pct: 5.0,
            rollback_latency_pct: 10.0,
            ddl_retries: 3,
            pass_deadline: Duration::from_secs(240),
            canary_enabled: false,
        }
    }
}

/// Plan cache bounds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanCacheSettings {
    /// Maximum cached plans.
    pub size: usize,
    /// Entry time-to-live.
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
}

impl Default for PlanCacheSettings {
    fn default() -> Self {
        Self {
            size: 1000,
            ttl: Duration::from_secs(300),
        }
    }
}

/// EXPLAIN coverage monitoring.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ExplainSettings {
    /// Warn when the fraction of plan-backed decisions drops below this.
    pub min_coverage: f64,
}

impl Default for ExplainSettings {
    fn default() -> Self {
        Self { min_coverage: 0.7 }
    }
}

/// Maintenance window gate settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceWindowSettings {
    /// When disabled the gate always allows.
    pub enabled: bool,
    /// Window in `HH:MM-HH:MM` local wall-clock form.
    pub window: String,
}

impl Default for MaintenanceWindowSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            window: "02:00-06:00".to_string(),
        }
    }
}

impl MaintenanceWindowSettings {
    /// Parse a `HH:MM-HH:MM` window into minute-of-day bounds.
    ///
    /// # Errors
    /// Returns [`PilotError::Configuration`] on a malformed window.
    pub fn parse_window(window: &str) -> PilotResult<(u32, u32)> {
        let parse_minutes = |part: &str| -> PilotResult<u32> {
            let (hours, minutes) = part.split_once(':').ok_or_else(|| {
                PilotError::configuration(format!("malformed maintenance window part: {part}"))
            })?;
            let hours: u32 = hours.parse().map_err(|_| {
                PilotError::configuration(format!("malformed maintenance window hour: {part}"))
            })?;
            let minutes: u32 = minutes.parse().map_err(|_| {
                PilotError::configuration(format!("malformed maintenance window minute: {part}"))
            })?;
            if hours > 23 || minutes > 59 {
                return Err(PilotError::configuration(format!(
                    "maintenance window out of range: {part}"
                )));
            }
            Ok(hours * 60 + minutes)
        };

        let (start, end) = window.split_once('-').ok_or_else(|| {
            PilotError::configuration(format!("malformed maintenance window: {window}"))
        })?;
        Ok((parse_minutes(start.trim())?, parse_minutes(end.trim())?))
    }
}

/// Safeguard gate parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SafeguardSettings {
    /// CPU throttle denies above this host CPU percentage.
    pub cpu_max_pct: f64,
    /// Wait after a CPU breach before sampling resumes.
    #[serde(with = "humantime_serde")]
    pub cooldown: Duration,
    /// Maintenance window gate.
    pub maintenance: MaintenanceWindowSettings,
    /// Consecutive failures before a breaker opens.
    pub breaker_failure_threshold: u32,
    /// Breaker cooldown before half-open probing.
    #[serde(with = "humantime_serde")]
    pub breaker_cooldown: Duration,
    /// Token bucket capacity per operation class.
    pub rate_burst: u32,
    /// Token refill per minute per operation class.
    pub rate_per_minute: f64,
    /// Advisory locks older than this are reclaimed.
    #[serde(with = "humantime_serde")]
    pub lock_max_age: Duration,
    /// Enable the write-overhead guard.
    pub write_guard_enabled: bool,
    /// Estimated per-index write overhead fraction used by the guard.
    pub write_overhead_per_index: f64,
    /// Deny when estimated cumulative write overhead exceeds this fraction.
    pub write_overhead_max: f64,
}

impl Default for SafeguardSettings {
    fn default() -> Self {
        Self {
            cpu_max_pct: 80.0,
            cooldown: Duration::from_secs(30),
            maintenance: MaintenanceWindowSettings::default(),
            breaker_failure_threshold: 5,
            breaker_cooldown: Duration::from_secs(60),
            rate_burst: 3,
            rate_per_minute: 2.0,
            lock_max_age: Duration::from_secs(300),
            write_guard_enabled: true,
            write_overhead_per_index: 0.03,
            write_overhead_max: 0.30,
        }
    }
}

/// Query interceptor parameters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct InterceptorSettings {
    /// Block queries whose safety score falls below this.
    pub min_safety: f64,
    /// Block instead of allowing when internal analysis fails.
    pub fail_closed: bool,
    /// Upper bound on synchronous plan lookup before falling back to allow.
    #[serde(with = "humantime_serde")]
    pub max_sync_wait: Duration,
    /// Estimated rows above this count as a risk feature.
    pub row_cap: u64,
    /// Total plan cost above this blocks regardless of score.
    pub cost_cap: f64,
    /// Table row count above which a sequential scan is a risk feature.
    pub seq_scan_row_floor: u64,
    /// Blend a trained classifier into the heuristic score.
    pub ml_refinement: bool,
}

impl Default for InterceptorSettings {
    fn default() -> Self {
        Self {
            min_safety: 0.3,
            fail_closed: false,
            max_sync_wait: Duration::from_millis(50),
            row_cap: 1_000_000,
            cost_cap: 1_000_000.0,
            seq_scan_row_floor: 100_000,
            ml_refinement: false,
        }
    }
}

/// Cost/benefit scorer parameters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringSettings {
    /// Weight of the heuristic benefit/cost ratio.
    pub heuristic_weight: f64,
    /// Weight of the learned utility score.
    pub ml_weight: f64,
    /// Composite score at or above this accepts the candidate.
    pub threshold: f64,
    /// Minimum confidence to accept.
    pub min_confidence: f64,
    /// Enable the learned utility model.
    pub ml_enabled: bool,
    /// Single-field candidates below this selectivity are rejected.
    pub min_selectivity: f64,
    /// Live selectivity diverging from stored stats beyond this prefers live.
    pub selectivity_tolerance: f64,
    /// Fields co-occurring in predicates above this rate form composites.
    pub cooccurrence_threshold: f64,
    /// Value correlation above this supports a composite candidate.
    pub correlation_threshold: f64,
    /// Confidence multiplier applied when no real plan was available.
    pub heuristic_confidence_factor: f64,
}

impl Default for ScoringSettings {
    fn default() -> Self {
        Self {
            heuristic_weight: 1.0,
            ml_weight: 0.0,
            threshold: 1.0,
            min_confidence: 0.5,
            ml_enabled: false,
            min_selectivity: 0.01,
            selectivity_tolerance: 0.5,
            cooccurrence_threshold: 0.3,
            correlation_threshold: 0.4,
            heuristic_confidence_factor: 0.6,
        }
    }
}

/// Lifecycle cadences. Doc-level defaults; all are configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleSettings {
    /// Stale-lock and breaker bookkeeping cadence.
    #[serde(with = "humantime_serde")]
    pub hourly_interval: Duration,
    /// Unused/bloat/redundancy/foreign-key sweep cadence.
    #[serde(with = "humantime_serde")]
    pub weekly_interval: Duration,
    /// Storage review and retraining cadence.
    #[serde(with = "humantime_serde")]
    pub monthly_interval: Duration,
    /// Schema drift watch cadence.
    #[serde(with = "humantime_serde")]
    pub drift_interval: Duration,
    /// Indexes with no scans in this window count as unused.
    #[serde(with = "humantime_serde")]
    pub unused_window: Duration,
    /// Indexes smaller than this are never flagged as unused.
    pub unused_size_floor_bytes: i64,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            hourly_interval: Duration::from_secs(3600),
            weekly_interval: Duration::from_secs(7 * 24 * 3600),
            monthly_interval: Duration::from_secs(30 * 24 * 3600),
            drift_interval: Duration::from_secs(24 * 3600),
            unused_window: Duration::from_secs(7 * 24 * 3600),
            unused_size_floor_bytes: 8 * 1024 * 1024,
        }
    }
}

/// Feature group toggles.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureToggles {
    /// The auto-indexer orchestrator.
    pub auto_indexing: bool,
    /// Telemetry collection and statistics.
    pub stats: bool,
    /// The query interceptor.
    pub interceptor: bool,
}

impl Default for FeatureToggles {
    fn default() -> Self {
        Self {
            auto_indexing: true,
            stats: true,
            interceptor: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = PilotConfig::default();
        assert_eq!(config.pool.min, 2);
        assert_eq!(config.pool.max, 20);
        assert_eq!(config.query.timeout, Duration::from_secs(30));
        assert_eq!(config.telemetry.batch_size, 100);
        assert_eq!(config.telemetry.flush_interval, Duration::from_secs(5));
        assert_eq!(config.telemetry.max_buffer, 10_000);
        assert_eq!(config.indexer.interval, Duration::from_secs(300));
        assert_eq!(config.indexer.mode, IndexerMode::Advisory);
        assert_eq!(config.indexer.min_queries_per_hour, 100);
        assert_eq!(config.indexer.max_indexes_per_table, 10);
        assert!((config.indexer.rollback_threshold_pct - 5.0).abs() < f64::EPSILON);
        assert_eq!(config.plan_cache.size, 1000);
        assert_eq!(config.plan_cache.ttl, Duration::from_secs(300));
        assert!((config.explain.min_coverage - 0.7).abs() < f64::EPSILON);
        assert!((config.safeguards.cpu_max_pct - 80.0).abs() < f64::EPSILON);
        assert_eq!(config.safeguards.cooldown, Duration::from_secs(30));
        assert_eq!(config.safeguards.breaker_failure_threshold, 5);
        assert_eq!(config.safeguards.breaker_cooldown, Duration::from_secs(60));
        assert!((config.interceptor.min_safety - 0.3).abs() < f64::EPSILON);
        assert!((config.scoring.heuristic_weight - 1.0).abs() < f64::EPSILON);
        assert!(config.scoring.ml_weight.abs() < f64::EPSILON);
    }

    #[test]
    fn test_validate_accepts_defaults() {
        assert!(PilotConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_inverted_pool_bounds() {
        let mut config = PilotConfig::default();
        config.pool.min = 30;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_batch_above_buffer() {
        let mut config = PilotConfig::default();
        config.telemetry.batch_size = 20_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_window_parsing() {
        assert_eq!(
            MaintenanceWindowSettings::parse_window("02:00-06:00").unwrap(),
            (120, 360)
        );
        assert_eq!(
            MaintenanceWindowSettings::parse_window("22:30-01:15").unwrap(),
            (1350, 75)
        );
        assert!(MaintenanceWindowSettings::parse_window("2am-6am").is_err());
        assert!(MaintenanceWindowSettings::parse_window("25:00-06:00").is_err());
        assert!(MaintenanceWindowSettings::parse_window("0200").is_err());
    }

    #[test]
    fn test_connection_url_escapes_password() {
        let settings = DatabaseSettings {
            password: "p@ss%word".to_string(),
            ..Default::default()
        };
        let url = settings.connection_url();
        assert!(url.contains("p%40ss%25word"));
        assert!(url.ends_with("sslmode=prefer"));
    }

    #[test]
    fn test_mode_names() {
        assert_eq!(IndexerMode::Advisory.as_str(), "advisory");
        assert_eq!(IndexerMode::DryRun.as_str(), "dry_run");
        assert_eq!(IndexerMode::Apply.as_str(), "apply");
    }

    #[test]
    fn test_config_serde_round_trip() {
        let config = PilotConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: PilotConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.pool.max, config.pool.max);
        assert_eq!(parsed.indexer.mode, config.indexer.mode);
    }
}
