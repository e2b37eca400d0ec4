//! Environment overrides.
//!
//! The environment is read exactly once at startup. Secrets (the database
//! password) are only ever read from here, never from configuration files.

use crate::bypass::BypassState;
use crate::settings::{IndexerMode, PilotConfig};
use pilot_core::{BypassScope, Feature};
use std::collections::HashMap;
use std::time::Duration;
use tracing::warn;

fn var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.is_empty())
}

fn parse_or_keep<T: std::str::FromStr>(name: &str, current: T) -> T {
    match var(name) {
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            warn!(var = name, value = %raw, "ignoring unparseable environment override");
            current
        }),
        None => current,
    }
}

fn truthy(raw: &str) -> bool {
    matches!(raw, "1" | "true" | "yes" | "on")
}

/// Apply recognized `PILOT_*` environment overrides onto a configuration.
pub fn apply_env_overrides(config: &mut PilotConfig) {
    if let Some(host) = var("PILOT_DB_HOST") {
        config.database.host = host;
    }
    config.database.port = parse_or_keep("PILOT_DB_PORT", config.database.port);
    if let Some(database) = var("PILOT_DB_NAME") {
        config.database.database = database;
    }
    if let Some(user) = var("PILOT_DB_USER") {
        config.database.user = user;
    }
    if let Some(password) = var("PILOT_DB_PASSWORD") {
        config.database.password = password;
    }
    if let Some(ssl_mode) = var("PILOT_DB_SSLMODE") {
        config.database.ssl_mode = ssl_mode;
    }

    config.pool.min = parse_or_keep("PILOT_POOL_MIN", config.pool.min);
    config.pool.max = parse_or_keep("PILOT_POOL_MAX", config.pool.max);

    if let Some(raw) = var("PILOT_QUERY_TIMEOUT_S") {
        if let Ok(secs) = raw.parse::<u64>() {
            config.query.timeout = Duration::from_secs(secs);
        }
    }

    config.telemetry.batch_size =
        parse_or_keep("PILOT_TELEMETRY_BATCH_SIZE", config.telemetry.batch_size);
    config.telemetry.max_buffer =
        parse_or_keep("PILOT_TELEMETRY_MAX_BUFFER", config.telemetry.max_buffer);
    if let Some(raw) = var("PILOT_TELEMETRY_FLUSH_INTERVAL_S") {
        if let Ok(secs) = raw.parse::<u64>() {
            config.telemetry.flush_interval = Duration::from_secs(secs);
        }
    }

    if let Some(raw) = var("PILOT_INDEXER_MODE") {
        match raw.as_str() {
            "advisory" => config.indexer.mode = IndexerMode::Advisory,
            "dry_run" => config.indexer.mode = IndexerMode::DryRun,
            "apply" => config.indexer.mode = IndexerMode::Apply,
            other => warn!(value = other, "ignoring unknown PILOT_INDEXER_MODE"),
        }
    }
    if let Some(raw) = var("PILOT_INDEXER_INTERVAL_S") {
        if let Ok(secs) = raw.parse::<u64>() {
            config.indexer.interval = Duration::from_secs(secs);
        }
    }
    config.indexer.min_queries_per_hour = parse_or_keep(
        "PILOT_INDEXER_MIN_QUERIES_PER_HOUR",
        config.indexer.min_queries_per_hour,
    );
    config.indexer.threshold_multiplier = parse_or_keep(
        "PILOT_INDEXER_THRESHOLD_MULTIPLIER",
        config.indexer.threshold_multiplier,
    );
    config.indexer.max_indexes_per_table = parse_or_keep(
        "PILOT_INDEXER_MAX_INDEXES_PER_TABLE",
        config.indexer.max_indexes_per_table,
    );

    config.safeguards.cpu_max_pct =
        parse_or_keep("PILOT_SAFEGUARDS_CPU_MAX_PCT", config.safeguards.cpu_max_pct);
    if let Some(raw) = var("PILOT_SAFEGUARDS_MAINTENANCE_WINDOW") {
        config.safeguards.maintenance.enabled = true;
        config.safeguards.maintenance.window = raw;
    }

    config.interceptor.min_safety =
        parse_or_keep("PILOT_INTERCEPTOR_MIN_SAFETY", config.interceptor.min_safety);
    if let Some(raw) = var("PILOT_INTERCEPTOR_FAIL_CLOSED") {
        config.interceptor.fail_closed = truthy(&raw);
    }

    if let Some(raw) = var("PILOT_FEATURE_AUTO_INDEXING") {
        config.features.auto_indexing = truthy(&raw);
    }
    if let Some(raw) = var("PILOT_FEATURE_STATS") {
        config.features.stats = truthy(&raw);
    }
    if let Some(raw) = var("PILOT_FEATURE_INTERCEPTOR") {
        config.features.interceptor = truthy(&raw);
    }
}

/// Collect env-layer bypass entries (`PILOT_BYPASS_*`).
#[must_use]
pub fn env_bypasses() -> HashMap<BypassScope, BypassState> {
    let mut entries = HashMap::new();
    let mapping = [
        ("PILOT_BYPASS_SYSTEM", BypassScope::System),
        (
            "PILOT_BYPASS_AUTO_INDEXING",
            BypassScope::Feature(Feature::AutoIndexing),
        ),
        ("PILOT_BYPASS_STATS", BypassScope::Feature(Feature::Stats)),
        (
            "PILOT_BYPASS_INTERCEPTOR",
            BypassScope::Feature(Feature::Interceptor),
        ),
    ];
    for (name, scope) in mapping {
        if let Some(raw) = var(name) {
            if truthy(&raw) {
                entries.insert(scope, BypassState::active(format!("env:{name}")));
            }
        }
    }
    entries
}

/// Config-layer bypass entries derived from feature toggles. A disabled
/// toggle is represented as an active bypass so precedence resolution can
/// re-enable it from a higher layer.
#[must_use]
pub fn config_bypasses(config: &PilotConfig) -> HashMap<BypassScope, BypassState> {
    let mut entries = HashMap::new();
    let toggles = [
        (Feature::AutoIndexing, config.features.auto_indexing),
        (Feature::Stats, config.features.stats),
        (Feature::Interceptor, config.features.interceptor),
    ];
    for (feature, enabled) in toggles {
        if !enabled {
            entries.insert(
                BypassScope::Feature(feature),
                BypassState::active("disabled in configuration"),
            );
        }
    }
    entries
}

/// Build the effective configuration: defaults, then environment.
#[must_use]
pub fn load_from_env() -> PilotConfig {
    let mut config = PilotConfig::default();
    apply_env_overrides(&mut config);
    config
}
