//! # Pilot Config
//!
//! Typed configuration for the Index Pilot engine.
//!
//! Configuration is parsed once at startup into an explicit struct tree and
//! threaded through the engine; there are no string-keyed lookups at
//! runtime. Runtime overrides go through the bypass registry, which applies
//! the precedence `runtime > env > config > defaults`.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod bypass;
pub mod env;
pub mod settings;

pub use bypass::{BypassLayer, BypassRegistry, BypassState};
pub use env::{apply_env_overrides, config_bypasses, env_bypasses, load_from_env};
pub use settings::{
    DatabaseSettings, ExplainSettings, FeatureToggles, IndexerMode, IndexerSettings,
    InterceptorSettings, LifecycleSettings, MaintenanceWindowSettings, PilotConfig,
    PlanCacheSettings, PoolSettings, QuerySettings, SafeguardSettings, ScoringSettings,
    TelemetrySettings,
};
