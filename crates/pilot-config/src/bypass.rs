//! Runtime bypass registry.
//!
//! A bypass disables a feature, a module, or the whole system without a
//! restart. Entries exist in three layers with precedence
//! `runtime > env > config`; the absence of an entry in every layer means
//! the scope runs normally.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use pilot_core::{BypassScope, Feature};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::info;

/// One bypass entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BypassState {
    /// Whether the bypass is active (`true` disables the scope).
    pub enabled: bool,
    /// Operator-supplied reason.
    pub reason: String,
    /// When the entry was set.
    pub since: DateTime<Utc>,
}

impl BypassState {
    /// Create an active bypass with the given reason.
    #[must_use]
    pub fn active(reason: impl Into<String>) -> Self {
        Self {
            enabled: true,
            reason: reason.into(),
            since: Utc::now(),
        }
    }
}

/// Layer a resolved bypass came from, for status reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BypassLayer {
    /// Set through the control plane at runtime.
    Runtime,
    /// Set through the process environment.
    Env,
    /// Derived from the configuration file.
    Config,
}

/// Layered bypass registry.
#[derive(Debug, Default)]
pub struct BypassRegistry {
    runtime: RwLock<HashMap<BypassScope, BypassState>>,
    env: HashMap<BypassScope, BypassState>,
    config: HashMap<BypassScope, BypassState>,
}

impl BypassRegistry {
    /// Create a registry with env- and config-layer entries fixed at
    /// startup.
    #[must_use]
    pub fn new(
        env: HashMap<BypassScope, BypassState>,
        config: HashMap<BypassScope, BypassState>,
    ) -> Self {
        Self {
            runtime: RwLock::new(HashMap::new()),
            env,
            config,
        }
    }

    /// Set or replace a runtime-layer entry.
    pub fn set(&self, scope: BypassScope, enabled: bool, reason: impl Into<String>) {
        let reason = reason.into();
        info!(scope = %scope, enabled = enabled, reason = %reason, "bypass updated");
        self.runtime.write().insert(
            scope,
            BypassState {
                enabled,
                reason,
                since: Utc::now(),
            },
        );
    }

    /// Remove a runtime-layer entry, falling back to lower layers.
    pub fn clear(&self, scope: &BypassScope) {
        self.runtime.write().remove(scope);
    }

    /// Resolve the effective entry for a scope across layers.
    #[must_use]
    pub fn resolve(&self, scope: &BypassScope) -> Option<(BypassState, BypassLayer)> {
        if let Some(state) = self.runtime.read().get(scope) {
            return Some((state.clone(), BypassLayer::Runtime));
        }
        if let Some(state) = self.env.get(scope) {
            return Some((state.clone(), BypassLayer::Env));
        }
        self.config
            .get(scope)
            .map(|state| (state.clone(), BypassLayer::Config))
    }

    /// Whether the scope is currently bypassed.
    #[must_use]
    pub fn is_bypassed(&self, scope: &BypassScope) -> bool {
        self.resolve(scope).is_some_and(|(state, _)| state.enabled)
    }

    /// The active bypass covering a feature, if any. System and startup
    /// bypasses cover every feature.
    #[must_use]
    pub fn covering_bypass(&self, feature: Feature) -> Option<(BypassScope, BypassState)> {
        for scope in [
            BypassScope::System,
            BypassScope::Startup,
            BypassScope::Feature(feature),
        ] {
            if let Some((state, _)) = self.resolve(&scope) {
                if state.enabled {
                    return Some((scope, state));
                }
            }
        }
        None
    }

    /// Whether the feature may run.
    #[must_use]
    pub fn feature_enabled(&self, feature: Feature) -> bool {
        self.covering_bypass(feature).is_none()
    }

    /// Snapshot of every effective entry, for status reporting.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(BypassScope, BypassState, BypassLayer)> {
        let mut seen: HashMap<BypassScope, (BypassState, BypassLayer)> = HashMap::new();
        for (scope, state) in &self.config {
            seen.insert(scope.clone(), (state.clone(), BypassLayer::Config));
        }
        for (scope, state) in &self.env {
            seen.insert(scope.clone(), (state.clone(), BypassLayer::Env));
        }
        for (scope, state) in self.runtime.read().iter() {
            seen.insert(scope.clone(), (state.clone(), BypassLayer::Runtime));
        }
        seen.into_iter()
            .map(|(scope, (state, layer))| (scope, state, layer))
            .collect()
    }
}
