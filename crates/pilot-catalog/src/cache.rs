//! In-process catalog cache.
//!
//! Holds the allowed `(table, field)` set and the set of tables carrying a
//! tenant column. Reads are short lock acquisitions on the foreground
//! path; any catalog mutation or detected drift bumps the generation and
//! empties the cache, so stale state is never consulted across a drift.

use parking_lot::RwLock;
use pilot_core::FieldRef;
use std::collections::HashSet;

#[derive(Debug, Default)]
struct CacheState {
    allowed: HashSet<FieldRef>,
    tenant_tables: HashSet<String>,
    loaded: bool,
    generation: u64,
}

/// Shared catalog cache.
#[derive(Debug, Default)]
pub struct CatalogCache {
    state: RwLock<CacheState>,
}

impl CatalogCache {
    /// Create an empty, unloaded cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the cached sets wholesale.
    pub fn replace(&self, allowed: HashSet<FieldRef>, tenant_tables: HashSet<String>) {
        let mut state = self.state.write();
        state.allowed = allowed;
        state.tenant_tables = tenant_tables;
        state.loaded = true;
        state.generation += 1;
    }

    /// Drop all cached state. The next validation must reload from the
    /// database.
    pub fn invalidate(&self) {
        let mut state = self.state.write();
        state.allowed.clear();
        state.tenant_tables.clear();
        state.loaded = false;
        state.generation += 1;
    }

    /// Whether the cache currently holds a loaded snapshot.
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.state.read().loaded
    }

    /// Monotonic generation counter, bumped on every replace/invalidate.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.state.read().generation
    }

    /// Whether the pair is in the allowed set. `None` when the cache is
    /// not loaded and cannot answer.
    #[must_use]
    pub fn contains(&self, table: &str, field: &str) -> Option<bool> {
        let state = self.state.read();
        if !state.loaded {
            return None;
        }
        Some(
            state
                .allowed
                .contains(&FieldRef::new(table, field)),
        )
    }

    /// Whether the table carries a tenant column. `None` when unloaded.
    #[must_use]
    pub fn is_tenant_scoped(&self, table: &str) -> Option<bool> {
        let state = self.state.read();
        if !state.loaded {
            return None;
        }
        Some(state.tenant_tables.contains(table))
    }

    /// Number of allowed pairs, for status reporting.
    #[must_use]
    pub fn allowed_len(&self) -> usize {
        self.state.read().allowed.len()
    }
}
