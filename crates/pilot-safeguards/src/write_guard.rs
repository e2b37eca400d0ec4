//! Write-overhead guard.
//!
//! Every index on a table taxes its writes. The guard denies new indexes
//! once a table reaches its index budget or once the estimated cumulative
//! write overhead crosses the configured ceiling.

use pilot_config::SafeguardSettings;

/// The guard. Stateless; callers supply the current index count.
#[derive(Debug, Clone, Copy)]
pub struct WriteOverheadGuard {
    enabled: bool,
    max_indexes_per_table: usize,
    overhead_per_index: f64,
    overhead_max: f64,
}

impl WriteOverheadGuard {
    /// Build from safeguard settings and the indexer's per-table cap.
    #[must_use]
    pub fn new(settings: &SafeguardSettings, max_indexes_per_table: usize) -> Self {
        Self {
            enabled: settings.write_guard_enabled,
            max_indexes_per_table,
            overhead_per_index: settings.write_overhead_per_index,
            overhead_max: settings.write_overhead_max,
        }
    }

    /// Estimated write overhead fraction with `index_count` indexes.
    #[must_use]
    pub fn estimated_overhead(&self, index_count: usize) -> f64 {
        index_count as f64 * self.overhead_per_index
    }

    /// Check whether one more index fits on the table.
    ///
    /// # Errors
    /// Returns the denial reason.
    pub fn check(&self, table: &str, existing_index_count: usize) -> Result<(), String> {
        if !self.enabled {
            return Ok(());
        }
        if existing_index_count >= self.max_indexes_per_table {
            return Err(format!(
                "table {table} already carries {existing_index_count} indexes (cap {})",
                self.max_indexes_per_table
            ));
        }
        let projected = self.estimated_overhead(existing_index_count + 1);
        if projected > self.overhead_max {
            return Err(format!(
                "projected write overhead {projected:.2} exceeds ceiling {:.2} on {table}",
                self.overhead_max
            ));
        }
        Ok(())
    }
}
